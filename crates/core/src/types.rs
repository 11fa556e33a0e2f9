//! Domain types exchanged with salt-api.
//!
//! A [`WorkRequest`] is what salt-api calls a "lowstate": one unit of work
//! addressed to a target selector. Responses come back either as an
//! immediate [`ResultRecord`] or as a [`JobId`] to poll.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution mode requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Run synchronously; the response carries the per-target results.
    Local,
    /// Run as a background job; the response carries a job identifier.
    LocalAsync,
}

/// A single unit of work sent to salt-api.
///
/// Serializes to `{"client", "tgt", "fun", "arg"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub client: ClientMode,
    /// Target selector, e.g. `*` or `web*`.
    #[serde(rename = "tgt")]
    pub target: String,
    /// Execution module function, e.g. `test.ping`.
    pub fun: String,
    #[serde(default)]
    pub arg: Vec<String>,
}

impl WorkRequest {
    pub fn new(
        client: ClientMode,
        target: impl Into<String>,
        fun: impl Into<String>,
        arg: Vec<String>,
    ) -> Self {
        Self {
            client,
            target: target.into(),
            fun: fun.into(),
            arg,
        }
    }

    /// A synchronous request whose results come back in the dispatch reply.
    pub fn local(target: impl Into<String>, fun: impl Into<String>, arg: Vec<String>) -> Self {
        Self::new(ClientMode::Local, target, fun, arg)
    }

    /// A background job whose results must be polled.
    pub fn local_async(
        target: impl Into<String>,
        fun: impl Into<String>,
        arg: Vec<String>,
    ) -> Self {
        Self::new(ClientMode::LocalAsync, target, fun, arg)
    }
}

/// Job identifier assigned by the backend for an asynchronous request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(jid: impl Into<String>) -> Self {
        Self(jid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An asynchronous job to watch, with its place in the dispatch reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub jid: JobId,
    /// Zero-based index of the entry in the dispatch response.
    pub position: usize,
    /// Set on the final entry of the response.
    pub is_last: bool,
}

/// Per-target results for one request or job, delivered as a single batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord(serde_json::Map<String, serde_json::Value>);

impl ResultRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Result reported by a single target, if it has reported.
    pub fn get(&self, target: &str) -> Option<&serde_json::Value> {
        self.0.get(target)
    }

    /// Names of every target present in the batch.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Merge another batch into this one. Later values win on key clashes.
    pub fn extend(&mut self, other: ResultRecord) {
        self.0.extend(other.0);
    }

    pub fn into_inner(self) -> serde_json::Map<String, serde_json::Value> {
        self.0
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for ResultRecord {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}
