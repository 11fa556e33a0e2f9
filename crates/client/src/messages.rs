//! salt-api request and response bodies.
//!
//! Every salt-api reply wraps its payload as `{"return": [...]}`. The
//! dispatch reply mixes two entry shapes in that list: a per-target result
//! map for synchronous requests, and `{"jid": ...}` for background jobs.
//! [`DispatchEntry`] separates them with an explicit discriminated parse
//! instead of probing an untyped map at the call site.

use chrono::{DateTime, Utc};
use saltctl_core::types::{JobId, ResultRecord};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// The `{"return": [...]}` envelope around every salt-api reply.
#[derive(Debug, Deserialize)]
pub struct ReturnEnvelope<T> {
    #[serde(rename = "return")]
    pub entries: Vec<T>,
}

/// Body of `POST /login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub eauth: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// One element of the `POST /login` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoginGrant {
    pub token: String,
    /// Unix timestamp (seconds) at which the token was issued.
    #[serde(default)]
    pub start: f64,
    /// Unix timestamp (seconds) after which the token is rejected.
    #[serde(default)]
    pub expire: f64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub eauth: String,
    /// Permission expressions granted to the user. Usually strings, but
    /// some eauth backends return nested objects.
    #[serde(default)]
    pub perms: Vec<serde_json::Value>,
}

impl LoginGrant {
    /// Token expiry as a UTC timestamp, when the backend reported one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.expire.is_finite() || self.expire <= 0.0 {
            return None;
        }
        let secs = self.expire.trunc() as i64;
        let nanos = (self.expire.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

/// One entry of the `POST /` reply, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEntry {
    /// Results of a synchronous (`local`) request, keyed by target.
    Immediate(ResultRecord),
    /// Handle for a background (`local_async`) job.
    Async {
        jid: JobId,
        /// Targets the backend matched, when it reports them.
        minions: Vec<String>,
    },
}

impl DispatchEntry {
    /// Classify a raw reply entry.
    ///
    /// An object with a `jid` key is a job handle and the `jid` must be a
    /// non-empty string. Any other object is an immediate result. Anything
    /// that is not an object is rejected.
    pub fn parse(value: serde_json::Value) -> Result<Self, String> {
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            other => return Err(format!("dispatch entry is not an object: {other}")),
        };

        let Some(jid) = map.remove("jid") else {
            return Ok(Self::Immediate(ResultRecord::from(map)));
        };

        let jid = match jid {
            serde_json::Value::String(s) if !s.is_empty() => JobId::from(s),
            other => return Err(format!("job identifier is not a non-empty string: {other}")),
        };

        let minions = match map.remove("minions") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw)
                .map_err(|e| format!("minions list for job {jid} is malformed: {e}"))?,
        };

        Ok(Self::Async { jid, minions })
    }
}

impl<'de> Deserialize<'de> for DispatchEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::parse(value).map_err(D::Error::custom)
    }
}

/// Merge the entries of a `GET /jobs/{jid}` reply into one batch.
///
/// Returns `Ok(None)` while no target has reported yet. An empty `return`
/// list is not a valid job lookup reply and is rejected.
pub fn merge_job_results(entries: Vec<ResultRecord>) -> Result<Option<ResultRecord>, String> {
    if entries.is_empty() {
        return Err("job lookup returned an empty list".into());
    }

    let mut batch = ResultRecord::new();
    for entry in entries {
        batch.extend(entry);
    }

    Ok((!batch.is_empty()).then_some(batch))
}
