//! Polling of a single asynchronous job.
//!
//! A [`JobWatcher`] asks `GET /jobs/{jid}` on a fixed interval until at
//! least one target has reported, then pushes everything reported so far
//! as one batch. Targets that report after that first non-empty poll are
//! not collected: the watcher stops as soon as it has delivered.
//!
//! A failed poll (transport error, rejected session, malformed reply)
//! ends the watch for that job without retrying. The loss is logged and
//! recorded on the stream so the caller can report it. A poll still in
//! flight when the stream closes is dropped.

use std::sync::Arc;
use std::time::Duration;

use saltctl_core::types::JobHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregator::ResultSink;
use crate::api::SaltApi;

/// How a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The job's batch was pushed into the stream.
    Delivered,
    /// Results arrived but the stream was already closed.
    Discarded,
    /// The stream closed while the job was still pending.
    Abandoned,
    /// A poll failed; the job's results will not be delivered.
    Lost,
}

/// Polls one job through a shared [`SaltApi`].
pub struct JobWatcher {
    api: Arc<SaltApi>,
    poll_interval: Duration,
}

impl JobWatcher {
    pub fn new(api: Arc<SaltApi>, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    /// Poll until the job reports, a poll fails, or the stream closes.
    ///
    /// The first poll happens one interval after the call. Whatever the
    /// outcome, the job's entry is marked done on `sink`, which closes the
    /// stream when `handle.is_last` is responsible for that.
    pub async fn watch(&self, sink: ResultSink, handle: JobHandle) -> WatchOutcome {
        let jid = &handle.jid;
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt = 0u32;

        tracing::debug!(
            jid = %jid,
            position = handle.position,
            is_last = handle.is_last,
            "Watching job",
        );

        let outcome = loop {
            tokio::select! {
                _ = sink.closed() => break WatchOutcome::Abandoned,
                _ = ticker.tick() => {}
            }

            attempt += 1;
            let polled = tokio::select! {
                _ = sink.closed() => break WatchOutcome::Abandoned,
                polled = self.api.job_results(jid) => polled,
            };
            match polled {
                Ok(None) => {
                    tracing::trace!(jid = %jid, attempt, "No results yet");
                }
                Ok(Some(batch)) => {
                    let targets = batch.len();
                    if sink.send(batch) {
                        tracing::debug!(jid = %jid, attempt, targets, "Job results delivered");
                        break WatchOutcome::Delivered;
                    }
                    tracing::debug!(jid = %jid, targets, "Stream closed, discarding job results");
                    break WatchOutcome::Discarded;
                }
                Err(e) => {
                    tracing::warn!(
                        jid = %jid,
                        attempt,
                        error = %e,
                        "Polling failed, results for this job will not be delivered",
                    );
                    sink.record_lost(jid.clone(), e.to_string());
                    break WatchOutcome::Lost;
                }
            }
        };

        sink.entry_done(handle.is_last);
        outcome
    }
}
