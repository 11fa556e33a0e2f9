//! Lowstate submission and classification of the reply.
//!
//! [`Dispatcher::submit`] posts every request in one call and returns a
//! [`ResultStream`] right away. Immediate results are pushed into it
//! before returning; each job handle gets its own [`JobWatcher`] task. A
//! timeout guard bounds how long the stream stays open.

use std::sync::Arc;
use std::time::Duration;

use saltctl_core::config::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS};
use saltctl_core::types::{JobHandle, WorkRequest};

use crate::aggregator::{ClosePolicy, ResultStream};
use crate::api::SaltApi;
use crate::error::ClientError;
use crate::messages::DispatchEntry;
use crate::session::{Credentials, Session, SessionGuard, SessionManager};
use crate::watcher::JobWatcher;

/// Timing and close behaviour for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Upper bound on how long the stream stays open.
    pub timeout: Duration,
    /// Delay between polls of one job.
    pub poll_interval: Duration,
    pub close_policy: ClosePolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            close_policy: ClosePolicy::default(),
        }
    }
}

/// Submits lowstate batches with one session.
pub struct Dispatcher {
    api: Arc<SaltApi>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(api: Arc<SaltApi>, options: DispatchOptions) -> Self {
        Self { api, options }
    }

    /// Build a dispatcher for `session`.
    pub fn for_session(session: &Session, options: DispatchOptions) -> Result<Self, ClientError> {
        Ok(Self::new(Arc::new(SaltApi::new(session)?), options))
    }

    /// Submit `requests` and start collecting their results.
    ///
    /// Fails with [`ClientError::NeedsAuth`] when the session is rejected;
    /// this method never retries. The reply must hold exactly one entry per
    /// request.
    pub async fn submit(&self, requests: &[WorkRequest]) -> Result<ResultStream, ClientError> {
        if requests.is_empty() {
            return Err(ClientError::InvalidRequest(
                "at least one request is required".into(),
            ));
        }

        let entries = self.api.submit(requests).await?;
        if entries.len() != requests.len() {
            return Err(ClientError::Decode(format!(
                "dispatch reply has {} entries for {} requests",
                entries.len(),
                requests.len(),
            )));
        }

        let mut stream = ResultStream::new(entries.len(), self.options.close_policy);
        stream.start_timeout(self.options.timeout);
        let sink = stream.sink();
        let last = entries.len() - 1;

        for (position, entry) in entries.into_iter().enumerate() {
            let is_last = position == last;
            match entry {
                DispatchEntry::Immediate(batch) => {
                    tracing::debug!(position, targets = batch.len(), "Immediate result");
                    sink.send(batch);
                    sink.entry_done(is_last);
                }
                DispatchEntry::Async { jid, minions } => {
                    tracing::info!(
                        jid = %jid,
                        position,
                        minions = minions.len(),
                        "Job submitted",
                    );
                    let handle = JobHandle {
                        jid,
                        position,
                        is_last,
                    };
                    stream.track_job(handle.clone());

                    let watcher =
                        JobWatcher::new(Arc::clone(&self.api), self.options.poll_interval);
                    let sink = sink.clone();
                    stream.spawn(async move {
                        watcher.watch(sink, handle).await;
                    });
                }
            }
        }

        Ok(stream)
    }
}

/// Submit with `session`, re-authenticating at most once.
///
/// When the first submission is rejected with [`ClientError::NeedsAuth`],
/// a new session is obtained through `manager` and the same requests are
/// submitted exactly one more time. `guard` is pointed at the new session
/// before that retry, so the fresh token is persisted even when the retry
/// fails. Returns the session that was accepted.
pub async fn submit_with_reauth(
    manager: &SessionManager,
    credentials: &Credentials,
    guard: &mut SessionGuard,
    session: Session,
    options: DispatchOptions,
    requests: &[WorkRequest],
) -> Result<(Session, ResultStream), ClientError> {
    let dispatcher = Dispatcher::for_session(&session, options)?;
    match dispatcher.submit(requests).await {
        Ok(stream) => Ok((session, stream)),
        Err(ClientError::NeedsAuth) => {
            tracing::info!(state = ?session.state(), "Session rejected, re-authenticating");
            let session = manager.authenticate(credentials).await?;
            guard.update(&session);

            let dispatcher = Dispatcher::for_session(&session, options)?;
            let stream = dispatcher.submit(requests).await?;
            Ok((session, stream))
        }
        Err(e) => Err(e),
    }
}
