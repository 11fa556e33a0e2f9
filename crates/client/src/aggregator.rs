//! Fan-in of immediate and polled results into one bounded stream.
//!
//! Every producer (the dispatcher pushing immediate results, each job
//! watcher, the timeout guard) holds a [`ResultSink`]. The caller holds the
//! [`ResultStream`]. All of them share a single sender slot: closing takes
//! the sender out of the slot under a lock, so exactly one close can
//! succeed, and a send after close finds the slot empty and discards its
//! batch instead of failing. Closing also cancels a [`CancellationToken`]
//! that watchers select on, so they stop polling once nobody is listening.
//!
//! Spawned tasks are registered with a [`TaskTracker`] and
//! [`ResultStream::join`] waits for all of them.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use saltctl_core::types::{JobHandle, JobId, ResultRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Why the stream stopped accepting results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The entries responsible for closing have all finished.
    Completed,
    /// The wait window elapsed first.
    TimedOut,
    /// The caller dropped the stream.
    Abandoned,
}

/// Which finished entries close the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// Close once the final entry of the dispatch reply has finished, even
    /// if earlier jobs are still polling.
    LastEntry,
    /// Close once every entry has finished, delivered or lost.
    #[default]
    AllEntries,
}

/// A job whose results will never be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostJob {
    pub jid: JobId,
    pub reason: String,
}

#[derive(Debug)]
struct Shared {
    tx: Mutex<Option<mpsc::UnboundedSender<ResultRecord>>>,
    reason: OnceLock<CloseReason>,
    closed: CancellationToken,
    pending: AtomicUsize,
    policy: ClosePolicy,
    lost: Mutex<Vec<LostJob>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer handle onto a [`ResultStream`]. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ResultSink {
    shared: Arc<Shared>,
}

impl ResultSink {
    /// Deliver one batch. Returns `false` (and drops the batch) when the
    /// stream is already closed.
    pub fn send(&self, batch: ResultRecord) -> bool {
        let slot = lock(&self.shared.tx);
        match slot.as_ref() {
            Some(tx) => tx.send(batch).is_ok(),
            None => false,
        }
    }

    /// Close the stream. Only the first call has any effect and only that
    /// call returns `true`.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut slot = lock(&self.shared.tx);
        let Some(tx) = slot.take() else {
            return false;
        };
        let _ = self.shared.reason.set(reason);
        drop(slot);
        drop(tx);

        self.shared.closed.cancel();
        tracing::debug!(?reason, "Result stream closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the stream has been closed by any path.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Mark one dispatch entry as finished, closing the stream if the
    /// policy says this entry was the one to close it.
    pub fn entry_done(&self, is_last: bool) {
        let previous = self
            .shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);

        let should_close = match self.shared.policy {
            ClosePolicy::LastEntry => is_last,
            ClosePolicy::AllEntries => remaining == 0,
        };
        if should_close {
            self.close(CloseReason::Completed);
        }
    }

    /// Record that a job's results will never arrive.
    pub fn record_lost(&self, jid: JobId, reason: String) {
        lock(&self.shared.lost).push(LostJob { jid, reason });
    }
}

/// Consumer side of the aggregation: yields result batches until closed.
///
/// Batches from different jobs arrive in completion order; each batch is
/// one job's (or one immediate entry's) complete result set.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::UnboundedReceiver<ResultRecord>,
    sink: ResultSink,
    tracker: TaskTracker,
    jobs: Vec<JobHandle>,
}

impl ResultStream {
    /// A stream expecting `entries` dispatch entries to finish.
    pub fn new(entries: usize, policy: ClosePolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            tx: Mutex::new(Some(tx)),
            reason: OnceLock::new(),
            closed: CancellationToken::new(),
            pending: AtomicUsize::new(entries),
            policy,
            lost: Mutex::new(Vec::new()),
        });

        Self {
            rx,
            sink: ResultSink { shared },
            tracker: TaskTracker::new(),
            jobs: Vec::new(),
        }
    }

    /// A new producer handle.
    pub fn sink(&self) -> ResultSink {
        self.sink.clone()
    }

    /// Run `task` in the background, tracked for [`join`](Self::join).
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Asynchronous jobs being watched for this stream, in reply order.
    pub fn jobs(&self) -> &[JobHandle] {
        &self.jobs
    }

    pub(crate) fn track_job(&mut self, handle: JobHandle) {
        self.jobs.push(handle);
    }

    /// Close the stream after `timeout` unless it closes earlier.
    pub fn start_timeout(&self, timeout: Duration) {
        let sink = self.sink();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = sink.closed() => {}
                _ = tokio::time::sleep(timeout) => {
                    if sink.close(CloseReason::TimedOut) {
                        tracing::warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "Timed out waiting for results",
                        );
                    }
                }
            }
        });
    }

    /// Next batch, or `None` once the stream is closed and drained.
    pub async fn next_batch(&mut self) -> Option<ResultRecord> {
        self.rx.recv().await
    }

    /// Why the stream closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.sink.shared.reason.get().copied()
    }

    /// Jobs whose results were abandoned so far.
    pub fn lost_jobs(&self) -> Vec<LostJob> {
        lock(&self.sink.shared.lost).clone()
    }

    /// Number of background tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every spawned task to finish and return the lost jobs.
    ///
    /// Watchers drop their in-flight poll when the stream closes, so this
    /// returns shortly after the stream has closed.
    pub async fn join(self) -> Vec<LostJob> {
        self.tracker.close();
        self.tracker.wait().await;
        self.lost_jobs()
    }
}

impl Stream for ResultStream {
    type Item = ResultRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.sink.close(CloseReason::Abandoned);
    }
}
