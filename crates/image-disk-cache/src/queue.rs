//! Serial execution context for disk operations
//!
//! Every job submitted to an [`IoQueue`] runs to completion before the next
//! one starts, in submission order.

use crate::error::{DiskCacheError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

struct Job {
    work: BoxFuture<'static, ()>,
    cancel: Option<JobCancel>,
}

/// Cancellation flag for a queued job. Cancelling before the job starts
/// prevents it from running at all; cancelling later has no effect on it.
#[derive(Debug, Clone, Default)]
pub struct JobCancel(Arc<AtomicBool>);

impl JobCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a single worker task draining disk jobs one at a time
#[derive(Clone)]
pub struct IoQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl IoQueue {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn new(label: impl Into<String>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let label = label.into();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.cancel.as_ref().is_some_and(JobCancel::is_cancelled) {
                    debug!(queue = %label, "Skipping cancelled disk job");
                    continue;
                }
                job.work.await;
            }
            debug!(queue = %label, "Disk I/O queue stopped");
        });

        Self { tx }
    }

    /// Queue `work` and wait for its output.
    ///
    /// The job is enqueued when this is called, not when the returned future
    /// is first polled.
    pub fn submit<F, T>(&self, work: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = self.enqueue(work, None);
        async move { rx.await.map_err(|_| DiskCacheError::QueueClosed) }
    }

    /// Queue `work` guarded by `cancel`. Resolves to `None` when the job was
    /// cancelled before it started.
    pub fn submit_cancellable<F, T>(
        &self,
        cancel: JobCancel,
        work: F,
    ) -> impl Future<Output = Option<T>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = self.enqueue(work, Some(cancel));
        async move { rx.await.ok() }
    }

    fn enqueue<F, T>(&self, work: F, cancel: Option<JobCancel>) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            work: async move {
                let _ = tx.send(work.await);
            }
            .boxed(),
            cancel,
        };

        // A send failure drops the job and with it the sender, so the
        // receiver observes the closed queue.
        let _ = self.tx.send(job);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = IoQueue::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pending = Vec::new();
        for i in 0..5u64 {
            let log = Arc::clone(&log);
            // Earlier jobs sleep longer; order must still hold
            pending.push(queue.submit(async move {
                tokio::time::sleep(Duration::from_millis(25 - i * 5)).await;
                log.lock().unwrap().push(i);
                i
            }));
        }

        for (i, fut) in pending.into_iter().enumerate() {
            assert_eq!(fut.await.unwrap(), i as u64);
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_jobs_never_overlap() {
        let queue = IoQueue::new("test");
        let running = Arc::new(AtomicBool::new(false));

        let mut pending = Vec::new();
        for _ in 0..4 {
            let running = Arc::clone(&running);
            pending.push(queue.submit(async move {
                assert!(!running.swap(true, Ordering::SeqCst));
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.store(false, Ordering::SeqCst);
            }));
        }

        for fut in pending {
            fut.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancelled_job_does_not_run() {
        let queue = IoQueue::new("test");
        let ran = Arc::new(AtomicBool::new(false));

        // Hold the queue so the next job cannot start yet
        let blocker = queue.submit(tokio::time::sleep(Duration::from_millis(20)));

        let cancel = JobCancel::new();
        let flag = Arc::clone(&ran);
        let job = queue.submit_cancellable(cancel.clone(), async move {
            flag.store(true, Ordering::SeqCst);
        });
        cancel.cancel();

        blocker.await.unwrap();
        assert!(job.await.is_none());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_after_start_has_no_effect() {
        let queue = IoQueue::new("test");
        let cancel = JobCancel::new();

        let job = queue.submit_cancellable(cancel.clone(), async { 7 });
        assert_eq!(job.await, Some(7));

        cancel.cancel();
        assert!(cancel.is_cancelled());
    }
}
