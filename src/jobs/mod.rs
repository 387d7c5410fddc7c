//! Job scheduler collaborator.
//!
//! Layers with tiled vector data fetch and parse per-tile content off the
//! render thread. The [`JobScheduler`] trait is the seam to whatever runs
//! that work; the engine only submits job descriptions and collects
//! [`JobHandle`]s. Submission is fire-and-forget: the engine never polls
//! job status, and cancellation is the caller's responsibility through the
//! handle.
//!
//! [`TokioScheduler`] is the default implementation, spawning each job on
//! a tokio runtime with a child cancellation token.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors from job submission.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The scheduler has been shut down and accepts no further jobs.
    #[error("job scheduler is no longer accepting jobs")]
    Closed,
}

/// Unique identifier assigned to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A unit of background work that fetches or parses vector-tile content.
///
/// Jobs must watch the cancellation token at their own suspension points;
/// cancellation is cooperative.
pub trait VectorJob: Send + 'static {
    /// Job name for logging.
    fn name(&self) -> &str;

    /// Run the job to completion or cancellation.
    fn execute(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Handle to a submitted job.
///
/// Cloneable; all clones refer to the same job. Dropping a handle does not
/// cancel the job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
}

impl JobHandle {
    /// The job's unique identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Accepts asynchronous units of work and runs them off the calling thread.
pub trait JobScheduler: Send + Sync {
    /// Submit a job, returning its handle.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] if the scheduler has shut down.
    fn submit(&self, job: Box<dyn VectorJob>) -> Result<JobHandle, SchedulerError>;
}

/// Job scheduler backed by a tokio runtime.
///
/// Each submitted job is spawned as a task carrying a child token of the
/// scheduler's root cancellation token, so [`TokioScheduler::shutdown`]
/// cancels every outstanding job at once.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    root: CancellationToken,
    next_id: AtomicU64,
}

impl TokioScheduler {
    /// Create a scheduler that spawns on the given runtime handle.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            root: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Cancel all outstanding jobs and refuse further submissions.
    pub fn shutdown(&self) {
        debug!("job scheduler shutting down");
        self.root.cancel();
    }
}

impl JobScheduler for TokioScheduler {
    fn submit(&self, job: Box<dyn VectorJob>) -> Result<JobHandle, SchedulerError> {
        if self.root.is_cancelled() {
            return Err(SchedulerError::Closed);
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = self.root.child_token();
        debug!(job_id = %id, job_name = job.name(), "Job submitted");

        self.handle.spawn(job.execute(cancel.clone()));
        Ok(JobHandle { id, cancel })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingJob {
        ran: Arc<AtomicUsize>,
    }

    impl VectorJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        fn execute(
            self: Box<Self>,
            cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move {
                if !cancel.is_cancelled() {
                    self.ran.fetch_add(1, Ordering::SeqCst);
                }
            })
        }
    }

    #[tokio::test]
    async fn test_submit_runs_job() {
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        let handle = scheduler
            .submit(Box::new(CountingJob {
                ran: Arc::clone(&ran),
            }))
            .expect("submit should succeed");
        assert!(!handle.is_cancelled());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handles_get_distinct_ids() {
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        let a = scheduler
            .submit(Box::new(CountingJob {
                ran: Arc::clone(&ran),
            }))
            .expect("submit should succeed");
        let b = scheduler
            .submit(Box::new(CountingJob {
                ran: Arc::clone(&ran),
            }))
            .expect("submit should succeed");
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_jobs() {
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current());
        scheduler.shutdown();

        let ran = Arc::new(AtomicUsize::new(0));
        let result = scheduler.submit(Box::new(CountingJob {
            ran: Arc::clone(&ran),
        }));
        assert!(matches!(result, Err(SchedulerError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_outstanding_handles() {
        let scheduler = TokioScheduler::new(tokio::runtime::Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        let handle = scheduler
            .submit(Box::new(CountingJob {
                ran: Arc::clone(&ran),
            }))
            .expect("submit should succeed");
        scheduler.shutdown();
        assert!(handle.is_cancelled());
    }
}
