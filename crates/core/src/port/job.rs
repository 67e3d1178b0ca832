// Job Port - unit of work run by the scheduler

use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

/// Job execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

/// A named periodic workload
///
/// The returned string is stored as the task's last result; an error is
/// stored as the task's last error. Neither affects other tasks.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> Result<String, JobError>;
}

/// Adapter turning an async closure into a [`Job`]
///
/// # Example
/// ```text
/// let job = FnJob::new(|| async { Ok("synced".to_string()) });
/// scheduler.add_task("sync", Arc::new(job), "interval@5");
/// ```
pub struct FnJob<F> {
    f: F,
}

impl<F> FnJob<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, JobError>> + Send,
{
    async fn run(&self) -> Result<String, JobError> {
        (self.f)().await
    }
}

/// Mock implementations for testing
pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts invocations; succeeds or fails after an optional delay
    pub struct CountingJob {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail_with: Option<String>,
    }

    impl CountingJob {
        pub fn succeeding() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                fail_with: None,
            }
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                fail_with: Some(message.into()),
                ..Self::succeeding()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Shared counter, readable after the job has been moved into a scheduler
        pub fn counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        async fn run(&self) -> Result<String, JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail_with {
                Some(message) => Err(JobError::failed(message.clone())),
                None => Ok(format!("run {n}")),
            }
        }
    }

    /// Always panics
    pub struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        async fn run(&self) -> Result<String, JobError> {
            panic!("job exploded");
        }
    }
}
