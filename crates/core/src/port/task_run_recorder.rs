// Task Run Recorder Port - persistence of scheduler bookkeeping

use crate::domain::TaskSnapshot;
use crate::error::Result;
use async_trait::async_trait;

/// Sink for task state changes (registration, start, finish)
///
/// The scheduler logs recorder errors and carries on; a broken store must not
/// stop scheduling.
#[async_trait]
pub trait TaskRunRecorder: Send + Sync {
    async fn record(&self, task: &TaskSnapshot) -> Result<()>;
}

/// Mock implementations for testing
pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use parking_lot::Mutex;

    /// Keeps every recorded snapshot in memory
    #[derive(Default)]
    pub struct InMemoryRecorder {
        records: Mutex<Vec<TaskSnapshot>>,
        fail: bool,
    }

    impl InMemoryRecorder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Recorder whose every write fails
        pub fn broken() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn records(&self) -> Vec<TaskSnapshot> {
            self.records.lock().clone()
        }

        pub fn records_for(&self, name: &str) -> Vec<TaskSnapshot> {
            self.records
                .lock()
                .iter()
                .filter(|s| s.name == name)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl TaskRunRecorder for InMemoryRecorder {
        async fn record(&self, task: &TaskSnapshot) -> Result<()> {
            if self.fail {
                return Err(AppError::Storage("recorder unavailable".into()));
            }
            self.records.lock().push(task.clone());
            Ok(())
        }
    }
}
