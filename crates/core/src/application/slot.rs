// Scheduler lifecycle owner
//
// Holds at most one live scheduler per process. Installing a new one stops
// the previous instance first so two loops never run side by side.

use crate::application::scheduler::TaskScheduler;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Default)]
pub struct SchedulerSlot {
    current: Mutex<Option<Arc<TaskScheduler>>>,
}

impl SchedulerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop and discard the current scheduler (if any), then install `scheduler`
    pub async fn init(&self, scheduler: TaskScheduler) -> Arc<TaskScheduler> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!("Stopping previous scheduler before re-initialization");
            previous.stop().await;
        }
        let scheduler = Arc::new(scheduler);
        *current = Some(Arc::clone(&scheduler));
        scheduler
    }

    pub async fn current(&self) -> Option<Arc<TaskScheduler>> {
        self.current.lock().await.clone()
    }

    /// Stop and discard the current scheduler
    pub async fn shutdown(&self) {
        if let Some(scheduler) = self.current.lock().await.take() {
            scheduler.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::clock::mocks::ManualClock;
    use chrono::NaiveDate;

    fn scheduler() -> TaskScheduler {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TaskScheduler::builder(Arc::new(ManualClock::new(start))).build()
    }

    #[tokio::test]
    async fn test_init_stops_previous_instance() {
        let slot = SchedulerSlot::new();
        let first = slot.init(scheduler()).await;
        first.start().await;
        assert!(first.is_running());

        let second = slot.init(scheduler()).await;
        assert!(!first.is_running());
        assert!(!second.is_running());
        assert!(Arc::ptr_eq(&slot.current().await.unwrap(), &second));
    }

    #[tokio::test]
    async fn test_shutdown_empties_slot() {
        let slot = SchedulerSlot::new();
        let s = slot.init(scheduler()).await;
        s.start().await;
        slot.shutdown().await;
        assert!(!s.is_running());
        assert!(slot.current().await.is_none());
    }
}
