// Clock Port (for testability)

use chrono::NaiveDateTime;

/// Wall-clock provider; schedules are evaluated in naive local time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// System clock (production)
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Mock implementations for testing
pub mod mocks {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;

    /// Manually driven clock
    pub struct ManualClock {
        now: Mutex<NaiveDateTime>,
    }

    impl ManualClock {
        pub fn new(start: NaiveDateTime) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn set(&self, at: NaiveDateTime) {
            *self.now.lock() = at;
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock()
        }
    }
}
