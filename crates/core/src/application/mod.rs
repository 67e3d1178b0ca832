// Application Layer - Use Cases and Business Logic

pub mod cache;
pub mod panic_guard;
pub mod retry;
pub mod scheduler;
pub mod slot;

// Re-exports
pub use cache::BoundedCache;
pub use panic_guard::{execute_guarded, panic_message};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{TaskScheduler, TaskSchedulerBuilder};
pub use slot::SchedulerSlot;
