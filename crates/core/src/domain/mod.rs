// Domain Layer - Pure business logic and entities

pub mod channel;
pub mod error;
pub mod schedule;
pub mod task;

// Re-exports
pub use channel::{Category, Channel, ChannelProbe, Hotel, Multicast, TaskRun, UdpxyEndpoint};
pub use error::DomainError;
pub use schedule::{Schedule, FALLBACK_INTERVAL_MINUTES};
pub use task::{SchedulerStatus, TaskRecord, TaskSnapshot, TaskStatus};
