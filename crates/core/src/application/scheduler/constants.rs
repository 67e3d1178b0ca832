// Scheduler constants (no magic values)
use std::time::Duration;

/// How often the loop looks for due tasks (60s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on waiting for the loop to exit during stop (5s)
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll step used while draining in-flight executions (50ms)
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
