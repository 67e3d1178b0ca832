// IPTV Harvest Infrastructure - System Adapters
// Implements: execution engine, blocking worker pool, rate limiter, stream/port/proxy probes

pub mod engine;
mod error;
pub mod port_probe;
pub mod proxy_checker;
pub mod rate_limiter;
pub mod stream_probe;

pub use engine::{
    BatchOutcome, ConcurrencyConfig, Engine, EngineError, FetchError, FetchOptions, FetchedResponse,
    Method, Progress,
};
pub use port_probe::PortProbe;
pub use proxy_checker::{ProxyCheckResult, ProxyChecker, ProxyEndpoint, ProxyScheme};
pub use rate_limiter::RateLimiter;
pub use stream_probe::{ProbeError, StreamProbe, VideoInfo};
