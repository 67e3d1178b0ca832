// TCP reachability probe

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct PortProbe {
    timeout: Duration,
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// True when a TCP connection to `host:port` opens within the timeout
    pub async fn check(&self, host: &str, port: u16) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host = %host, port, error = %e, "Port closed");
                false
            }
            Err(_) => {
                debug!(host = %host, port, timeout_ms = self.timeout.as_millis() as u64, "Port probe timed out");
                false
            }
        }
    }
}
