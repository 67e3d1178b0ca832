// Transport connection ceilings
//
// Separate from the concurrency gate: the gate bounds logical units, these
// bound sockets in flight, in total and per host. Every fetch attempt holds
// one permit of each from send until the body is read.

use crate::error::FetchError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Idle host entries are pruned once the map grows past this
const HOST_PRUNE_THRESHOLD: usize = 1024;

/// Held for the duration of one request
pub(crate) struct ConnectionPermit {
    _host: OwnedSemaphorePermit,
    _total: OwnedSemaphorePermit,
}

pub(crate) struct ConnectionLimits {
    total: Arc<Semaphore>,
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ConnectionLimits {
    pub(crate) fn new(total: usize, per_host: usize) -> Self {
        Self {
            total: Arc::new(Semaphore::new(total.max(1))),
            per_host: per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a host slot, then a total slot
    pub(crate) async fn acquire(&self, url: &str) -> Result<ConnectionPermit, FetchError> {
        let host = self.host_semaphore(&host_key(url));
        let host = host
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Transport("connection limiter closed".into()))?;
        let total = Arc::clone(&self.total)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Transport("connection limiter closed".into()))?;
        Ok(ConnectionPermit {
            _host: host,
            _total: total,
        })
    }

    fn host_semaphore(&self, key: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock();
        if let Some(existing) = hosts.get(key) {
            return Arc::clone(existing);
        }
        if hosts.len() >= HOST_PRUNE_THRESHOLD {
            // Only the map holds an unused entry
            hosts.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
        }
        let semaphore = Arc::new(Semaphore::new(self.per_host));
        hosts.insert(key.to_string(), Arc::clone(&semaphore));
        semaphore
    }

    #[cfg(test)]
    fn tracked_hosts(&self) -> usize {
        self.hosts.lock().len()
    }
}

/// `host:port`; unparseable URLs share one bucket and fail at send
fn host_key(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => format!(
            "{}:{}",
            parsed.host_str().unwrap_or_default(),
            parsed.port_or_known_default().unwrap_or_default()
        ),
        Err(_) => String::new(),
    }
}
