//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use iptv_infra_sqlite::{PoolConfig, Storage};

/// Fresh migrated store in a temp dir
pub async fn open_storage(dir: &TempDir, size: usize) -> Storage {
    Storage::open(PoolConfig::new(dir.path().join("iptv.db")).with_size(size))
        .await
        .unwrap()
}

/// Open-connection counter, shareable across servers
#[derive(Default)]
pub struct ConnectionTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConnectionTracker {
    fn opened(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Most connections ever open at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Minimal HTTP/1.1 responder
///
/// Serves `script[i]` to the i-th request and repeats the last entry after
/// the script runs out. Every response closes the connection.
pub struct ScriptedServer {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    tracker: Arc<ConnectionTracker>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<(u16, &'static str)>) -> Self {
        Self::start_holding(script, Duration::ZERO, Arc::default()).await
    }

    /// Like `start`, but keeps each connection open for `hold` before replying
    pub async fn start_holding(
        script: Vec<(u16, &'static str)>,
        hold: Duration,
        tracker: Arc<ConnectionTracker>,
    ) -> Self {
        assert!(!script.is_empty());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let script = Arc::new(script);
        let connections = Arc::clone(&tracker);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = script[n.min(script.len() - 1)];
                let connections = Arc::clone(&connections);
                connections.opened();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => {
                                connections.closed();
                                return;
                            }
                            Ok(len) => read += len,
                        }
                        if read == buf.len() {
                            break;
                        }
                    }
                    if !hold.is_zero() {
                        tokio::time::sleep(hold).await;
                    }
                    let response = format!(
                        "HTTP/1.1 {status} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        reason(status),
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                    connections.closed();
                });
            }
        });

        Self {
            addr,
            hits,
            tracker,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests accepted so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn peak_connections(&self) -> usize {
        self.tracker.peak()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
