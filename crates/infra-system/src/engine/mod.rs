// Bounded-concurrency execution engine
//
// One HTTP client, one concurrency gate and one blocking worker pool shared
// by every collaborator. Network fan-out runs as tokio tasks that each hold a
// gate permit; blocking calls (ffprobe, ffmpeg, decoding) go to the worker
// pool and never touch the async executor. Requests additionally hold a
// transport slot (total and per host) while their connection is open.

mod batch;
mod blocking_pool;
mod config;
mod connection_limits;

pub use crate::error::{EngineError, FetchError};
pub use batch::BatchOutcome;
pub use blocking_pool::BlockingPool;
pub use config::{ConcurrencyConfig, DEFAULT_USER_AGENT, MAX_CONCURRENCY_CEILING, MAX_WORKERS};
pub use reqwest::Method;

use crate::rate_limiter::RateLimiter;
use connection_limits::ConnectionLimits;
use iptv_core::application::{panic_message, RetryPolicy};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// TCP connect timeout for every request
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keepalive interval for pooled connections
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Progress callback: `(completed, total)` after every finished unit
pub type Progress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    pub form: Vec<(String, String)>,
    /// Overrides the engine-wide total timeout
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful (2xx) response with its body fully read
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
}

pub struct Engine {
    config: ConcurrencyConfig,
    client: reqwest::Client,
    gate: Arc<Semaphore>,
    connections: ConnectionLimits,
    blocking: BlockingPool,
    retry: RetryPolicy,
    limiter: Option<RateLimiter>,
}

impl Engine {
    /// Build the HTTP client, concurrency gate and blocking worker pool
    pub fn open(config: ConcurrencyConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.connections_per_host())
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EngineError::Client(e.to_string()))?;

        let blocking = BlockingPool::new(config.max_workers)?;
        let limiter = config.requests_per_second.map(RateLimiter::per_second);

        info!(
            workers = config.max_workers,
            ceiling = config.concurrency_ceiling,
            per_host = config.connections_per_host(),
            max_retries = config.max_retries,
            rate_limit = ?config.requests_per_second,
            "Execution engine opened"
        );

        Ok(Self {
            gate: Arc::new(Semaphore::new(config.concurrency_ceiling)),
            connections: ConnectionLimits::new(config.concurrency_ceiling, config.connections_per_host()),
            retry: RetryPolicy::new(config.max_retries, config.retry_delay),
            client,
            blocking,
            limiter,
            config,
        })
    }

    /// Run `f` with a fresh engine and tear it down afterwards
    ///
    /// Teardown joins the worker threads when the closure has released every
    /// clone of the engine; otherwise the last clone's drop closes the pool.
    ///
    /// # Example
    /// ```text
    /// let channels = Engine::scope(config, |engine| async move {
    ///     engine.fetch_text("http://example.com/list.txt", &FetchOptions::default()).await
    /// })
    /// .await?;
    /// ```
    pub async fn scope<F, Fut, T>(config: ConcurrencyConfig, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<Engine>) -> Fut,
        Fut: Future<Output = T>,
    {
        let engine = Arc::new(Engine::open(config)?);
        let value = f(Arc::clone(&engine)).await;
        match Arc::try_unwrap(engine) {
            Ok(engine) => engine.close().await,
            Err(_) => warn!("Engine still shared at scope exit, deferring teardown to last owner"),
        }
        Ok(value)
    }

    /// Join the blocking workers; the HTTP client is dropped with `self`
    pub async fn close(self) {
        self.blocking.shutdown().await;
        info!("Execution engine closed");
    }

    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    /// Shared concurrency gate for collaborators with their own clients
    pub fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.gate)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Request `url`, retrying transient failures
    ///
    /// Non-2xx statuses, transport errors and body-read errors are retried
    /// up to `max_retries` attempts in total. Exhaustion is logged and
    /// returned as `None`.
    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        options: &FetchOptions,
    ) -> Option<FetchedResponse> {
        self.retry
            .retry_async(url, |_attempt| {
                let method = method.clone();
                async move { self.fetch_once(method, url, options).await }
            })
            .await
    }

    async fn fetch_once(
        &self,
        method: Method,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchedResponse, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let mut request = self.client.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.json {
            request = request.json(body);
        } else if !options.form.is_empty() {
            request = request.form(&options.form);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let _slot = self.connections.acquire(url).await?;
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(FetchedResponse {
            status: status.as_u16(),
            final_url,
            body: body.to_vec(),
        })
    }

    /// GET `url` and decode the body as UTF-8
    pub async fn fetch_text(&self, url: &str, options: &FetchOptions) -> Option<String> {
        let response = self.fetch(Method::GET, url, options).await?;
        decode(url, String::from_utf8(response.body))
    }

    /// GET `url` and decode the body as JSON
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str, options: &FetchOptions) -> Option<T> {
        let response = self.fetch(Method::GET, url, options).await?;
        decode(url, serde_json::from_slice(&response.body))
    }

    /// GET `url` and return the raw body
    pub async fn fetch_binary(&self, url: &str, options: &FetchOptions) -> Option<Vec<u8>> {
        self.fetch(Method::GET, url, options)
            .await
            .map(|response| response.body)
    }

    /// Run `handler` once per item, concurrently, bounded by the gate
    ///
    /// Every unit takes a gate permit before starting. Results arrive in
    /// completion order; `Ok(None)` is counted as skipped, errors and panics
    /// as failed. Dropping the returned future aborts unfinished units.
    ///
    /// # Arguments
    /// * `items` - One unit per item
    /// * `handler` - Async unit of work
    /// * `progress` - Called with `(completed, total)` after each unit
    pub async fn run_tasks<I, T, R, E, F, Fut>(
        &self,
        items: I,
        handler: F,
        progress: Option<Progress>,
    ) -> BatchOutcome<R>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<R>, E>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut units = JoinSet::new();
        for item in items {
            let gate = Arc::clone(&self.gate);
            let handler = Arc::clone(&handler);
            units.spawn(async move {
                let _permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|_| "concurrency gate closed".to_string())?;
                handler(item).await.map_err(|e| e.to_string())
            });
        }

        let total = units.len();
        let mut outcome = BatchOutcome::with_capacity(total);
        let mut completed = 0;

        while let Some(joined) = units.join_next().await {
            completed += 1;
            match joined {
                Ok(Ok(Some(value))) => {
                    outcome.results.push(value);
                    outcome.succeeded += 1;
                }
                Ok(Ok(None)) => outcome.skipped += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "Task failed");
                    outcome.failed += 1;
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        panic_message(&*join_error.into_panic())
                    } else {
                        join_error.to_string()
                    };
                    warn!(error = %reason, "Task panicked");
                    outcome.failed += 1;
                }
            }
            if let Some(progress) = &progress {
                progress(completed, total);
            }
        }

        debug!(
            total,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "Fan-out finished"
        );
        outcome
    }

    /// Hand items to `handler` in sequential chunks
    ///
    /// A failing chunk is logged and its items counted as failed; later
    /// chunks still run. `batch_size` 0 uses the configured batch size.
    pub async fn run_batched<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        batch_size: usize,
        mut handler: F,
    ) -> BatchOutcome<R>
    where
        E: Display,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>>,
    {
        let batch_size = if batch_size == 0 {
            self.config.batch_size.max(1)
        } else {
            batch_size
        };
        let mut outcome = BatchOutcome::with_capacity(items.len());
        let mut remaining = items.into_iter();
        let mut batch_index = 0;

        loop {
            let chunk: Vec<T> = remaining.by_ref().take(batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();
            match handler(chunk).await {
                Ok(results) => {
                    outcome.succeeded += results.len();
                    outcome.skipped += chunk_len.saturating_sub(results.len());
                    outcome.results.extend(results);
                }
                Err(e) => {
                    warn!(batch = batch_index, size = chunk_len, error = %e, "Batch failed");
                    outcome.failed += chunk_len;
                }
            }
            batch_index += 1;
        }
        outcome
    }

    /// Run a blocking closure on the worker pool
    pub async fn run_in_thread<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.blocking.run(f).await
    }

    /// Run a fallible blocking closure; its own error passes straight through
    pub async fn try_run_in_thread<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<EngineError> + Send + 'static,
    {
        self.blocking.run(f).await?
    }
}

fn decode<T, E: Display>(url: &str, decoded: Result<T, E>) -> Option<T> {
    match decoded {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(url = %url, error = %FetchError::Decode(e.to_string()), "Response not decodable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_config() -> ConcurrencyConfig {
        ConcurrencyConfig::default()
            .with_workers(2)
            .with_ceiling(3)
            .with_retries(2, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_run_tasks_counts_failures_skips_and_panics() {
        let engine = Engine::open(small_config()).unwrap();
        let outcome = engine
            .run_tasks(
                0..10u32,
                |n| async move {
                    match n {
                        3 => Err(format!("item {n} broke")),
                        5 => Ok(None),
                        7 => panic!("item {n} exploded"),
                        _ => Ok(Some(n * 2)),
                    }
                },
                None,
            )
            .await;

        assert_eq!(outcome.succeeded, 7);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.skipped, 1);
        let mut results = outcome.into_results();
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 8, 12, 16, 18]);
        engine.close().await;
    }

    #[tokio::test]
    async fn test_run_tasks_respects_gate_and_reports_progress() {
        let engine = Engine::open(small_config()).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let seen = Arc::clone(&calls);
        let progress: Progress = Arc::new(move |completed, total| {
            assert!(completed <= total);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = engine
            .run_tasks(
                0..12,
                move |_| {
                    let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(Some(()))
                    }
                },
                Some(progress),
            )
            .await;

        assert_eq!(outcome.succeeded, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_run_tasks_empty_input() {
        let engine = Engine::open(small_config()).unwrap();
        let outcome = engine
            .run_tasks(Vec::<u8>::new(), |_| async { Ok::<Option<u8>, String>(None) }, None)
            .await;
        assert_eq!(outcome.total(), 0);
    }

    #[tokio::test]
    async fn test_run_batched_skips_failing_chunk() {
        let engine = Engine::open(small_config()).unwrap();
        let outcome = engine
            .run_batched((0..7).collect(), 3, |chunk: Vec<i32>| async move {
                if chunk.contains(&4) {
                    Err("chunk rejected")
                } else {
                    Ok(chunk)
                }
            })
            .await;

        assert_eq!(outcome.results, vec![0, 1, 2, 6]);
        assert_eq!(outcome.succeeded, 4);
        assert_eq!(outcome.failed, 3);
    }

    #[tokio::test]
    async fn test_run_in_thread_propagates_errors_and_panics() {
        let engine = Engine::open(small_config()).unwrap();

        assert_eq!(engine.run_in_thread(|| 40 + 2).await.unwrap(), 42);

        let err = engine.run_in_thread(|| -> () { panic!("ffprobe wedged") }).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkerPanicked(ref m) if m.contains("ffprobe wedged")));

        #[derive(Debug, PartialEq)]
        enum ProbeFailure {
            Unparseable,
            Engine,
        }
        impl From<EngineError> for ProbeFailure {
            fn from(_: EngineError) -> Self {
                ProbeFailure::Engine
            }
        }
        let err = engine
            .try_run_in_thread(|| Err::<u32, _>(ProbeFailure::Unparseable))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeFailure::Unparseable);
        engine.close().await;
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_degrades_to_none() {
        let config = small_config()
            .with_retries(2, Duration::from_millis(1))
            .with_timeout(Duration::from_secs(2));
        let engine = Engine::open(config).unwrap();
        // Port 9 on loopback is closed in test environments
        assert!(engine
            .fetch_text("http://127.0.0.1:9/", &FetchOptions::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_scope_tears_down_engine() {
        let value = Engine::scope(small_config(), |engine| async move {
            engine.run_in_thread(|| "done").await
        })
        .await
        .unwrap();
        assert_eq!(value.unwrap(), "done");
    }
}
