// Proxy checker
//
// Each proxy gets its own short-lived reqwest client; the shared engine only
// contributes its concurrency gate (through `run_tasks`).

use crate::engine::{BatchOutcome, Engine, Progress};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub const DEFAULT_TARGET_URL: &str = "http://www.google.com/generate_204";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyScheme::Http),
            "https" => Ok(ProxyScheme::Https),
            "socks5" | "socks5h" => Ok(ProxyScheme::Socks5),
            other => Err(format!("unsupported proxy scheme '{other}'")),
        }
    }
}

/// `scheme://[user:pass@]host:port`; a bare `host:port` is HTTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn new(scheme: ProxyScheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Full URL including credentials
    pub fn to_url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme.as_str(),
                user,
                pass,
                self.host,
                self.port
            ),
            _ => format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port),
        }
    }
}

/// Credentials are never displayed
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.parse()?, rest),
            None => (ProxyScheme::Http, s),
        };
        let (credentials, address) = match rest.rsplit_once('@') {
            Some((creds, address)) => (Some(creds), address),
            None => (None, rest),
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in proxy '{s}'"))?;
        if host.is_empty() {
            return Err(format!("missing host in proxy '{s}'"));
        }
        let port: u16 = port
            .trim_end_matches('/')
            .parse()
            .map_err(|_| format!("invalid port in proxy '{s}'"))?;

        let mut endpoint = ProxyEndpoint::new(scheme, host, port);
        if let Some(creds) = credentials {
            let (user, pass) = creds.split_once(':').unwrap_or((creds, ""));
            endpoint.username = Some(user.to_string());
            endpoint.password = Some(pass.to_string());
        }
        Ok(endpoint)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyCheckResult {
    pub proxy: String,
    pub valid: bool,
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub bytes_read: u64,
    pub error: Option<String>,
    pub checked_at: NaiveDateTime,
}

impl ProxyCheckResult {
    fn failed(proxy: &ProxyEndpoint, error: impl Into<String>) -> Self {
        Self {
            proxy: proxy.to_string(),
            valid: false,
            status: None,
            latency_ms: 0.0,
            bytes_read: 0,
            error: Some(error.into()),
            checked_at: chrono::Local::now().naive_local(),
        }
    }
}

pub struct ProxyChecker {
    target_url: String,
    timeout: Duration,
    test_duration: Duration,
    limit: Arc<Semaphore>,
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_URL, DEFAULT_TIMEOUT, DEFAULT_TEST_DURATION, DEFAULT_MAX_CONCURRENT)
    }
}

impl ProxyChecker {
    /// # Arguments
    /// * `target_url` - URL fetched through every proxy
    /// * `timeout` - Total per-proxy request timeout
    /// * `test_duration` - How long to keep reading the body
    /// * `max_concurrent` - Proxies checked at once, on top of the engine gate
    pub fn new(
        target_url: impl Into<String>,
        timeout: Duration,
        test_duration: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            timeout,
            test_duration,
            limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Fetch the target through `proxy` and measure it
    pub async fn check(&self, proxy: &ProxyEndpoint) -> ProxyCheckResult {
        let client = match reqwest::Proxy::all(proxy.to_url()).and_then(|p| {
            reqwest::Client::builder()
                .proxy(p)
                .timeout(self.timeout)
                .connect_timeout(self.timeout)
                .build()
        }) {
            Ok(client) => client,
            Err(e) => return ProxyCheckResult::failed(proxy, e.to_string()),
        };

        let started = Instant::now();
        let mut response = match client.get(&self.target_url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(proxy = %proxy, error = %e, "Proxy request failed");
                return ProxyCheckResult::failed(proxy, e.to_string());
            }
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = response.status();
        if !status.is_success() {
            let mut result = ProxyCheckResult::failed(proxy, format!("HTTP {}", status.as_u16()));
            result.status = Some(status.as_u16());
            result.latency_ms = latency_ms;
            return result;
        }

        let deadline = started + self.test_duration;
        let mut bytes_read = 0u64;
        let mut error = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, response.chunk()).await {
                Ok(Ok(Some(chunk))) => bytes_read += chunk.len() as u64,
                Ok(Ok(None)) | Err(_) => break,
                Ok(Err(e)) => {
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        ProxyCheckResult {
            proxy: proxy.to_string(),
            valid: error.is_none(),
            status: Some(status.as_u16()),
            latency_ms,
            bytes_read,
            error,
            checked_at: chrono::Local::now().naive_local(),
        }
    }

    /// Check every proxy concurrently; results arrive in completion order
    pub async fn check_all(
        self: &Arc<Self>,
        engine: &Engine,
        proxies: Vec<ProxyEndpoint>,
        progress: Option<Progress>,
    ) -> BatchOutcome<ProxyCheckResult> {
        let total = proxies.len();
        let checker = Arc::clone(self);
        let outcome = engine
            .run_tasks(
                proxies,
                move |proxy| {
                    let checker = Arc::clone(&checker);
                    async move {
                        let _slot = checker.limit.acquire().await.ok();
                        Ok::<_, Infallible>(Some(checker.check(&proxy).await))
                    }
                },
                progress,
            )
            .await;

        let valid = outcome.results.iter().filter(|r| r.valid).count();
        info!(total, valid, "Proxy check finished");
        outcome
    }
}
