//! Execution engine against a local HTTP responder
//!
//! - Transient HTTP failures are retried up to the attempt limit
//! - Fan-out honors the concurrency gate and the request rate limit
//! - Direct fetches share the transport caps (total and per host)
//! - Blocking work and fallible closures route through the worker pool

mod support;

use iptv_infra_system::{ConcurrencyConfig, Engine, EngineError, FetchOptions, Method};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{ConnectionTracker, ScriptedServer};
use tokio::task::JoinSet;

fn config(retries: u32) -> ConcurrencyConfig {
    ConcurrencyConfig::default()
        .with_workers(2)
        .with_ceiling(4)
        .with_timeout(Duration::from_secs(5))
        .with_retries(retries, Duration::from_millis(10))
}

#[tokio::test]
async fn test_fetch_succeeds_on_last_allowed_attempt() {
    let server = ScriptedServer::start(vec![(503, ""), (503, ""), (200, "ok")]).await;
    let engine = Engine::open(config(3)).unwrap();

    let body = engine.fetch_text(&server.url("/list"), &FetchOptions::default()).await;
    assert_eq!(body.as_deref(), Some("ok"));
    assert_eq!(server.hits(), 3);
    engine.close().await;
}

#[tokio::test]
async fn test_fetch_gives_up_after_max_attempts() {
    let server = ScriptedServer::start(vec![(503, "")]).await;
    let engine = Engine::open(config(2)).unwrap();

    let response = engine
        .fetch(Method::GET, &server.url("/down"), &FetchOptions::default())
        .await;
    assert!(response.is_none());
    assert_eq!(server.hits(), 2);
    engine.close().await;
}

#[derive(Debug, Deserialize, PartialEq)]
struct Page {
    count: u32,
}

#[tokio::test]
async fn test_fetch_json_decode_failure_is_not_retried() {
    let good = ScriptedServer::start(vec![(200, r#"{"count": 3}"#)]).await;
    let bad = ScriptedServer::start(vec![(200, "<html>captcha</html>")]).await;
    let engine = Engine::open(config(3)).unwrap();

    let page: Option<Page> = engine.fetch_json(&good.url("/api"), &FetchOptions::default()).await;
    assert_eq!(page, Some(Page { count: 3 }));

    let page: Option<Page> = engine.fetch_json(&bad.url("/api"), &FetchOptions::default()).await;
    assert!(page.is_none());
    assert_eq!(bad.hits(), 1);
    engine.close().await;
}

#[tokio::test]
async fn test_fanout_fetches_respect_gate() {
    let server = ScriptedServer::start(vec![(200, "stream")]).await;
    let url = server.url("/probe");
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let outcome = Engine::scope(config(1), |engine| {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        async move {
            let worker = Arc::clone(&engine);
            engine
                .run_tasks(
                    0..20,
                    move |i: usize| {
                        let engine = Arc::clone(&worker);
                        let url = url.clone();
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            let body = engine.fetch_text(&url, &FetchOptions::default()).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            match body {
                                Some(body) => Ok(Some((i, body.len()))),
                                None => Err(format!("unit {i} unreachable")),
                            }
                        }
                    },
                    None,
                )
                .await
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome.succeeded, 20);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.results.iter().all(|(_, len)| *len == 6));
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(server.hits(), 20);
}

/// Issue `urls` concurrently outside `run_tasks` and count the bodies returned
async fn fetch_all(engine: &Arc<Engine>, urls: Vec<String>) -> usize {
    let mut fetches = JoinSet::new();
    for url in urls {
        let engine = Arc::clone(engine);
        fetches.spawn(async move { engine.fetch_text(&url, &FetchOptions::default()).await });
    }
    let mut fetched = 0;
    while let Some(joined) = fetches.join_next().await {
        if joined.unwrap().is_some() {
            fetched += 1;
        }
    }
    fetched
}

#[tokio::test]
async fn test_direct_fetches_cap_connections_per_host() {
    let server = ScriptedServer::start_holding(
        vec![(200, "ok")],
        Duration::from_millis(150),
        Arc::new(ConnectionTracker::default()),
    )
    .await;
    // Ceiling 4 allows 2 connections per host
    let engine = Arc::new(Engine::open(config(1)).unwrap());
    assert_eq!(engine.config().connections_per_host(), 2);

    let urls = (0..12).map(|i| server.url(&format!("/ch/{i}"))).collect();
    assert_eq!(fetch_all(&engine, urls).await, 12);
    assert_eq!(server.hits(), 12);
    assert!(server.peak_connections() <= 2, "peak {}", server.peak_connections());
}

#[tokio::test]
async fn test_direct_fetches_cap_total_connections_across_hosts() {
    let tracker = Arc::new(ConnectionTracker::default());
    let mut servers = Vec::new();
    for _ in 0..3 {
        servers.push(
            ScriptedServer::start_holding(vec![(200, "ok")], Duration::from_millis(150), Arc::clone(&tracker)).await,
        );
    }
    // 3 hosts x 2 per host would allow 6; the total ceiling is 4
    let engine = Arc::new(Engine::open(config(1)).unwrap());

    let urls = servers
        .iter()
        .flat_map(|server| (0..4).map(move |i| server.url(&format!("/hotel/{i}"))))
        .collect();
    assert_eq!(fetch_all(&engine, urls).await, 12);
    assert!(tracker.peak() <= 4, "peak {}", tracker.peak());
}

#[tokio::test]
async fn test_rate_limit_spaces_requests() {
    let server = ScriptedServer::start(vec![(204, "")]).await;
    let engine = Engine::open(config(1).with_rate_limit(Some(5))).unwrap();

    let started = Instant::now();
    for _ in 0..7 {
        assert!(engine
            .fetch(Method::GET, &server.url("/"), &FetchOptions::default())
            .await
            .is_some());
    }
    // Burst of 5, then two more tokens at 200ms each
    assert!(started.elapsed() >= Duration::from_millis(300));
    engine.close().await;
}

#[tokio::test]
async fn test_blocking_work_and_error_passthrough() {
    #[derive(Debug, PartialEq)]
    enum ParseError {
        Engine(String),
        Bad(String),
    }

    impl From<EngineError> for ParseError {
        fn from(e: EngineError) -> Self {
            ParseError::Engine(e.to_string())
        }
    }

    let engine = Engine::open(config(1)).unwrap();

    let sum = engine.run_in_thread(|| (1..=100u64).sum::<u64>()).await.unwrap();
    assert_eq!(sum, 5050);

    let parsed: Result<u32, ParseError> = engine
        .try_run_in_thread(|| "x".parse::<u32>().map_err(|e| ParseError::Bad(e.to_string())))
        .await;
    assert!(matches!(parsed, Err(ParseError::Bad(_))));

    let panicked = engine
        .run_in_thread(|| -> u32 { panic!("decoder crashed") })
        .await
        .unwrap_err();
    assert!(matches!(panicked, EngineError::WorkerPanicked(ref m) if m.contains("decoder crashed")));

    // Workers survive the panic
    assert_eq!(engine.run_in_thread(|| 7).await.unwrap(), 7);
    engine.close().await;
}
