//! Network and media probes end to end
//!
//! - Proxy validation through a local HTTP proxy stand-in
//! - TCP reachability checks fanned out through the engine
//! - Stream probing against stand-in ffprobe/ffmpeg executables

mod support;

use iptv_infra_system::{
    ConcurrencyConfig, Engine, PortProbe, ProbeError, Progress, ProxyChecker, ProxyEndpoint,
    ProxyScheme, StreamProbe,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::ScriptedServer;
use tokio::net::TcpListener;

fn engine() -> Engine {
    Engine::open(
        ConcurrencyConfig::default()
            .with_workers(2)
            .with_ceiling(8)
            .with_retries(1, Duration::from_millis(10)),
    )
    .unwrap()
}

fn checker() -> Arc<ProxyChecker> {
    Arc::new(ProxyChecker::new(
        // Never resolved: the proxy answers on the target's behalf
        "http://target.invalid/generate_204",
        Duration::from_secs(3),
        Duration::from_secs(1),
        4,
    ))
}

#[tokio::test]
async fn test_http_proxy_is_valid_and_measured() {
    let proxy = ScriptedServer::start(vec![(200, "hello")]).await;
    let endpoint: ProxyEndpoint = proxy.addr.to_string().parse().unwrap();
    assert_eq!(endpoint.scheme, ProxyScheme::Http);

    let result = checker().check(&endpoint).await;
    assert!(result.valid, "unexpected error: {:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.bytes_read, 5);
    assert!(result.latency_ms >= 0.0);
    assert_eq!(proxy.hits(), 1);
}

#[tokio::test]
async fn test_proxy_error_status_is_invalid() {
    let proxy = ScriptedServer::start(vec![(503, "")]).await;
    let endpoint: ProxyEndpoint = format!("http://{}", proxy.addr).parse().unwrap();

    let result = checker().check(&endpoint).await;
    assert!(!result.valid);
    assert_eq!(result.status, Some(503));
    assert_eq!(result.error.as_deref(), Some("HTTP 503"));
}

#[tokio::test]
async fn test_check_all_mixes_live_and_dead_proxies() {
    let live = ScriptedServer::start(vec![(200, "ok")]).await;
    let proxies: Vec<ProxyEndpoint> = vec![
        live.addr.to_string().parse().unwrap(),
        "127.0.0.1:9".parse().unwrap(),
        format!("http://{}", live.addr).parse().unwrap(),
    ];

    let engine = engine();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let progress: Progress = Arc::new(move |done, total| {
        assert!(done <= total);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let outcome = checker().check_all(&engine, proxies, Some(progress)).await;

    // Every proxy yields a result, valid or not
    assert_eq!(outcome.succeeded, 3);
    assert_eq!(outcome.results.iter().filter(|r| r.valid).count(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    engine.close().await;
}

#[tokio::test]
async fn test_port_checks_fan_out() {
    let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open_port = open.local_addr().unwrap().port();
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let engine = engine();
    let probe = PortProbe::new(Duration::from_secs(2));
    let outcome = engine
        .run_tasks(
            vec![open_port, closed_port, open_port],
            move |port: u16| async move {
                Ok::<_, String>(Some((port, probe.check("127.0.0.1", port).await)))
            },
            None,
        )
        .await;

    let online = outcome.results.iter().filter(|(_, up)| *up).count();
    assert_eq!(outcome.succeeded, 3);
    assert_eq!(online, 2);
    assert!(outcome
        .results
        .iter()
        .all(|(port, up)| *up == (*port == open_port)));
    engine.close().await;
}

#[cfg(unix)]
mod media {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    const FFPROBE_JSON: &str = r#"{"streams":[{"codec_type":"audio"},{"codec_type":"video","width":1920,"height":1080,"r_frame_rate":"50/2"}],"format":{}}"#;

    fn write_tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn stand_in_tools(dir: &TempDir, ffprobe_body: &str) -> StreamProbe {
        let ffprobe = write_tool(dir.path(), "ffprobe", ffprobe_body);
        let ffmpeg = write_tool(
            dir.path(),
            "ffmpeg",
            "echo 'frame=  50 fps= 25 speed=1.20x' >&2\necho 'frame= 100 fps= 25 speed=1.60x' >&2",
        );
        StreamProbe::new(ffprobe, ffmpeg)
            .with_probe_timeout(Duration::from_secs(5))
            .with_speed_sample(1)
    }

    #[tokio::test]
    async fn test_probe_and_speed_through_engine() {
        let dir = TempDir::new().unwrap();
        let probe = stand_in_tools(&dir, &format!("echo '{FFPROBE_JSON}'"));
        let engine = engine();

        assert!(probe.is_available(&engine).await);
        let info = probe.probe_video(&engine, "http://src/1.m3u8").await.unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.frame, 25.0);

        let speed = probe.measure_speed(&engine, "http://src/1.m3u8").await.unwrap();
        assert_eq!(speed, 1.4);
        engine.close().await;
    }

    #[tokio::test]
    async fn test_unplayable_stream_is_unparseable() {
        let dir = TempDir::new().unwrap();
        let probe = stand_in_tools(&dir, "echo '{\"streams\":[]}'");
        let engine = engine();

        let err = probe.probe_video(&engine, "http://src/dead").await.unwrap_err();
        assert!(matches!(err, ProbeError::Unparseable(_)));
        engine.close().await;
    }

    #[tokio::test]
    async fn test_hung_probe_times_out() {
        let dir = TempDir::new().unwrap();
        let probe = stand_in_tools(&dir, "sleep 5")
            .with_probe_timeout(Duration::from_millis(200));
        let engine = engine();

        let err = probe.probe_video(&engine, "http://src/hang").await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        engine.close().await;
    }
}
