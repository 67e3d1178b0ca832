// Stream probe: ffprobe / ffmpeg wrappers
//
// All process work here is blocking and must run through
// `Engine::run_in_thread`; the async methods below do exactly that. Child
// output is spooled to anonymous temp files so the calling worker is the
// only thread involved.

use crate::engine::{Engine, EngineError};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Poll interval of the kill-on-timeout wait loop
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extra time granted to ffmpeg beyond its sampling window
const SPEED_GRACE: Duration = Duration::from_secs(10);

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SPEED_SAMPLE_SECS: u32 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("No usable video stream: {0}")]
    Unparseable(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Resolution and frame rate of the first video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: i64,
    pub height: i64,
    pub frame: f64,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    r_frame_rate: Option<String>,
}

struct CommandOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// ffprobe/ffmpeg front end
#[derive(Debug, Clone)]
pub struct StreamProbe {
    ffprobe: String,
    ffmpeg: String,
    probe_timeout: Duration,
    speed_sample_secs: u32,
}

impl Default for StreamProbe {
    fn default() -> Self {
        Self::new("ffprobe", "ffmpeg")
    }
}

impl StreamProbe {
    pub fn new(ffprobe: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            speed_sample_secs: DEFAULT_SPEED_SAMPLE_SECS,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_speed_sample(mut self, seconds: u32) -> Self {
        self.speed_sample_secs = seconds.max(1);
        self
    }

    /// Both binaries answer `-version`
    pub fn is_available_blocking(&self) -> bool {
        [&self.ffprobe, &self.ffmpeg].iter().all(|program| {
            match run_command(program, &["-version"], Duration::from_secs(5)) {
                Ok(output) => output.status.success(),
                Err(e) => {
                    warn!(program = %program, error = %e, "Media tool not available");
                    false
                }
            }
        })
    }

    /// Width, height and frame rate of `url`'s first video stream
    pub fn probe_video_blocking(&self, url: &str) -> Result<VideoInfo, ProbeError> {
        let output = run_command(
            &self.ffprobe,
            &["-print_format", "json", "-show_format", "-show_streams", "-v", "quiet", url],
            self.probe_timeout,
        )?;
        parse_video_info(&String::from_utf8_lossy(&output.stdout))
    }

    /// Average ffmpeg decode speed over the sampling window; 0.0 when unplayable
    pub fn measure_speed_blocking(&self, url: &str) -> Result<f64, ProbeError> {
        let sample = self.speed_sample_secs.to_string();
        let output = run_command(
            &self.ffmpeg,
            &["-i", url, "-t", &sample, "-f", "null", "-"],
            Duration::from_secs(u64::from(self.speed_sample_secs)) + SPEED_GRACE,
        )?;
        Ok(parse_speed(&String::from_utf8_lossy(&output.stderr)))
    }

    pub async fn is_available(&self, engine: &Engine) -> bool {
        let probe = self.clone();
        engine
            .run_in_thread(move || probe.is_available_blocking())
            .await
            .unwrap_or(false)
    }

    pub async fn probe_video(&self, engine: &Engine, url: &str) -> Result<VideoInfo, ProbeError> {
        let probe = self.clone();
        let url = url.to_string();
        engine
            .try_run_in_thread(move || probe.probe_video_blocking(&url))
            .await
    }

    pub async fn measure_speed(&self, engine: &Engine, url: &str) -> Result<f64, ProbeError> {
        let probe = self.clone();
        let url = url.to_string();
        engine
            .try_run_in_thread(move || probe.measure_speed_blocking(&url))
            .await
    }
}

/// Extract the first video stream from ffprobe JSON
///
/// Streams without a `codec_type` are accepted; zero width, height or frame
/// rate is rejected.
pub fn parse_video_info(json: &str) -> Result<VideoInfo, ProbeError> {
    let parsed: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Unparseable(e.to_string()))?;

    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref().map_or(true, |t| t == "video"))
        .ok_or_else(|| ProbeError::Unparseable("no video stream".into()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    let frame = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    if width <= 0 || height <= 0 || frame <= 0.0 {
        return Err(ProbeError::Unparseable(format!(
            "width={width} height={height} frame={frame}"
        )));
    }
    Ok(VideoInfo { width, height, frame })
}

/// Parse "num/den" (or a plain number) into frames per second
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Average every `speed=…x` sample in ffmpeg's stderr
///
/// Rounded to two decimals and floored at 1.00 when any sample exists;
/// 0.00 otherwise.
pub fn parse_speed(stderr: &str) -> f64 {
    let samples: Vec<f64> = stderr
        .split("speed=")
        .skip(1)
        .filter_map(|rest| rest.split_once('x'))
        .filter_map(|(value, _)| value.trim().parse::<f64>().ok())
        .collect();

    if samples.is_empty() {
        return 0.0;
    }
    let average = samples.iter().sum::<f64>() / samples.len() as f64;
    ((average * 100.0).round() / 100.0).max(1.0)
}

/// Anonymous spool file plus the child's handle to it
fn spool() -> Result<(File, Stdio), ProbeError> {
    let file = tempfile::tempfile().map_err(|e| ProbeError::Io(e.to_string()))?;
    let child_end = file.try_clone().map_err(|e| ProbeError::Io(e.to_string()))?;
    Ok((file, Stdio::from(child_end)))
}

fn read_spool(mut file: File) -> Result<Vec<u8>, ProbeError> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut buf))
        .map_err(|e| ProbeError::Io(e.to_string()))?;
    Ok(buf)
}

/// Run a child process, killing it if it outlives `timeout`
fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ProbeError> {
    debug!(program = %program, args = ?args, timeout_ms = timeout.as_millis() as u64, "Spawning process");

    let (stdout, stdout_sink) = spool()?;
    let (stderr, stderr_sink) = spool()?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout_sink)
        .stderr(stderr_sink)
        .spawn()
        .map_err(|e| ProbeError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    let started = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                info!(program = %program, pid = child.id(), "Process timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(None) => std::thread::sleep(WAIT_POLL_INTERVAL),
            Err(e) => return Err(ProbeError::Io(e.to_string())),
        }
    };

    Ok(CommandOutput {
        status,
        stdout: read_spool(stdout)?,
        stderr: read_spool(stderr)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_info_picks_video_stream() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "r_frame_rate": "0/0"},
                {"codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "50/1"}
            ],
            "format": {"format_name": "mpegts"}
        }"#;
        let info = parse_video_info(json).unwrap();
        assert_eq!(info, VideoInfo { width: 1920, height: 1080, frame: 50.0 });
    }

    #[test]
    fn test_parse_video_info_rejects_zero_values() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 0, "height": 720, "r_frame_rate": "25/1"}]}"#;
        assert!(matches!(parse_video_info(json), Err(ProbeError::Unparseable(_))));

        let no_rate = r#"{"streams": [{"width": 1280, "height": 720, "r_frame_rate": "0/0"}]}"#;
        assert!(parse_video_info(no_rate).is_err());

        assert!(parse_video_info("{}").is_err());
        assert!(parse_video_info("").is_err());
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_speed_averages_samples() {
        let stderr = "frame=  100 fps=50 size=N/A time=00:00:02.00 bitrate=N/A speed=1.5x\r\
                      frame=  200 fps=50 size=N/A time=00:00:04.00 bitrate=N/A speed=2.5x\r";
        assert_eq!(parse_speed(stderr), 2.0);
    }

    #[test]
    fn test_parse_speed_floor_and_empty() {
        assert_eq!(parse_speed("speed=0.4x"), 1.0);
        assert_eq!(parse_speed("Connection refused"), 0.0);
        assert_eq!(parse_speed("speed=N/Ax"), 0.0);
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let err = run_command("definitely-not-ffprobe-xyz", &["-version"], Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_process_is_killed_on_timeout() {
        let started = Instant::now();
        let err = run_command("sleep", &["5"], Duration::from_millis(200)).err().unwrap();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_beyond_pipe_capacity_is_captured() {
        // Far more than a 64 KiB pipe buffer on both streams; nothing drains
        // them while the child runs
        let script = "head -c 300000 /dev/zero | tr '\\0' v >&2; head -c 200000 /dev/zero | tr '\\0' s; echo";
        let output = run_command("sh", &["-c", script], Duration::from_secs(10)).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stderr.len(), 300_000);
        assert!(output.stderr.iter().all(|b| *b == b'v'));
        assert_eq!(output.stdout.len(), 200_001);
    }

    #[tokio::test]
    async fn test_unavailable_tools_report_false() {
        let engine = Engine::open(crate::engine::ConcurrencyConfig::default().with_workers(1)).unwrap();
        let probe = StreamProbe::new("no-such-ffprobe-bin", "no-such-ffmpeg-bin");
        assert!(!probe.is_available(&engine).await);
        let err = probe.probe_video(&engine, "http://127.0.0.1:9/live.ts").await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
        engine.close().await;
    }
}
