//! Stream Probing Service
//!
//! Runs ffprobe against a stream URL to extract quality metrics, and ffmpeg's
//! `blackdetect` filter to decide whether the picture is predominantly black.
//! Both run under a hard deadline; the child process is killed when it
//! expires.

use async_trait::async_trait;
use regex::Regex;
use std::process::{Output, Stdio};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ProbingConfig;
use crate::errors::ProbeError;
use crate::models::ProbeMetrics;

static BLACK_DURATION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"black_duration:\s*([\d.]+)").ok());

/// Seam between the probe engine and the external media tools
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Extract quality metrics from a stream
    async fn probe(&self, url: &str) -> Result<ProbeMetrics, ProbeError>;

    /// Sample `sample_seconds` of video and report whether it is black
    async fn detect_black_screen(&self, url: &str, sample_seconds: u64) -> Result<bool, ProbeError>;
}

/// ffprobe/ffmpeg subprocess implementation of [`MediaProber`]
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_command: String,
    ffmpeg_command: String,
    probe_timeout: Duration,
}

impl FfprobeProber {
    pub fn new(config: &ProbingConfig) -> Self {
        Self {
            ffprobe_command: config.ffprobe_command.clone(),
            ffmpeg_command: config.ffmpeg_command.clone(),
            probe_timeout: config.probe_timeout,
        }
    }

    async fn run(&self, mut cmd: Command, program: &str, deadline: Duration) -> Result<Output, ProbeError> {
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        match tokio::time::timeout(deadline, cmd.output()).await {
            Err(_) => Err(ProbeError::Timeout {
                seconds: deadline.as_secs(),
            }),
            Ok(Err(e)) => Err(ProbeError::Spawn {
                command: program.to_string(),
                message: e.to_string(),
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, url: &str) -> Result<ProbeMetrics, ProbeError> {
        debug!("Probing stream: {}", url);

        let mut cmd = Command::new(&self.ffprobe_command);
        cmd.args([
            "-v", "error",
            "-print_format", "json",
            "-show_error",
            "-show_entries", "stream=codec_type,codec_name,width,height,avg_frame_rate,r_frame_rate,bit_rate,channels:format=bit_rate",
            "-analyzeduration", "5000000",
            "-probesize", "5000000",
            url,
        ]);

        let output = self
            .run(cmd, &self.ffprobe_command, self.probe_timeout)
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ExitStatus {
                code: output.status.code(),
                message: first_line_or(&stderr, "ffprobe produced no output"),
            });
        }

        let data: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| ProbeError::MalformedOutput(format!("invalid ffprobe JSON: {e}")))?;

        let metrics = parse_probe_output(&data)?;
        debug!(
            "Probed {}: resolution={:?} bitrate={:?}kbps fps={:?}",
            url, metrics.resolution, metrics.bitrate, metrics.fps
        );
        Ok(metrics)
    }

    async fn detect_black_screen(&self, url: &str, sample_seconds: u64) -> Result<bool, ProbeError> {
        let mut cmd = Command::new(&self.ffmpeg_command);
        cmd.args([
            "-hide_banner",
            "-nostats",
            "-t",
            &sample_seconds.to_string(),
            "-i",
            url,
            "-vf",
            "blackdetect=d=0.1:pix_th=0.10",
            "-an",
            "-f",
            "null",
            "-",
        ]);

        // Reading `sample_seconds` of live video takes at least that long
        let deadline = self.probe_timeout + Duration::from_secs(sample_seconds);
        let output = match self.run(cmd, &self.ffmpeg_command, deadline).await {
            Ok(output) => output,
            Err(e) if e.is_timeout() => {
                warn!(%url, "Black screen detection timed out, treating as not black");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                code: output.status.code(),
                message: first_line_or(&stderr, "ffmpeg blackdetect failed"),
            });
        }

        let black_ms = sum_black_millis(&stderr);
        debug!(
            "Black screen sample for {}: {}ms black of {}s",
            url, black_ms, sample_seconds
        );
        Ok(is_predominantly_black(
            black_ms,
            sample_seconds.saturating_mul(1000),
        ))
    }
}

/// Parse ffprobe JSON output into metrics
pub fn parse_probe_output(data: &serde_json::Value) -> Result<ProbeMetrics, ProbeError> {
    if let Some(error) = data.get("error") {
        let message = error
            .get("string")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown ffprobe error")
            .to_string();
        let code = error.get("code").and_then(|v| v.as_i64()).map(|v| v as i32);
        return Err(ProbeError::ExitStatus { code, message });
    }

    let streams = data
        .get("streams")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let of_type = |kind: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some(kind))
    };
    let video = of_type("video");
    let audio = of_type("audio");

    if video.is_none() && audio.is_none() {
        return Err(ProbeError::MalformedOutput(
            "no audio or video streams found".to_string(),
        ));
    }

    let mut metrics = ProbeMetrics::default();

    if let Some(video) = video {
        let width = video.get("width").and_then(|v| v.as_u64());
        let height = video.get("height").and_then(|v| v.as_u64());
        if let (Some(w), Some(h)) = (width, height) {
            if w > 0 && h > 0 {
                metrics.resolution = Some(format!("{w}x{h}"));
            }
        }
        metrics.fps = ["avg_frame_rate", "r_frame_rate"]
            .iter()
            .filter_map(|key| video.get(*key).and_then(|v| v.as_str()))
            .find_map(parse_frame_rate);
        metrics.video_bitrate = bitrate_kbps(video.get("bit_rate"));
        metrics.video_codec = video
            .get("codec_name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
    }

    if let Some(audio) = audio {
        metrics.audio_channels = audio
            .get("channels")
            .and_then(|v| v.as_u64())
            .map(|c| c as u32);
        metrics.audio_codec = audio
            .get("codec_name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
    }

    metrics.bitrate = bitrate_kbps(data.get("format").and_then(|f| f.get("bit_rate")))
        .or(metrics.video_bitrate);

    Ok(metrics)
}

/// ffprobe reports bitrates as strings of bits per second
fn bitrate_kbps(value: Option<&serde_json::Value>) -> Option<u64> {
    let bps = match value? {
        serde_json::Value::String(s) => s.parse::<u64>().ok()?,
        serde_json::Value::Number(n) => n.as_u64()?,
        _ => return None,
    };
    (bps > 0).then_some(bps / 1000)
}

/// Parse "30000/1001" or "25" into frames per second, rounded to 2 decimals
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then(|| (fps * 100.0).round() / 100.0)
}

/// Total milliseconds of black reported by `blackdetect` in ffmpeg's stderr
///
/// Each interval is rounded to whole milliseconds before summing so the
/// threshold comparison is exact.
pub fn sum_black_millis(stderr: &str) -> u64 {
    let Some(re) = BLACK_DURATION_RE.as_ref() else {
        return 0;
    };
    re.captures_iter(stderr)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite())
        .map(|seconds| (seconds * 1000.0).round() as u64)
        .sum()
}

/// Black when the black intervals cover strictly more than 90% of the sample
pub fn is_predominantly_black(black_ms: u64, sample_ms: u64) -> bool {
    sample_ms > 0 && u128::from(black_ms) * 10 > u128::from(sample_ms) * 9
}

fn first_line_or(text: &str, fallback: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_probe_output_success() {
        let data = serde_json::json!({
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "avg_frame_rate": "0/0",
                    "r_frame_rate": "30000/1001",
                    "bit_rate": "4500000"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "channels": 6
                }
            ],
            "format": { "bit_rate": "5000000" }
        });

        let metrics = parse_probe_output(&data).unwrap();
        assert_eq!(metrics.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(metrics.fps, Some(29.97));
        assert_eq!(metrics.bitrate, Some(5000));
        assert_eq!(metrics.video_bitrate, Some(4500));
        assert_eq!(metrics.audio_channels, Some(6));
        assert_eq!(metrics.video_codec.as_deref(), Some("h264"));
        assert_eq!(metrics.audio_codec.as_deref(), Some("aac"));
    }

    #[test]
    fn test_parse_probe_output_falls_back_to_video_bitrate() {
        let data = serde_json::json!({
            "streams": [
                { "codec_type": "video", "width": 1280, "height": 720, "bit_rate": "2000000" }
            ],
            "format": {}
        });
        let metrics = parse_probe_output(&data).unwrap();
        assert_eq!(metrics.bitrate, Some(2000));
        assert_eq!(metrics.audio_channels, None);
    }

    #[test]
    fn test_parse_probe_output_with_error() {
        let data = serde_json::json!({
            "error": { "code": -111, "string": "Connection refused" }
        });
        match parse_probe_output(&data) {
            Err(ProbeError::ExitStatus { code, message }) => {
                assert_eq!(code, Some(-111));
                assert_eq!(message, "Connection refused");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_probe_output_without_media_streams() {
        let data = serde_json::json!({ "streams": [{ "codec_type": "data" }] });
        assert!(matches!(
            parse_probe_output(&data),
            Err(ProbeError::MalformedOutput(_))
        ));
    }

    #[rstest]
    #[case("25/1", Some(25.0))]
    #[case("30000/1001", Some(29.97))]
    #[case("50", Some(50.0))]
    #[case("0/0", None)]
    #[case("abc", None)]
    fn test_parse_frame_rate(#[case] input: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_frame_rate(input), expected);
    }

    #[test]
    fn test_sum_black_durations() {
        let stderr = "\
[blackdetect @ 0x55] black_start:0 black_end:4.5 black_duration:4.5
frame=  250 fps=0.0 q=-0.0 size=N/A
[blackdetect @ 0x55] black_start:5 black_end:9.5 black_duration:4.5
";
        assert_eq!(sum_black_millis(stderr), 9_000);
        assert_eq!(sum_black_millis("no detections here"), 0);
    }

    #[rstest]
    #[case(9_000, 10_000, false)]
    #[case(9_010, 10_000, true)]
    #[case(10_000, 10_000, true)]
    #[case(0, 10_000, false)]
    #[case(5_000, 0, false)]
    fn test_black_threshold_is_strict(
        #[case] black_ms: u64,
        #[case] sample_ms: u64,
        #[case] expected: bool,
    ) {
        assert_eq!(is_predominantly_black(black_ms, sample_ms), expected);
    }

    #[test]
    fn test_intervals_summing_to_exactly_ninety_percent_are_not_black() {
        let stderr = "black_duration:2.1\n".repeat(3);
        let black_ms = sum_black_millis(&stderr);
        assert_eq!(black_ms, 6_300);
        assert!(!is_predominantly_black(black_ms, 7_000));

        let stderr = format!("{stderr}black_duration:0.001\n");
        assert!(is_predominantly_black(sum_black_millis(&stderr), 7_000));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let config = ProbingConfig {
            ffprobe_command: "/nonexistent/ffprobe-binary".to_string(),
            ..ProbingConfig::default()
        };
        let prober = FfprobeProber::new(&config);
        assert!(matches!(
            prober.probe("http://example.invalid/stream.ts").await,
            Err(ProbeError::Spawn { .. })
        ));
    }
}
