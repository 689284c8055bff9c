use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent probe of a stream
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failed,
    Timeout,
}

impl ProbeStatus {
    /// Failed and timed out probes are both eligible for re-probing
    pub fn is_failure(&self) -> bool {
        !matches!(self, ProbeStatus::Success)
    }
}

/// Technical quality facts extracted from a successful probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeMetrics {
    /// "WIDTHxHEIGHT", e.g. "1920x1080"
    pub resolution: Option<String>,
    /// Overall bitrate in kbps
    pub bitrate: Option<u64>,
    /// Video stream bitrate in kbps
    pub video_bitrate: Option<u64>,
    pub fps: Option<f64>,
    pub audio_channels: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl ProbeMetrics {
    /// Pixel count of the resolution, used for ranking
    pub fn resolution_pixels(&self) -> Option<u64> {
        parse_resolution_pixels(self.resolution.as_deref()?)
    }
}

/// Parse "1920x1080" into a pixel count
pub fn parse_resolution_pixels(resolution: &str) -> Option<u64> {
    let (width, height) = resolution.trim().split_once(['x', 'X'])?;
    let width: u64 = width.trim().parse().ok()?;
    let height: u64 = height.trim().parse().ok()?;
    Some(width * height)
}

/// Persisted probe state of one stream, overwritten on every probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream_id: i64,
    pub probe_status: ProbeStatus,
    pub resolution: Option<String>,
    pub bitrate: Option<u64>,
    pub video_bitrate: Option<u64>,
    pub fps: Option<f64>,
    pub audio_channels: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Only set after a successful probe with black screen detection enabled
    pub is_black_screen: Option<bool>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_probed_at: DateTime<Utc>,
}

impl StreamStats {
    /// Record produced by a first successful probe
    pub fn from_success(
        stream_id: i64,
        metrics: ProbeMetrics,
        is_black_screen: Option<bool>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::empty(stream_id, ProbeStatus::Success, now);
        stats.apply_success(metrics, is_black_screen, now);
        stats
    }

    /// Record produced by a first failed or timed out probe
    pub fn from_failure(
        stream_id: i64,
        status: ProbeStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::empty(stream_id, status, now);
        stats.apply_failure(status, error, now);
        stats
    }

    fn empty(stream_id: i64, status: ProbeStatus, now: DateTime<Utc>) -> Self {
        Self {
            stream_id,
            probe_status: status,
            resolution: None,
            bitrate: None,
            video_bitrate: None,
            fps: None,
            audio_channels: None,
            video_codec: None,
            audio_codec: None,
            is_black_screen: None,
            consecutive_failures: 0,
            last_error: None,
            last_probed_at: now,
        }
    }

    /// Overwrite with a successful probe; the failure streak ends here
    pub fn apply_success(
        &mut self,
        metrics: ProbeMetrics,
        is_black_screen: Option<bool>,
        now: DateTime<Utc>,
    ) {
        self.probe_status = ProbeStatus::Success;
        self.resolution = metrics.resolution;
        self.bitrate = metrics.bitrate;
        self.video_bitrate = metrics.video_bitrate;
        self.fps = metrics.fps;
        self.audio_channels = metrics.audio_channels;
        self.video_codec = metrics.video_codec;
        self.audio_codec = metrics.audio_codec;
        self.is_black_screen = is_black_screen;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_probed_at = now;
    }

    /// Overwrite with a failed or timed out probe
    ///
    /// Quality fields and the black screen flag are cleared: a failed probe
    /// carries no signal about either.
    pub fn apply_failure(&mut self, status: ProbeStatus, error: Option<String>, now: DateTime<Utc>) {
        debug_assert!(status.is_failure());
        self.probe_status = status;
        self.resolution = None;
        self.bitrate = None;
        self.video_bitrate = None;
        self.fps = None;
        self.audio_channels = None;
        self.video_codec = None;
        self.audio_codec = None;
        self.is_black_screen = None;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = error;
        self.last_probed_at = now;
    }

    pub fn metrics(&self) -> ProbeMetrics {
        ProbeMetrics {
            resolution: self.resolution.clone(),
            bitrate: self.bitrate,
            video_bitrate: self.video_bitrate,
            fps: self.fps,
            audio_channels: self.audio_channels,
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
        }
    }

    pub fn is_black(&self) -> bool {
        self.is_black_screen == Some(true)
    }
}
