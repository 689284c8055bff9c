/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./stream-health.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// Remote channel manager defaults
pub const DEFAULT_REMOTE_BASE_URL: &str = "http://localhost:9191";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

// Probing defaults
pub const DEFAULT_FFPROBE_COMMAND: &str = "ffprobe";
pub const DEFAULT_FFMPEG_COMMAND: &str = "ffmpeg";
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 4;
pub const MIN_CONCURRENT_PROBES: usize = 1;
pub const MAX_CONCURRENT_PROBES: usize = 16;
pub const DEFAULT_BLACK_SCREEN_SAMPLE_SECS: u64 = 10;
pub const MIN_BLACK_SCREEN_SAMPLE_SECS: u64 = 3;
pub const MAX_BLACK_SCREEN_SAMPLE_SECS: u64 = 30;

// Scheduler defaults
pub const DEFAULT_SCHEDULER_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

// Remote source refresh defaults
pub const POLL_INTERVAL_SECONDS: u64 = 5;
pub const MAX_WAIT_SECONDS: u64 = 300;
pub const ASSUME_COMPLETE_AFTER_SECONDS: u64 = 30;

// Struck stream cleanup defaults
pub const DEFAULT_STRUCK_FAILURE_THRESHOLD: u32 = 5;
