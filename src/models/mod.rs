//! Domain models
//!
//! `stream_stats` holds the locally persisted probe facts; `remote` mirrors
//! the resources owned by the external channel manager.

pub mod remote;
pub mod stream_stats;

pub use remote::{Channel, ChannelUpdate, EpgSource, M3uAccount, Page, Stream};
pub use stream_stats::{ProbeMetrics, ProbeStatus, StreamStats};
