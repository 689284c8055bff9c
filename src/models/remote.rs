//! Resources owned by the remote channel manager
//!
//! Only the fields the health subsystem reads are modelled; unknown fields in
//! API responses are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// A channel and its ordered stream assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub channel_number: Option<f64>,
    /// Stream ids in playback preference order
    #[serde(default)]
    pub streams: Vec<i64>,
}

/// Body of a channel stream reassignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub streams: Vec<i64>,
}

/// A stream as known to the channel manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Owning M3U account; None for custom/manual streams
    #[serde(default)]
    pub m3u_account: Option<i64>,
}

/// An M3U account (stream provider)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct M3uAccount {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// An EPG source; `updated_at` moves when the remote finishes a refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpgSource {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, alias = "last_updated")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EpgSource {
    /// Generated guides; these often never move `updated_at`
    pub fn is_dummy(&self) -> bool {
        self.source_type.as_deref() == Some("dummy")
    }
}

fn default_true() -> bool {
    true
}
