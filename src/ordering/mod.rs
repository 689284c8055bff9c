//! Per-channel stream ordering
//!
//! Three pure stages run in a fixed order, each independently switchable:
//! quality sort, provider diversification, and per-account capping. Nothing
//! here talks to the network except [`apply_channel_order`], the explicit
//! write-back.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::client::ChannelManagerClient;
use crate::errors::ClientResult;
use crate::models::{ChannelUpdate, ProbeStatus, Stream, StreamStats};

pub mod account_limit;
pub mod diversify;
pub mod smart_sort;

pub use account_limit::limit_streams_per_account;
pub use diversify::diversify_streams;
pub use smart_sort::smart_sort_streams;

/// Quality criteria, compared in configured order, higher first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortCriterion {
    Resolution,
    Bitrate,
    Framerate,
    ProviderPriority,
    AudioChannels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterionConfig {
    pub criterion: SortCriterion,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiversificationMode {
    #[default]
    Disabled,
    /// One stream per provider per round, providers by ascending id
    RoundRobin,
    /// One stream per provider per round, providers by descending priority
    PriorityWeighted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Streams per provider per channel when no override exists; 0 = unlimited
    #[serde(default)]
    pub default_limit: u32,
}

/// Externally configured provider (M3U account) settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Per-account override of the default limit; 0 = unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_streams_per_channel: Option<u32>,
}

/// Provider settings keyed by the account id rendered as a string
pub type ProviderSettings = BTreeMap<String, ProviderConfig>;

pub fn provider_config(providers: &ProviderSettings, provider_id: i64) -> Option<&ProviderConfig> {
    providers.get(&provider_id.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderingConfig {
    #[serde(default = "default_true")]
    pub smart_sort_enabled: bool,
    #[serde(default = "default_sort_criteria")]
    pub sort_criteria: Vec<SortCriterionConfig>,
    /// Move black screen and failed streams to the end of the order
    #[serde(default)]
    pub deprioritize_failed_streams: bool,
    #[serde(default)]
    pub diversification: DiversificationMode,
    #[serde(default)]
    pub account_limit: AccountLimitConfig,
    #[serde(default)]
    pub providers: ProviderSettings,
}

fn default_true() -> bool {
    true
}

fn default_sort_criteria() -> Vec<SortCriterionConfig> {
    [
        SortCriterion::Resolution,
        SortCriterion::Bitrate,
        SortCriterion::Framerate,
        SortCriterion::ProviderPriority,
        SortCriterion::AudioChannels,
    ]
    .into_iter()
    .map(|criterion| SortCriterionConfig {
        criterion,
        enabled: true,
    })
    .collect()
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            smart_sort_enabled: true,
            sort_criteria: default_sort_criteria(),
            deprioritize_failed_streams: false,
            diversification: DiversificationMode::Disabled,
            account_limit: AccountLimitConfig::default(),
            providers: ProviderSettings::new(),
        }
    }
}

impl OrderingConfig {
    pub fn enabled_criteria(&self) -> Vec<SortCriterion> {
        self.sort_criteria
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.criterion)
            .collect()
    }
}

/// The facts about one stream the ordering stages look at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCandidate {
    pub stream_id: i64,
    pub provider_id: Option<i64>,
    pub resolution_pixels: Option<u64>,
    pub bitrate: Option<u64>,
    pub fps: Option<f64>,
    pub audio_channels: Option<u32>,
    pub probe_status: Option<ProbeStatus>,
    pub is_black_screen: bool,
}

impl StreamCandidate {
    pub fn new(stream_id: i64, provider_id: Option<i64>, stats: Option<&StreamStats>) -> Self {
        let mut candidate = Self {
            stream_id,
            provider_id,
            ..Self::default()
        };
        if let Some(stats) = stats {
            candidate.resolution_pixels = stats.metrics().resolution_pixels();
            candidate.bitrate = stats.bitrate;
            candidate.fps = stats.fps;
            candidate.audio_channels = stats.audio_channels;
            candidate.probe_status = Some(stats.probe_status);
            candidate.is_black_screen = stats.is_black();
        }
        candidate
    }

    /// Black screen, failed or timed out on the last probe
    pub fn is_unhealthy(&self) -> bool {
        self.is_black_screen || self.probe_status.is_some_and(|s| s.is_failure())
    }
}

/// Final order for one channel plus the streams the limiter dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderedChannel {
    pub ordered: Vec<i64>,
    pub excluded: Vec<i64>,
}

pub struct StreamOrderingPipeline {
    config: OrderingConfig,
}

impl StreamOrderingPipeline {
    pub fn new(config: OrderingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrderingConfig {
        &self.config
    }

    /// sort → diversify → limit
    pub fn order_candidates(&self, candidates: Vec<StreamCandidate>) -> OrderedChannel {
        let sorted = if self.config.smart_sort_enabled {
            smart_sort_streams(
                &candidates,
                &self.config.enabled_criteria(),
                self.config.deprioritize_failed_streams,
                &self.config.providers,
            )
        } else {
            candidates
        };

        let diversified = diversify_streams(
            sorted,
            self.config.diversification,
            &self.config.providers,
        );

        let (kept, excluded) = limit_streams_per_account(
            diversified,
            &self.config.account_limit,
            &self.config.providers,
        );

        OrderedChannel {
            ordered: kept.iter().map(|c| c.stream_id).collect(),
            excluded: excluded.iter().map(|c| c.stream_id).collect(),
        }
    }

    /// Order a channel's current stream ids using the latest probe stats
    ///
    /// Streams missing from `streams` are treated as provider-less.
    pub fn order_channel(
        &self,
        stream_ids: &[i64],
        streams: &HashMap<i64, Stream>,
        stats: &HashMap<i64, StreamStats>,
    ) -> OrderedChannel {
        let candidates = stream_ids
            .iter()
            .map(|id| {
                StreamCandidate::new(
                    *id,
                    streams.get(id).and_then(|s| s.m3u_account),
                    stats.get(id),
                )
            })
            .collect();
        let ordered = self.order_candidates(candidates);
        debug!(
            kept = ordered.ordered.len(),
            excluded = ordered.excluded.len(),
            "Computed channel stream order"
        );
        ordered
    }
}

/// Write a computed order back to the channel manager
pub async fn apply_channel_order(
    client: &dyn ChannelManagerClient,
    channel_id: i64,
    ordered: &[i64],
) -> ClientResult<()> {
    client
        .update_channel(
            channel_id,
            &ChannelUpdate {
                streams: ordered.to_vec(),
            },
        )
        .await?;
    info!(channel_id, streams = ordered.len(), "Applied channel stream order");
    Ok(())
}
