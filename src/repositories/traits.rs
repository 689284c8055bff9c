use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::RepositoryResult;
use crate::models::{ProbeMetrics, ProbeStatus, StreamStats};

/// Persistent probe state keyed by remote stream id
#[async_trait]
pub trait StreamStatsRepository: Send + Sync {
    async fn get(&self, stream_id: i64) -> RepositoryResult<Option<StreamStats>>;

    /// Stats for the given ids; ids never probed are absent from the map
    async fn get_many(&self, stream_ids: &[i64]) -> RepositoryResult<HashMap<i64, StreamStats>>;

    async fn list_all(&self) -> RepositoryResult<Vec<StreamStats>>;

    async fn list_by_status(&self, statuses: &[ProbeStatus]) -> RepositoryResult<Vec<StreamStats>>;

    /// Streams whose failure streak reached `threshold`; a threshold of 0 matches nothing
    async fn list_struck(&self, threshold: u32) -> RepositoryResult<Vec<StreamStats>>;

    /// Overwrite with a successful probe and reset the failure streak
    async fn record_success(
        &self,
        stream_id: i64,
        metrics: ProbeMetrics,
        is_black_screen: Option<bool>,
    ) -> RepositoryResult<StreamStats>;

    /// Overwrite with a failed/timed out probe and extend the failure streak
    async fn record_failure(
        &self,
        stream_id: i64,
        status: ProbeStatus,
        error: Option<String>,
    ) -> RepositoryResult<StreamStats>;

    /// Administrative reset of the failure streak; returns rows touched
    async fn reset_failures(&self, stream_ids: &[i64]) -> RepositoryResult<u64>;
}
