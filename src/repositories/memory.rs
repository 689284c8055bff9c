use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::traits::StreamStatsRepository;
use crate::errors::RepositoryResult;
use crate::models::{ProbeMetrics, ProbeStatus, StreamStats};

/// Process-local stats store; contents are lost on exit
#[derive(Default)]
pub struct InMemoryStreamStatsRepository {
    stats: RwLock<HashMap<i64, StreamStats>>,
}

impl InMemoryStreamStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a record
    pub async fn insert(&self, stats: StreamStats) {
        self.stats.write().await.insert(stats.stream_id, stats);
    }

    fn sorted(mut stats: Vec<StreamStats>) -> Vec<StreamStats> {
        stats.sort_by_key(|s| s.stream_id);
        stats
    }
}

#[async_trait]
impl StreamStatsRepository for InMemoryStreamStatsRepository {
    async fn get(&self, stream_id: i64) -> RepositoryResult<Option<StreamStats>> {
        Ok(self.stats.read().await.get(&stream_id).cloned())
    }

    async fn get_many(&self, stream_ids: &[i64]) -> RepositoryResult<HashMap<i64, StreamStats>> {
        let stats = self.stats.read().await;
        Ok(stream_ids
            .iter()
            .filter_map(|id| stats.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    async fn list_all(&self) -> RepositoryResult<Vec<StreamStats>> {
        Ok(Self::sorted(self.stats.read().await.values().cloned().collect()))
    }

    async fn list_by_status(&self, statuses: &[ProbeStatus]) -> RepositoryResult<Vec<StreamStats>> {
        let stats = self.stats.read().await;
        Ok(Self::sorted(
            stats
                .values()
                .filter(|s| statuses.contains(&s.probe_status))
                .cloned()
                .collect(),
        ))
    }

    async fn list_struck(&self, threshold: u32) -> RepositoryResult<Vec<StreamStats>> {
        if threshold == 0 {
            return Ok(Vec::new());
        }
        let stats = self.stats.read().await;
        Ok(Self::sorted(
            stats
                .values()
                .filter(|s| s.consecutive_failures >= threshold)
                .cloned()
                .collect(),
        ))
    }

    async fn record_success(
        &self,
        stream_id: i64,
        metrics: ProbeMetrics,
        is_black_screen: Option<bool>,
    ) -> RepositoryResult<StreamStats> {
        let now = Utc::now();
        let mut stats = self.stats.write().await;
        let entry = stats
            .entry(stream_id)
            .and_modify(|s| s.apply_success(metrics.clone(), is_black_screen, now))
            .or_insert_with(|| StreamStats::from_success(stream_id, metrics, is_black_screen, now));
        Ok(entry.clone())
    }

    async fn record_failure(
        &self,
        stream_id: i64,
        status: ProbeStatus,
        error: Option<String>,
    ) -> RepositoryResult<StreamStats> {
        let now = Utc::now();
        let mut stats = self.stats.write().await;
        let entry = stats
            .entry(stream_id)
            .and_modify(|s| s.apply_failure(status, error.clone(), now))
            .or_insert_with(|| StreamStats::from_failure(stream_id, status, error, now));
        Ok(entry.clone())
    }

    async fn reset_failures(&self, stream_ids: &[i64]) -> RepositoryResult<u64> {
        let mut stats = self.stats.write().await;
        let mut touched = 0;
        for id in stream_ids {
            if let Some(s) = stats.get_mut(id) {
                s.consecutive_failures = 0;
                touched += 1;
            }
        }
        Ok(touched)
    }
}
