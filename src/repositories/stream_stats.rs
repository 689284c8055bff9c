//! SeaORM-based StreamStats repository implementation

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::traits::StreamStatsRepository;
use crate::entities::{prelude::StreamStats as StreamStatsEntity, stream_stats};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{ProbeMetrics, ProbeStatus, StreamStats};

/// SeaORM-based repository for stream statistics
#[derive(Clone)]
pub struct StreamStatsSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl StreamStatsSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    async fn find_model(&self, stream_id: i64) -> RepositoryResult<Option<stream_stats::Model>> {
        Ok(StreamStatsEntity::find_by_id(stream_id)
            .one(&*self.connection)
            .await?)
    }

    /// Insert a new row or update the existing one from a domain record
    async fn save(&self, stats: &StreamStats, exists: bool) -> RepositoryResult<StreamStats> {
        let active_model = stream_stats::ActiveModel {
            stream_id: Set(stats.stream_id),
            probe_status: Set(stats.probe_status.to_string()),
            resolution: Set(stats.resolution.clone()),
            bitrate: Set(stats.bitrate.map(to_db_i64).transpose()?),
            video_bitrate: Set(stats.video_bitrate.map(to_db_i64).transpose()?),
            fps: Set(stats.fps),
            audio_channels: Set(stats.audio_channels.map(|c| c as i32)),
            video_codec: Set(stats.video_codec.clone()),
            audio_codec: Set(stats.audio_codec.clone()),
            is_black_screen: Set(stats.is_black_screen),
            consecutive_failures: Set(stats.consecutive_failures.min(i32::MAX as u32) as i32),
            last_error: Set(stats.last_error.clone()),
            last_probed_at: Set(stats.last_probed_at),
        };

        let model = if exists {
            active_model.update(&*self.connection).await?
        } else {
            active_model.insert(&*self.connection).await?
        };
        model_to_domain(model)
    }
}

fn to_db_i64(value: u64) -> RepositoryResult<i64> {
    i64::try_from(value).map_err(|_| RepositoryError::InvalidValue {
        field: "bitrate".to_string(),
        message: format!("{value} does not fit the column"),
    })
}

/// Convert SeaORM model to domain model
fn model_to_domain(model: stream_stats::Model) -> RepositoryResult<StreamStats> {
    let probe_status =
        ProbeStatus::from_str(&model.probe_status).map_err(|e| RepositoryError::InvalidValue {
            field: "probe_status".to_string(),
            message: format!("'{}': {}", model.probe_status, e),
        })?;

    Ok(StreamStats {
        stream_id: model.stream_id,
        probe_status,
        resolution: model.resolution,
        bitrate: model.bitrate.map(|b| b.max(0) as u64),
        video_bitrate: model.video_bitrate.map(|b| b.max(0) as u64),
        fps: model.fps,
        audio_channels: model.audio_channels.map(|c| c.max(0) as u32),
        video_codec: model.video_codec,
        audio_codec: model.audio_codec,
        is_black_screen: model.is_black_screen,
        consecutive_failures: model.consecutive_failures.max(0) as u32,
        last_error: model.last_error,
        last_probed_at: model.last_probed_at,
    })
}

fn models_to_domain(models: Vec<stream_stats::Model>) -> RepositoryResult<Vec<StreamStats>> {
    models.into_iter().map(model_to_domain).collect()
}

#[async_trait]
impl StreamStatsRepository for StreamStatsSeaOrmRepository {
    async fn get(&self, stream_id: i64) -> RepositoryResult<Option<StreamStats>> {
        self.find_model(stream_id)
            .await?
            .map(model_to_domain)
            .transpose()
    }

    async fn get_many(&self, stream_ids: &[i64]) -> RepositoryResult<HashMap<i64, StreamStats>> {
        if stream_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let models = StreamStatsEntity::find()
            .filter(stream_stats::Column::StreamId.is_in(stream_ids.iter().copied()))
            .all(&*self.connection)
            .await?;
        models_to_domain(models)
            .map(|stats| stats.into_iter().map(|s| (s.stream_id, s)).collect())
    }

    async fn list_all(&self) -> RepositoryResult<Vec<StreamStats>> {
        let models = StreamStatsEntity::find()
            .order_by_asc(stream_stats::Column::StreamId)
            .all(&*self.connection)
            .await?;
        models_to_domain(models)
    }

    async fn list_by_status(&self, statuses: &[ProbeStatus]) -> RepositoryResult<Vec<StreamStats>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let models = StreamStatsEntity::find()
            .filter(stream_stats::Column::ProbeStatus.is_in(statuses.iter().map(|s| s.to_string())))
            .order_by_asc(stream_stats::Column::StreamId)
            .all(&*self.connection)
            .await?;
        models_to_domain(models)
    }

    async fn list_struck(&self, threshold: u32) -> RepositoryResult<Vec<StreamStats>> {
        if threshold == 0 {
            return Ok(Vec::new());
        }
        let threshold = threshold.min(i32::MAX as u32) as i32;
        let models = StreamStatsEntity::find()
            .filter(stream_stats::Column::ConsecutiveFailures.gte(threshold))
            .order_by_asc(stream_stats::Column::StreamId)
            .all(&*self.connection)
            .await?;
        models_to_domain(models)
    }

    async fn record_success(
        &self,
        stream_id: i64,
        metrics: ProbeMetrics,
        is_black_screen: Option<bool>,
    ) -> RepositoryResult<StreamStats> {
        let now = Utc::now();
        match self.get(stream_id).await? {
            Some(mut stats) => {
                stats.apply_success(metrics, is_black_screen, now);
                self.save(&stats, true).await
            }
            None => {
                let stats = StreamStats::from_success(stream_id, metrics, is_black_screen, now);
                self.save(&stats, false).await
            }
        }
    }

    async fn record_failure(
        &self,
        stream_id: i64,
        status: ProbeStatus,
        error: Option<String>,
    ) -> RepositoryResult<StreamStats> {
        let now = Utc::now();
        match self.get(stream_id).await? {
            Some(mut stats) => {
                stats.apply_failure(status, error, now);
                self.save(&stats, true).await
            }
            None => {
                let stats = StreamStats::from_failure(stream_id, status, error, now);
                self.save(&stats, false).await
            }
        }
    }

    async fn reset_failures(&self, stream_ids: &[i64]) -> RepositoryResult<u64> {
        if stream_ids.is_empty() {
            return Ok(0);
        }
        let result = StreamStatsEntity::update_many()
            .col_expr(stream_stats::Column::ConsecutiveFailures, Expr::value(0))
            .filter(stream_stats::Column::StreamId.is_in(stream_ids.iter().copied()))
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected)
    }
}
