use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::STRUCK_STREAM_CLEANUP_TASK_ID;
use crate::client::ChannelManagerClient;
use crate::config::defaults::DEFAULT_STRUCK_FAILURE_THRESHOLD;
use crate::job_scheduling::task::{ScheduledTask, TaskContext, merge_config};
use crate::job_scheduling::types::{ProgressUpdate, TaskResult, error_codes};
use crate::models::ChannelUpdate;
use crate::repositories::StreamStatsRepository;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StruckCleanupSettings {
    /// Consecutive failures that strike a stream out; 0 disables the task
    pub failure_threshold: u32,
}

impl Default for StruckCleanupSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_STRUCK_FAILURE_THRESHOLD,
        }
    }
}

/// Remove struck-out streams from every channel that carries them
///
/// Each modified channel is saved on its own, so one failed update does not
/// stop the others. Failure streaks are reset only for streams that were
/// actually removed from at least one channel.
pub struct StruckStreamCleanupTask {
    client: Arc<dyn ChannelManagerClient>,
    repository: Arc<dyn StreamStatsRepository>,
    page_size: u32,
    settings: RwLock<StruckCleanupSettings>,
    context: TaskContext,
}

impl StruckStreamCleanupTask {
    pub fn new(
        client: Arc<dyn ChannelManagerClient>,
        repository: Arc<dyn StreamStatsRepository>,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            repository,
            page_size,
            settings: RwLock::new(StruckCleanupSettings::default()),
            context: TaskContext::new(),
        }
    }

    async fn reset_removed(&self, removed: &BTreeSet<i64>, errors: &mut Vec<String>) {
        if removed.is_empty() {
            return;
        }
        let ids: Vec<i64> = removed.iter().copied().collect();
        match self.repository.reset_failures(&ids).await {
            Ok(reset) => debug!(reset, "Reset failure streaks of removed streams"),
            Err(e) => {
                warn!(error = %e, "Failed to reset failure streaks");
                errors.push(format!("resetting failure counts: {e}"));
            }
        }
    }
}

#[async_trait]
impl ScheduledTask for StruckStreamCleanupTask {
    fn task_id(&self) -> &str {
        STRUCK_STREAM_CLEANUP_TASK_ID
    }

    fn name(&self) -> &str {
        "Struck stream cleanup"
    }

    fn description(&self) -> &str {
        "Remove streams that keep failing from all channels"
    }

    fn context(&self) -> &TaskContext {
        &self.context
    }

    async fn get_config(&self) -> serde_json::Value {
        serde_json::to_value(&*self.settings.read().await).unwrap_or_default()
    }

    async fn update_config(&self, config: serde_json::Value) -> Result<(), String> {
        let mut settings = self.settings.write().await;
        *settings = merge_config(&*settings, &config)?;
        Ok(())
    }

    async fn validate_config(&self) -> Result<(), String> {
        Ok(())
    }

    async fn execute(&self) -> TaskResult {
        let started_at = Utc::now();
        let task_id = self.task_id();
        self.context.begin("loading struck streams").await;
        let threshold = self.settings.read().await.failure_threshold;

        if threshold == 0 {
            info!("Struck stream cleanup disabled (failure_threshold = 0)");
            self.context
                .set_progress(ProgressUpdate::status("completed"))
                .await;
            return TaskResult::from_progress(
                task_id,
                started_at,
                &self.context.snapshot().await,
                "Struck stream cleanup is disabled",
            )
            .with_detail("disabled", serde_json::json!(true));
        }

        let struck: HashSet<i64> = match self.repository.list_struck(threshold).await {
            Ok(stats) => stats.into_iter().map(|s| s.stream_id).collect(),
            Err(e) => {
                return TaskResult::fatal(
                    task_id,
                    started_at,
                    error_codes::FETCH_FAILED,
                    format!("Failed to load struck streams: {e}"),
                );
            }
        };
        if struck.is_empty() {
            self.context
                .set_progress(ProgressUpdate::status("completed"))
                .await;
            return TaskResult::from_progress(
                task_id,
                started_at,
                &self.context.snapshot().await,
                format!("No streams at or above {threshold} consecutive failures"),
            );
        }

        self.context
            .set_progress(ProgressUpdate::status("loading channels"))
            .await;
        let channels = match self.client.get_all_channels(self.page_size).await {
            Ok(channels) => channels,
            Err(e) => {
                return TaskResult::fatal(
                    task_id,
                    started_at,
                    error_codes::FETCH_FAILED,
                    format!("Failed to fetch channels: {e}"),
                );
            }
        };

        let affected: Vec<_> = channels
            .into_iter()
            .filter(|c| c.streams.iter().any(|id| struck.contains(id)))
            .collect();
        info!(
            struck = struck.len(),
            channels = affected.len(),
            threshold,
            "Removing struck streams from channels"
        );
        self.context
            .set_progress(ProgressUpdate::status("updating channels").with_total(affected.len()))
            .await;

        let mut removed = BTreeSet::new();
        let mut errors = Vec::new();
        for channel in affected {
            if self.context.is_cancelled() {
                self.reset_removed(&removed, &mut errors).await;
                let progress = self.context.snapshot().await;
                return TaskResult::cancelled(
                    task_id,
                    started_at,
                    &progress,
                    format!(
                        "Cleanup cancelled after {} of {} channels",
                        progress.processed(),
                        progress.total
                    ),
                )
                .with_detail("removed_streams", serde_json::json!(removed))
                .with_errors(errors);
            }
            self.context
                .set_progress(ProgressUpdate::default().with_item(channel.name.clone()))
                .await;

            let (dropped, kept): (Vec<i64>, Vec<i64>) =
                channel.streams.iter().partition(|id| struck.contains(*id));
            match self
                .client
                .update_channel(channel.id, &ChannelUpdate { streams: kept })
                .await
            {
                Ok(()) => {
                    debug!(
                        channel_id = channel.id,
                        removed = dropped.len(),
                        "Removed struck streams from channel"
                    );
                    removed.extend(dropped);
                    self.context.increment_progress(1, 0, 0).await;
                }
                Err(e) => {
                    warn!(channel_id = channel.id, error = %e, "Failed to update channel");
                    errors.push(format!("channel {}: {e}", channel.id));
                    self.context.increment_progress(0, 1, 0).await;
                }
            }
        }

        self.reset_removed(&removed, &mut errors).await;
        self.context
            .set_progress(ProgressUpdate::status("completed").without_item())
            .await;
        let progress = self.context.snapshot().await;
        TaskResult::from_progress(
            task_id,
            started_at,
            &progress,
            format!(
                "Removed {} struck streams from {} channels ({} failed)",
                removed.len(),
                progress.success_count,
                progress.failed_count
            ),
        )
        .with_detail("struck_streams", serde_json::json!(struck.len()))
        .with_detail("removed_streams", serde_json::json!(removed))
        .with_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockChannelManagerClient;
    use crate::errors::ClientError;
    use crate::models::{Channel, ProbeStatus, StreamStats};
    use crate::repositories::InMemoryStreamStatsRepository;
    use std::sync::{Mutex, OnceLock, Weak};
    use tracing_test::traced_test;

    fn channel(id: i64, streams: &[i64]) -> Channel {
        Channel {
            id,
            name: format!("Channel {id}"),
            channel_number: None,
            streams: streams.to_vec(),
        }
    }

    async fn repository_with_failures(
        failures: &[(i64, u32)],
    ) -> Arc<InMemoryStreamStatsRepository> {
        let repository = Arc::new(InMemoryStreamStatsRepository::new());
        for (stream_id, count) in failures {
            let mut stats =
                StreamStats::from_failure(*stream_id, ProbeStatus::Failed, None, Utc::now());
            stats.consecutive_failures = *count;
            repository.insert(stats).await;
        }
        repository
    }

    #[tokio::test]
    async fn test_removes_struck_streams_everywhere_and_nowhere_else() {
        // 7 is struck (5 failures), 8 is below the threshold
        let repository = repository_with_failures(&[(7, 5), (8, 4)]).await;
        let updates = Arc::new(Mutex::new(Vec::new()));
        let mut client = MockChannelManagerClient::new();
        client.expect_get_all_channels().returning(|_| {
            Ok(vec![
                channel(1, &[7, 8, 9]),
                channel(2, &[8, 9]),
                channel(3, &[7]),
            ])
        });
        let seen = updates.clone();
        client.expect_update_channel().returning(move |id, update| {
            seen.lock().unwrap().push((id, update.streams.clone()));
            Ok(())
        });
        let task = StruckStreamCleanupTask::new(Arc::new(client), repository.clone(), 100);

        let result = task.execute().await;
        assert!(result.success);
        assert_eq!(result.total_items, 2);
        assert_eq!(result.success_count, 2);

        let mut updates = updates.lock().unwrap().clone();
        updates.sort();
        assert_eq!(updates, vec![(1, vec![8, 9]), (3, vec![])]);
        assert_eq!(repository.get(7).await.unwrap().unwrap().consecutive_failures, 0);
        assert_eq!(repository.get(8).await.unwrap().unwrap().consecutive_failures, 4);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_update_keeps_failure_streak() {
        let repository = repository_with_failures(&[(7, 6), (9, 5)]).await;
        let mut client = MockChannelManagerClient::new();
        client
            .expect_get_all_channels()
            .returning(|_| Ok(vec![channel(1, &[7]), channel(2, &[9])]));
        client.expect_update_channel().returning(|id, _| {
            if id == 1 {
                Err(ClientError::Status {
                    status: 500,
                    message: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        });
        let task = StruckStreamCleanupTask::new(Arc::new(client), repository.clone(), 100);

        let result = task.execute().await;
        assert!(result.success);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.details["errors"].as_array().map(Vec::len), Some(1));
        assert_eq!(repository.get(7).await.unwrap().unwrap().consecutive_failures, 6);
        assert_eq!(repository.get(9).await.unwrap().unwrap().consecutive_failures, 0);
        assert!(logs_contain("Failed to update channel"));
    }

    #[tokio::test]
    async fn test_cancel_resets_only_streams_already_removed() {
        let repository = repository_with_failures(&[(7, 5), (9, 8)]).await;
        let updates = Arc::new(Mutex::new(Vec::new()));
        let task_slot: Arc<OnceLock<Weak<StruckStreamCleanupTask>>> = Arc::new(OnceLock::new());
        let mut client = MockChannelManagerClient::new();
        client.expect_get_all_channels().returning(|_| {
            Ok(vec![
                channel(1, &[7, 3]),
                channel(2, &[7, 9]),
                channel(3, &[9]),
            ])
        });
        let seen = updates.clone();
        let slot = task_slot.clone();
        client.expect_update_channel().returning(move |id, _| {
            seen.lock().unwrap().push(id);
            // Cancel lands while the first channel is being saved
            if let Some(task) = slot.get().and_then(Weak::upgrade) {
                task.context().request_cancel();
            }
            Ok(())
        });
        let task = Arc::new(StruckStreamCleanupTask::new(
            Arc::new(client),
            repository.clone(),
            100,
        ));
        let _ = task_slot.set(Arc::downgrade(&task));

        let result = task.execute().await;
        assert!(result.is_cancelled());
        assert_eq!(result.error.as_deref(), Some(error_codes::CANCELLED));
        assert_eq!(result.total_items, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(*updates.lock().unwrap(), vec![1]);
        assert_eq!(result.details["removed_streams"], serde_json::json!([7]));
        assert_eq!(repository.get(7).await.unwrap().unwrap().consecutive_failures, 0);
        assert_eq!(repository.get(9).await.unwrap().unwrap().consecutive_failures, 8);
    }

    #[tokio::test]
    async fn test_zero_threshold_disables_cleanup() {
        let repository = repository_with_failures(&[(7, 50)]).await;
        let client = MockChannelManagerClient::new();
        let task = StruckStreamCleanupTask::new(Arc::new(client), repository.clone(), 100);
        task.update_config(serde_json::json!({ "failure_threshold": 0 }))
            .await
            .unwrap();

        let result = task.execute().await;
        assert!(result.success);
        assert_eq!(result.details["disabled"], serde_json::json!(true));
        assert_eq!(repository.get(7).await.unwrap().unwrap().consecutive_failures, 50);
    }

    #[tokio::test]
    async fn test_channel_fetch_failure_is_fatal() {
        let repository = repository_with_failures(&[(7, 5)]).await;
        let mut client = MockChannelManagerClient::new();
        client.expect_get_all_channels().returning(|_| {
            Err(ClientError::Status {
                status: 503,
                message: "unavailable".to_string(),
            })
        });
        let task = StruckStreamCleanupTask::new(Arc::new(client), repository, 100);

        let result = task.execute().await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(error_codes::FETCH_FAILED));
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let task = StruckStreamCleanupTask::new(
            Arc::new(MockChannelManagerClient::new()),
            Arc::new(InMemoryStreamStatsRepository::new()),
            100,
        );
        assert_eq!(
            task.get_config().await,
            serde_json::json!({ "failure_threshold": 5 })
        );
        assert!(
            task.update_config(serde_json::json!({ "failure_threshold": -1 }))
                .await
                .is_err()
        );
        assert_eq!(
            task.get_config().await,
            serde_json::json!({ "failure_threshold": 5 })
        );
    }
}
