use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::{EngineRunFlag, REPROBE_FAILED_TASK_ID, forward_cancel, run_engine};
use crate::job_scheduling::task::{ScheduledTask, TaskContext};
use crate::job_scheduling::types::{ProgressUpdate, TaskProgress, TaskResult, error_codes};
use crate::models::ProbeStatus;
use crate::repositories::StreamStatsRepository;
use crate::services::probe_engine::StreamProbeEngine;

/// Re-probe only the streams whose last probe failed or timed out
pub struct ReprobeFailedTask {
    engine: Option<Arc<StreamProbeEngine>>,
    repository: Arc<dyn StreamStatsRepository>,
    context: TaskContext,
    engine_run: EngineRunFlag,
}

impl ReprobeFailedTask {
    pub fn new(
        engine: Option<Arc<StreamProbeEngine>>,
        repository: Arc<dyn StreamStatsRepository>,
    ) -> Self {
        Self {
            engine,
            repository,
            context: TaskContext::new(),
            engine_run: EngineRunFlag::default(),
        }
    }
}

#[async_trait]
impl ScheduledTask for ReprobeFailedTask {
    fn task_id(&self) -> &str {
        REPROBE_FAILED_TASK_ID
    }

    fn name(&self) -> &str {
        "Re-probe failed streams"
    }

    fn description(&self) -> &str {
        "Probe again every stream whose last probe failed or timed out"
    }

    fn context(&self) -> &TaskContext {
        &self.context
    }

    async fn get_config(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn update_config(&self, config: serde_json::Value) -> Result<(), String> {
        match config {
            serde_json::Value::Object(fields) if fields.is_empty() => Ok(()),
            serde_json::Value::Object(_) => {
                Err("reprobe_failed takes no configuration".to_string())
            }
            _ => Err("task configuration must be a JSON object".to_string()),
        }
    }

    async fn validate_config(&self) -> Result<(), String> {
        if self.engine.is_none() {
            return Err("no stream prober is configured".to_string());
        }
        Ok(())
    }

    async fn execute(&self) -> TaskResult {
        let started_at = Utc::now();
        self.context.begin("loading failed streams").await;

        let Some(engine) = &self.engine else {
            return TaskResult::fatal(
                self.task_id(),
                started_at,
                error_codes::NO_PROBER,
                "No stream prober is configured",
            );
        };

        let failed = match self
            .repository
            .list_by_status(&[ProbeStatus::Failed, ProbeStatus::Timeout])
            .await
        {
            Ok(failed) => failed,
            Err(e) => {
                warn!(error = %e, "Failed to load failed streams");
                return TaskResult::fatal(
                    self.task_id(),
                    started_at,
                    error_codes::FETCH_FAILED,
                    format!("Failed to load failed streams: {e}"),
                );
            }
        };

        if failed.is_empty() {
            self.context
                .set_progress(ProgressUpdate::status("completed"))
                .await;
            return TaskResult::from_progress(
                self.task_id(),
                started_at,
                &TaskProgress::default(),
                "No failed streams to re-probe",
            );
        }

        let stream_ids: Vec<i64> = failed.iter().map(|s| s.stream_id).collect();
        info!(count = stream_ids.len(), "Re-probing failed streams");

        run_engine(
            self.task_id(),
            &self.context,
            engine,
            &self.engine_run,
            started_at,
            Some(stream_ids),
            true,
        )
        .await
    }

    async fn cancel(&self) {
        self.context.request_cancel();
        forward_cancel(self.engine.as_deref(), &self.engine_run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockChannelManagerClient;
    use crate::config::ProbingConfig;
    use crate::models::{ProbeMetrics, StreamStats};
    use crate::repositories::InMemoryStreamStatsRepository;
    use crate::services::probe_engine::tests::{FakeProber, stream};
    use chrono::Utc;

    #[tokio::test]
    async fn test_only_failed_and_timed_out_streams_are_probed() {
        let repository = Arc::new(InMemoryStreamStatsRepository::new());
        let now = Utc::now();
        repository
            .insert(StreamStats::from_success(1, ProbeMetrics::default(), None, now))
            .await;
        repository
            .insert(StreamStats::from_failure(2, ProbeStatus::Failed, None, now))
            .await;
        repository
            .insert(StreamStats::from_failure(3, ProbeStatus::Timeout, None, now))
            .await;

        let mut client = MockChannelManagerClient::new();
        client
            .expect_get_streams_by_ids()
            .withf(|ids| {
                let mut ids = ids.to_vec();
                ids.sort();
                ids == vec![2, 3]
            })
            .times(1)
            .returning(|ids| {
                Ok(ids
                    .iter()
                    .map(|id| stream(*id, Some(&format!("http://retry/{id}"))))
                    .collect())
            });
        let prober = Arc::new(FakeProber::default());
        let engine = Arc::new(StreamProbeEngine::new(
            Arc::new(client),
            repository.clone(),
            prober.clone(),
            ProbingConfig::default(),
            100,
        ));
        let task = ReprobeFailedTask::new(Some(engine), repository.clone());

        let result = task.execute().await;
        assert!(result.success);
        assert_eq!(result.total_items, 2);
        assert_eq!(result.success_count, 2);

        let mut probed = prober.probed.lock().unwrap().clone();
        probed.sort();
        assert_eq!(probed, vec!["http://retry/2", "http://retry/3"]);
        let recovered = repository.get(2).await.unwrap().unwrap();
        assert_eq!(recovered.probe_status, ProbeStatus::Success);
        assert_eq!(recovered.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_nothing_failed_is_a_successful_noop() {
        let client = MockChannelManagerClient::new();
        let repository = Arc::new(InMemoryStreamStatsRepository::new());
        let engine = Arc::new(StreamProbeEngine::new(
            Arc::new(client),
            repository.clone(),
            Arc::new(FakeProber::default()),
            ProbingConfig::default(),
            100,
        ));
        let task = ReprobeFailedTask::new(Some(engine), repository);

        let result = task.execute().await;
        assert!(result.success);
        assert_eq!(result.total_items, 0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_rejects_settings() {
        let task = ReprobeFailedTask::new(None, Arc::new(InMemoryStreamStatsRepository::new()));
        assert!(task.update_config(serde_json::json!({})).await.is_ok());
        assert!(
            task.update_config(serde_json::json!({ "limit": 3 }))
                .await
                .is_err()
        );
        let result = task.execute().await;
        assert_eq!(result.error.as_deref(), Some(error_codes::NO_PROBER));
    }
}
