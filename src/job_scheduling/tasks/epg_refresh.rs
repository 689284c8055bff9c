use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::EPG_REFRESH_TASK_ID;
use crate::client::ChannelManagerClient;
use crate::config::RefreshConfig;
use crate::job_scheduling::task::{ScheduledTask, TaskContext, merge_config};
use crate::job_scheduling::types::{ProgressUpdate, TaskResult, error_codes};
use crate::models::EpgSource;

/// How a source refresh was judged complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshCompletion {
    /// `updated_at` moved
    Updated,
    /// Nothing moved before the grace period passed
    Assumed,
}

/// Trigger a refresh of every active EPG source and wait for each to land
///
/// Dummy sources go through the same loop; they rarely move `updated_at`, so
/// they usually finish through the grace period. Sources are handled one at a
/// time and independently; a failing source is recorded and the next one
/// still runs.
pub struct EpgRefreshTask {
    client: Arc<dyn ChannelManagerClient>,
    settings: RwLock<RefreshConfig>,
    context: TaskContext,
}

impl EpgRefreshTask {
    pub fn new(client: Arc<dyn ChannelManagerClient>, settings: RefreshConfig) -> Self {
        Self {
            client,
            settings: RwLock::new(settings),
            context: TaskContext::new(),
        }
    }

    async fn refresh_source(
        &self,
        source: &EpgSource,
        settings: &RefreshConfig,
    ) -> Result<RefreshCompletion, String> {
        let previous = source.updated_at;
        self.client
            .refresh_epg_source(source.id)
            .await
            .map_err(|e| format!("refresh request failed: {e}"))?;

        let started = Instant::now();
        loop {
            if started.elapsed() >= settings.max_wait {
                return Err(format!(
                    "refresh did not finish within {}",
                    humantime::format_duration(settings.max_wait)
                ));
            }
            tokio::time::sleep(settings.poll_interval).await;

            let current = match self.client.get_epg_source(source.id).await {
                Ok(current) => current,
                Err(e) => {
                    warn!(source_id = source.id, error = %e, "Polling EPG source failed");
                    continue;
                }
            };
            if current.updated_at.is_some() && current.updated_at != previous {
                return Ok(RefreshCompletion::Updated);
            }
            if started.elapsed() > settings.assume_complete_after {
                return Ok(RefreshCompletion::Assumed);
            }
        }
    }
}

fn check_settings(settings: &RefreshConfig) -> Result<(), String> {
    if settings.poll_interval.is_zero() {
        return Err("poll_interval must be greater than zero".to_string());
    }
    if settings.max_wait < settings.poll_interval {
        return Err("max_wait must be at least poll_interval".to_string());
    }
    Ok(())
}

#[async_trait]
impl ScheduledTask for EpgRefreshTask {
    fn task_id(&self) -> &str {
        EPG_REFRESH_TASK_ID
    }

    fn name(&self) -> &str {
        "EPG refresh"
    }

    fn description(&self) -> &str {
        "Refresh all active EPG sources and wait for each import to finish"
    }

    fn context(&self) -> &TaskContext {
        &self.context
    }

    async fn get_config(&self) -> serde_json::Value {
        serde_json::to_value(&*self.settings.read().await).unwrap_or_default()
    }

    async fn update_config(&self, config: serde_json::Value) -> Result<(), String> {
        let mut settings = self.settings.write().await;
        let merged = merge_config(&*settings, &config)?;
        check_settings(&merged)?;
        *settings = merged;
        Ok(())
    }

    async fn validate_config(&self) -> Result<(), String> {
        check_settings(&*self.settings.read().await)
    }

    async fn execute(&self) -> TaskResult {
        let started_at = Utc::now();
        let task_id = self.task_id();
        self.context.begin("loading EPG sources").await;

        let settings = self.settings.read().await.clone();
        if let Err(e) = check_settings(&settings) {
            return TaskResult::fatal(task_id, started_at, error_codes::INVALID_CONFIG, e);
        }

        let sources = match self.client.get_epg_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                return TaskResult::fatal(
                    task_id,
                    started_at,
                    error_codes::FETCH_FAILED,
                    format!("Failed to fetch EPG sources: {e}"),
                );
            }
        };
        self.context
            .set_progress(ProgressUpdate::status("refreshing").with_total(sources.len()))
            .await;
        info!(sources = sources.len(), "Refreshing EPG sources");

        let mut errors = Vec::new();
        let mut assumed = Vec::new();
        for source in &sources {
            if self.context.is_cancelled() {
                let progress = self.context.snapshot().await;
                return TaskResult::cancelled(
                    task_id,
                    started_at,
                    &progress,
                    format!(
                        "EPG refresh cancelled after {} of {} sources",
                        progress.processed(),
                        progress.total
                    ),
                )
                .with_errors(errors);
            }
            if !source.is_active {
                debug!(source_id = source.id, "Skipping inactive EPG source");
                self.context.increment_progress(0, 0, 1).await;
                continue;
            }

            self.context
                .set_progress(ProgressUpdate::default().with_item(source.name.clone()))
                .await;
            match self.refresh_source(source, &settings).await {
                Ok(completion) => {
                    if completion == RefreshCompletion::Assumed {
                        assumed.push(source.id);
                    }
                    debug!(
                        source_id = source.id,
                        dummy = source.is_dummy(),
                        ?completion,
                        "EPG source refreshed"
                    );
                    self.context.increment_progress(1, 0, 0).await;
                }
                Err(reason) => {
                    warn!(source_id = source.id, %reason, "EPG source refresh failed");
                    errors.push(format!("{} ({}): {reason}", source.name, source.id));
                    self.context.increment_progress(0, 1, 0).await;
                }
            }
        }

        self.context
            .set_progress(ProgressUpdate::status("completed").without_item())
            .await;
        let progress = self.context.snapshot().await;
        TaskResult::from_progress(
            task_id,
            started_at,
            &progress,
            format!(
                "Refreshed {} EPG sources ({} failed, {} skipped)",
                progress.success_count, progress.failed_count, progress.skipped_count
            ),
        )
        .with_detail("assumed_complete", serde_json::json!(assumed))
        .with_errors(errors)
    }
}
