use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{EngineRunFlag, STREAM_PROBE_TASK_ID, forward_cancel, run_engine};
use crate::job_scheduling::task::{ScheduledTask, TaskContext, merge_config};
use crate::job_scheduling::types::{TaskResult, error_codes};
use crate::services::probe_engine::StreamProbeEngine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeAllSettings {
    /// Ask the channel manager to refresh active M3U accounts first
    pub refresh_accounts: bool,
}

/// Probe every stream the channel manager knows about
pub struct ProbeAllTask {
    engine: Option<Arc<StreamProbeEngine>>,
    settings: RwLock<ProbeAllSettings>,
    context: TaskContext,
    engine_run: EngineRunFlag,
}

impl ProbeAllTask {
    pub fn new(engine: Option<Arc<StreamProbeEngine>>, refresh_accounts: bool) -> Self {
        Self {
            engine,
            settings: RwLock::new(ProbeAllSettings { refresh_accounts }),
            context: TaskContext::new(),
            engine_run: EngineRunFlag::default(),
        }
    }
}

#[async_trait]
impl ScheduledTask for ProbeAllTask {
    fn task_id(&self) -> &str {
        STREAM_PROBE_TASK_ID
    }

    fn name(&self) -> &str {
        "Stream probe"
    }

    fn description(&self) -> &str {
        "Probe all streams and record their quality and health"
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
        if self.engine.is_none() {
            return Err("no stream prober is configured".to_string());
        }
        Ok(())
    }

    async fn execute(&self) -> TaskResult {
        let started_at = Utc::now();
        self.context.begin("starting").await;

        let Some(engine) = &self.engine else {
            return TaskResult::fatal(
                self.task_id(),
                started_at,
                error_codes::NO_PROBER,
                "No stream prober is configured",
            );
        };
        let settings = self.settings.read().await.clone();
        info!(
            refresh_accounts = settings.refresh_accounts,
            "Starting full stream probe"
        );

        run_engine(
            self.task_id(),
            &self.context,
            engine,
            &self.engine_run,
            started_at,
            None,
            !settings.refresh_accounts,
        )
        .await
    }

    async fn cancel(&self) {
        self.context.request_cancel();
        forward_cancel(self.engine.as_deref(), &self.engine_run);
    }
}
