//! The contract every long-running job implements

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::types::{ProgressUpdate, TaskProgress, TaskResult};

/// Progress cell and cancellation flag owned by one task instance
///
/// Only the running task writes progress; everyone else reads copies.
#[derive(Debug, Default)]
pub struct TaskContext {
    progress: RwLock<TaskProgress>,
    cancel_requested: AtomicBool,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear progress at the start of an execution
    ///
    /// The cancel flag is left alone; a cancel requested before the first
    /// progress write still applies to this execution.
    pub async fn begin(&self, status: &str) {
        *self.progress.write().await = TaskProgress {
            status: status.to_string(),
            ..TaskProgress::default()
        };
    }

    pub async fn snapshot(&self) -> TaskProgress {
        self.progress.read().await.clone()
    }

    /// Overwrite the fields present in `update`
    pub async fn set_progress(&self, update: ProgressUpdate) {
        let mut progress = self.progress.write().await;
        if let Some(total) = update.total {
            progress.total = total;
        }
        if let Some(current) = update.current {
            progress.current = current;
        }
        if let Some(status) = update.status {
            progress.status = status;
        }
        if let Some(item) = update.current_item {
            progress.current_item = item;
        }
    }

    /// Bump the counters; `current` advances by the number of items counted
    pub async fn increment_progress(&self, success: usize, failed: usize, skipped: usize) {
        let mut progress = self.progress.write().await;
        progress.success_count += success;
        progress.failed_count += failed;
        progress.skipped_count += skipped;
        progress.current += success + failed + skipped;
    }

    /// Replace the whole snapshot, used when mirroring another progress source
    pub async fn replace_progress(&self, progress: TaskProgress) {
        *self.progress.write().await = progress;
    }

    /// Arm the context for a new execution
    pub fn reset_cancel(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// A schedulable unit of work
///
/// `execute` never fails: every outcome, cancellation included, is reported
/// through the returned [`TaskResult`].
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn task_id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn context(&self) -> &TaskContext;

    async fn get_config(&self) -> serde_json::Value;

    /// Merge `config` into the current settings; rejected settings are not kept
    async fn update_config(&self, config: serde_json::Value) -> Result<(), String>;

    async fn validate_config(&self) -> Result<(), String>;

    async fn execute(&self) -> TaskResult;

    /// Ask a running execution to stop at the next item boundary
    async fn cancel(&self) {
        self.context().request_cancel();
    }

    async fn progress(&self) -> TaskProgress {
        self.context().snapshot().await
    }
}

/// Apply a JSON object patch onto a typed config, keeping unspecified fields
pub fn merge_config<T>(current: &T, patch: &serde_json::Value) -> Result<T, String>
where
    T: Serialize + DeserializeOwned,
{
    let serde_json::Value::Object(patch) = patch else {
        return Err("task configuration must be a JSON object".to_string());
    };
    let mut merged = serde_json::to_value(current).map_err(|e| e.to_string())?;
    if let serde_json::Value::Object(fields) = &mut merged {
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged).map_err(|e| format!("invalid task configuration: {e}"))
}
