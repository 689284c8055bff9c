//! Built-in tasks
//!
//! Each task owns its settings behind a lock so `update_config` can swap
//! them between runs; an execution reads a copy at start.

pub mod epg_refresh;
pub mod probe_all;
pub mod reprobe_failed;
pub mod struck_cleanup;

pub use epg_refresh::EpgRefreshTask;
pub use probe_all::ProbeAllTask;
pub use reprobe_failed::ReprobeFailedTask;
pub use struck_cleanup::StruckStreamCleanupTask;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use super::task::TaskContext;
use super::types::{TaskProgress, TaskResult, error_codes};
use crate::services::probe_engine::{ProbeEngineError, ProbeRunSummary, StreamProbeEngine};

pub const STREAM_PROBE_TASK_ID: &str = "stream_probe";
pub const REPROBE_FAILED_TASK_ID: &str = "reprobe_failed";
pub const STRUCK_STREAM_CLEANUP_TASK_ID: &str = "struck_stream_cleanup";
pub const EPG_REFRESH_TASK_ID: &str = "epg_refresh";

/// How often a probe task copies the engine's progress into its own cell
const PROGRESS_MIRROR_INTERVAL: Duration = Duration::from_millis(250);

/// Marks a probe task as owning the current engine run
///
/// Cancelling a probe task forwards to the engine only while this is set,
/// so one task cannot stop a run started by another.
#[derive(Debug, Default)]
pub(crate) struct EngineRunFlag(AtomicBool);

impl EngineRunFlag {
    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct EngineRunGuard<'a>(&'a EngineRunFlag);

impl Drop for EngineRunGuard<'_> {
    fn drop(&mut self) {
        (self.0).0.store(false, Ordering::SeqCst);
    }
}

/// Forward a task cancel to the engine when the task owns the running probe
pub(crate) fn forward_cancel(engine: Option<&StreamProbeEngine>, flag: &EngineRunFlag) {
    if let Some(engine) = engine {
        if flag.is_active() {
            engine.cancel_probe();
        }
    }
}

/// Drive one engine run, mirroring progress and forwarding cancellation
///
/// Shared by the full probe and the failed-stream re-probe.
pub(crate) async fn run_engine(
    task_id: &str,
    context: &TaskContext,
    engine: &StreamProbeEngine,
    flag: &EngineRunFlag,
    started_at: DateTime<Utc>,
    stream_ids: Option<Vec<i64>>,
    skip_remote_refresh: bool,
) -> TaskResult {
    flag.0.store(true, Ordering::SeqCst);
    let _guard = EngineRunGuard(flag);
    let run = engine.probe_all_streams(stream_ids, skip_remote_refresh);
    tokio::pin!(run);
    let mut mirror = tokio::time::interval(PROGRESS_MIRROR_INTERVAL);

    let outcome = loop {
        tokio::select! {
            biased;
            outcome = &mut run => break outcome,
            _ = mirror.tick() => {
                if context.is_cancelled() {
                    engine.cancel_probe();
                }
                context.replace_progress(engine.progress().await).await;
            }
        }
    };

    match outcome {
        Ok(summary) => {
            context.replace_progress(engine.progress().await).await;
            result_from_summary(task_id, started_at, &summary)
        }
        Err(ProbeEngineError::AlreadyRunning) => {
            warn!(task_id, "Probe task skipped: another probe run holds the engine");
            TaskResult::fatal(
                task_id,
                started_at,
                error_codes::PROBE_ALREADY_RUNNING,
                "Another probe run is already in progress",
            )
        }
        Err(ProbeEngineError::Fetch(e)) => TaskResult::fatal(
            task_id,
            started_at,
            error_codes::FETCH_FAILED,
            format!("Failed to fetch streams: {e}"),
        ),
    }
}

fn result_from_summary(
    task_id: &str,
    started_at: DateTime<Utc>,
    summary: &ProbeRunSummary,
) -> TaskResult {
    let progress = TaskProgress {
        total: summary.total_streams,
        current: summary.processed(),
        status: String::new(),
        current_item: None,
        success_count: summary.success_count,
        failed_count: summary.failed_count,
        skipped_count: summary.skipped_count,
    };
    let result = if summary.cancelled {
        TaskResult::cancelled(
            task_id,
            started_at,
            &progress,
            format!(
                "Probe run cancelled after {} of {} streams",
                summary.processed(),
                summary.total_streams
            ),
        )
    } else {
        TaskResult::from_progress(
            task_id,
            started_at,
            &progress,
            format!(
                "Probed {} streams: {} ok, {} failed ({} timed out), {} skipped",
                summary.total_streams,
                summary.success_count,
                summary.failed_count,
                summary.timeout_count,
                summary.skipped_count
            ),
        )
    };
    result
        .with_detail("timeout_count", serde_json::json!(summary.timeout_count))
        .with_detail(
            "black_screen_count",
            serde_json::json!(summary.black_screen_count),
        )
        .with_errors(summary.errors.clone())
}
