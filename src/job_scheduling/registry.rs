//! Static table of built-in tasks
//!
//! Task identifiers map to plain constructor functions; the table is read
//! once at startup to build the task set handed to the scheduler.

use std::sync::Arc;

use super::task::ScheduledTask;
use super::tasks::{
    EPG_REFRESH_TASK_ID, EpgRefreshTask, ProbeAllTask, REPROBE_FAILED_TASK_ID,
    ReprobeFailedTask, STREAM_PROBE_TASK_ID, STRUCK_STREAM_CLEANUP_TASK_ID,
    StruckStreamCleanupTask,
};
use crate::client::ChannelManagerClient;
use crate::config::Config;
use crate::repositories::StreamStatsRepository;
use crate::services::probe_engine::StreamProbeEngine;

/// Everything a task constructor may need
#[derive(Clone)]
pub struct TaskDependencies {
    pub client: Arc<dyn ChannelManagerClient>,
    pub repository: Arc<dyn StreamStatsRepository>,
    /// Absent when no media prober could be set up
    pub engine: Option<Arc<StreamProbeEngine>>,
    pub config: Config,
}

type TaskConstructor = fn(&TaskDependencies) -> Arc<dyn ScheduledTask>;

const TASKS: &[(&str, TaskConstructor)] = &[
    (STREAM_PROBE_TASK_ID, build_stream_probe),
    (REPROBE_FAILED_TASK_ID, build_reprobe_failed),
    (STRUCK_STREAM_CLEANUP_TASK_ID, build_struck_cleanup),
    (EPG_REFRESH_TASK_ID, build_epg_refresh),
];

fn build_stream_probe(deps: &TaskDependencies) -> Arc<dyn ScheduledTask> {
    Arc::new(ProbeAllTask::new(
        deps.engine.clone(),
        deps.config.probing.refresh_accounts_before_probe,
    ))
}

fn build_reprobe_failed(deps: &TaskDependencies) -> Arc<dyn ScheduledTask> {
    Arc::new(ReprobeFailedTask::new(
        deps.engine.clone(),
        deps.repository.clone(),
    ))
}

fn build_struck_cleanup(deps: &TaskDependencies) -> Arc<dyn ScheduledTask> {
    Arc::new(StruckStreamCleanupTask::new(
        deps.client.clone(),
        deps.repository.clone(),
        deps.config.remote.page_size,
    ))
}

fn build_epg_refresh(deps: &TaskDependencies) -> Arc<dyn ScheduledTask> {
    Arc::new(EpgRefreshTask::new(
        deps.client.clone(),
        deps.config.refresh.clone(),
    ))
}

/// Identifiers of every built-in task, in registration order
pub fn task_ids() -> impl Iterator<Item = &'static str> {
    TASKS.iter().map(|(id, _)| *id)
}

pub fn build_task(task_id: &str, deps: &TaskDependencies) -> Option<Arc<dyn ScheduledTask>> {
    TASKS
        .iter()
        .find(|(id, _)| *id == task_id)
        .map(|(_, build)| build(deps))
}

pub fn build_tasks(deps: &TaskDependencies) -> Vec<Arc<dyn ScheduledTask>> {
    TASKS.iter().map(|(_, build)| build(deps)).collect()
}
