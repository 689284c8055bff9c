//! Task scheduler lifecycle through the public API

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use stream_health::{
    client::HttpChannelManagerClient,
    config::{Config, SchedulerConfig, TaskScheduleEntry},
    job_scheduling::{
        JobSchedulingError, ProgressUpdate, ScheduleConfig, ScheduledTask, TaskContext,
        TaskDependencies, TaskResult, TaskScheduler, TaskState, build_tasks, error_codes,
        merge_config,
    },
    repositories::InMemoryStreamStatsRepository,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchSettings {
    items: usize,
    fail_every: usize,
}

/// Processes `items` items, failing every `fail_every`th one
struct BatchTask {
    id: &'static str,
    settings: RwLock<BatchSettings>,
    context: TaskContext,
    step: Duration,
    runs: AtomicUsize,
}

impl BatchTask {
    fn new(id: &'static str, items: usize, step: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            settings: RwLock::new(BatchSettings {
                items,
                fail_every: 0,
            }),
            context: TaskContext::new(),
            step,
            runs: AtomicUsize::new(0),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

fn check(settings: &BatchSettings) -> Result<(), String> {
    if settings.items == 0 {
        return Err("items must be greater than zero".to_string());
    }
    Ok(())
}

#[async_trait]
impl ScheduledTask for BatchTask {
    fn task_id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        "Batch"
    }

    fn description(&self) -> &str {
        "Processes a fixed batch of items"
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
        check(&merged)?;
        *settings = merged;
        Ok(())
    }

    async fn validate_config(&self) -> Result<(), String> {
        check(&*self.settings.read().await)
    }

    async fn execute(&self) -> TaskResult {
        let started_at = Utc::now();
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.context.begin("processing").await;
        let settings = self.settings.read().await.clone();
        self.context
            .set_progress(ProgressUpdate::status("processing").with_total(settings.items))
            .await;

        for item in 1..=settings.items {
            if self.context.is_cancelled() {
                let progress = self.context.snapshot().await;
                return TaskResult::cancelled(self.id, started_at, &progress, "Batch cancelled");
            }
            tokio::time::sleep(self.step).await;
            if settings.fail_every > 0 && item % settings.fail_every == 0 {
                self.context.increment_progress(0, 1, 0).await;
            } else {
                self.context.increment_progress(1, 0, 0).await;
            }
        }

        let progress = self.context.snapshot().await;
        TaskResult::from_progress(self.id, started_at, &progress, "Batch processed")
    }
}

fn scheduler_config(tasks: BTreeMap<String, TaskScheduleEntry>) -> SchedulerConfig {
    SchedulerConfig {
        check_interval: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(5),
        tasks,
    }
}

async fn wait_for_state(scheduler: &TaskScheduler, task_id: &str, state: TaskState) {
    for _ in 0..500 {
        if scheduler.status(task_id).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {state}");
}

#[tokio::test]
async fn test_trigger_collect_and_notify() {
    let scheduler = Arc::new(TaskScheduler::new(&scheduler_config(BTreeMap::new())));
    let task = BatchTask::new("batch", 4, Duration::from_millis(1));
    scheduler
        .register(task.clone(), ScheduleConfig::Manual, true)
        .await
        .unwrap();
    scheduler
        .update_task_config("batch", serde_json::json!({ "fail_every": 2 }))
        .await
        .unwrap();

    let mut completions = scheduler.subscribe();
    scheduler.trigger("batch").await.unwrap();
    let completion = tokio::time::timeout(Duration::from_secs(5), completions.recv())
        .await
        .expect("completion arrives")
        .unwrap();
    assert_eq!(completion.task_id, "batch");
    assert_eq!(completion.state, TaskState::Completed);
    // Half the items failed, which is still a success
    assert!(completion.result.success);
    assert_eq!(completion.result.success_count, 2);
    assert_eq!(completion.result.failed_count, 2);

    let status = scheduler.status("batch").await.unwrap();
    assert_eq!(status.state, TaskState::Completed);
    assert!(status.progress.is_none());
    assert!(status.last_run.is_some());

    let result = scheduler.take_result("batch").await.unwrap();
    assert_eq!(result.map(|r| r.total_items), Some(4));
    assert_eq!(scheduler.status("batch").await.unwrap().state, TaskState::Idle);
    // Collected once; the result stays visible in the status
    assert!(scheduler.take_result("batch").await.unwrap().is_none());
    assert!(
        scheduler
            .status("batch")
            .await
            .unwrap()
            .last_result
            .is_some()
    );
}

#[tokio::test]
async fn test_every_item_failing_marks_task_failed() {
    let scheduler = Arc::new(TaskScheduler::new(&scheduler_config(BTreeMap::new())));
    let task = BatchTask::new("batch", 3, Duration::from_millis(1));
    scheduler
        .register(task, ScheduleConfig::Manual, true)
        .await
        .unwrap();
    scheduler
        .update_task_config("batch", serde_json::json!({ "fail_every": 1 }))
        .await
        .unwrap();

    scheduler.trigger("batch").await.unwrap();
    wait_for_state(&scheduler, "batch", TaskState::Failed).await;
    let result = scheduler.take_result("batch").await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(error_codes::ALL_FAILED));
}

#[tokio::test]
async fn test_running_task_reports_progress_and_can_be_cancelled() {
    let scheduler = Arc::new(TaskScheduler::new(&scheduler_config(BTreeMap::new())));
    let task = BatchTask::new("slow", 1_000, Duration::from_millis(5));
    scheduler
        .register(task.clone(), ScheduleConfig::Manual, true)
        .await
        .unwrap();

    scheduler.trigger("slow").await.unwrap();
    assert!(matches!(
        scheduler.trigger("slow").await,
        Err(JobSchedulingError::AlreadyRunning { .. })
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = scheduler.status("slow").await.unwrap();
    assert_eq!(status.state, TaskState::Running);
    let progress = status.progress.expect("running tasks expose progress");
    assert_eq!(progress.total, 1_000);

    scheduler.cancel("slow").await.unwrap();
    wait_for_state(&scheduler, "slow", TaskState::Cancelled).await;
    let result = scheduler.take_result("slow").await.unwrap().unwrap();
    assert!(result.is_cancelled());
    assert!(result.success_count < 1_000);
    assert_eq!(task.runs(), 1);

    assert!(matches!(
        scheduler.cancel("slow").await,
        Err(JobSchedulingError::NotRunning { .. })
    ));
}

#[tokio::test]
async fn test_cancel_issued_immediately_after_trigger_stops_the_run() {
    let scheduler = Arc::new(TaskScheduler::new(&scheduler_config(BTreeMap::new())));
    let task = BatchTask::new("early", 200, Duration::from_millis(5));
    scheduler
        .register(task.clone(), ScheduleConfig::Manual, true)
        .await
        .unwrap();

    scheduler.trigger("early").await.unwrap();
    scheduler.cancel("early").await.unwrap();
    // 200 items at 5ms would take a second; a kept cancel ends far sooner
    let state = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            let state = scheduler.status("early").await.unwrap().state;
            if state.is_finished() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cancelled run finishes early");
    assert_eq!(state, TaskState::Cancelled);
    let result = scheduler.take_result("early").await.unwrap().unwrap();
    assert_eq!(result.error.as_deref(), Some(error_codes::CANCELLED));
    assert_eq!(result.success_count, 0);
}

#[tokio::test]
async fn test_shutdown_right_after_trigger_does_not_wait_out_grace() {
    let mut config = scheduler_config(BTreeMap::new());
    config.shutdown_grace = Duration::from_secs(10);
    let scheduler = Arc::new(TaskScheduler::new(&config));
    let task = BatchTask::new("long", 10_000, Duration::from_millis(5));
    scheduler
        .register(task, ScheduleConfig::Manual, true)
        .await
        .unwrap();

    scheduler.trigger("long").await.unwrap();
    let started = std::time::Instant::now();
    scheduler.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        scheduler.status("long").await.unwrap().state,
        TaskState::Cancelled
    );
}

#[tokio::test]
async fn test_due_interval_tasks_fire_and_disabled_ones_do_not() {
    let scheduler = Arc::new(TaskScheduler::new(&scheduler_config(BTreeMap::new())));
    let hourly = BatchTask::new("hourly", 1, Duration::ZERO);
    let paused = BatchTask::new("paused", 1, Duration::ZERO);
    let manual = BatchTask::new("manual", 1, Duration::ZERO);
    let interval = ScheduleConfig::Interval {
        interval_seconds: 3600,
    };
    scheduler
        .register(hourly.clone(), interval.clone(), true)
        .await
        .unwrap();
    scheduler
        .register(paused.clone(), interval, false)
        .await
        .unwrap();
    scheduler
        .register(manual.clone(), ScheduleConfig::Manual, true)
        .await
        .unwrap();

    let now = Utc::now();
    assert!(scheduler.run_due_tasks(now).await.is_empty());

    let later = now + ChronoDuration::minutes(61);
    assert_eq!(scheduler.run_due_tasks(later).await, vec!["hourly".to_string()]);
    wait_for_state(&scheduler, "hourly", TaskState::Completed).await;
    assert_eq!(hourly.runs(), 1);
    assert_eq!(paused.runs(), 0);
    assert_eq!(manual.runs(), 0);

    // The interval restarts from the run that just happened
    let next = scheduler.status("hourly").await.unwrap().next_run.unwrap();
    assert!(next > now + ChronoDuration::minutes(59));
    assert!(scheduler.status("paused").await.unwrap().next_run.is_none());
}

#[tokio::test]
async fn test_register_all_applies_configured_settings() {
    let mut entries = BTreeMap::new();
    entries.insert(
        "configured".to_string(),
        TaskScheduleEntry {
            enabled: false,
            schedule: ScheduleConfig::Daily {
                time: "02:15".to_string(),
            },
            config: Some(serde_json::json!({ "items": 9 })),
        },
    );
    let config = scheduler_config(entries);
    let scheduler = TaskScheduler::new(&config);

    scheduler
        .register_all(
            vec![
                BatchTask::new("configured", 1, Duration::ZERO) as Arc<dyn ScheduledTask>,
                BatchTask::new("unlisted", 1, Duration::ZERO),
            ],
            &config,
        )
        .await
        .unwrap();

    let configured = scheduler.status("configured").await.unwrap();
    assert!(!configured.enabled);
    assert_eq!(
        configured.schedule,
        ScheduleConfig::Daily {
            time: "02:15".to_string()
        }
    );
    assert_eq!(
        scheduler.task_config("configured").await.unwrap()["items"],
        serde_json::json!(9)
    );
    let unlisted = scheduler.status("unlisted").await.unwrap();
    assert_eq!(unlisted.schedule, ScheduleConfig::Manual);
    assert_eq!(scheduler.list_status().await.len(), 2);
}

#[tokio::test]
async fn test_invalid_settings_and_schedules_are_rejected() {
    let scheduler = TaskScheduler::new(&scheduler_config(BTreeMap::new()));
    scheduler
        .register(
            BatchTask::new("batch", 2, Duration::ZERO),
            ScheduleConfig::Manual,
            true,
        )
        .await
        .unwrap();

    assert!(matches!(
        scheduler
            .update_task_config("batch", serde_json::json!({ "items": 0 }))
            .await,
        Err(JobSchedulingError::InvalidConfig { .. })
    ));
    assert_eq!(
        scheduler.task_config("batch").await.unwrap()["items"],
        serde_json::json!(2)
    );

    assert!(matches!(
        scheduler
            .update_schedule(
                "batch",
                ScheduleConfig::Cron {
                    expression: "not a cron".to_string()
                }
            )
            .await,
        Err(JobSchedulingError::InvalidSchedule { .. })
    ));
    assert!(matches!(
        scheduler
            .register(
                BatchTask::new("other", 1, Duration::ZERO),
                ScheduleConfig::Interval {
                    interval_seconds: 0
                },
                true,
            )
            .await,
        Err(JobSchedulingError::InvalidSchedule { .. })
    ));
    assert!(matches!(
        scheduler.status("missing").await,
        Err(JobSchedulingError::UnknownTask { .. })
    ));
}

#[tokio::test]
async fn test_run_loop_shutdown_cancels_running_tasks() {
    let scheduler = Arc::new(TaskScheduler::new(&scheduler_config(BTreeMap::new())));
    let task = BatchTask::new("long", 10_000, Duration::from_millis(5));
    scheduler
        .register(task, ScheduleConfig::Manual, true)
        .await
        .unwrap();

    let token = CancellationToken::new();
    let runner = tokio::spawn(scheduler.clone().run(token.clone()));
    scheduler.trigger("long").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("scheduler stops within the grace period")
        .unwrap();
    assert_eq!(
        scheduler.status("long").await.unwrap().state,
        TaskState::Cancelled
    );
}

#[tokio::test]
async fn test_built_in_probe_task_without_prober_fails_cleanly() {
    let config = Config::default();
    let deps = TaskDependencies {
        client: Arc::new(HttpChannelManagerClient::new(&config.remote).unwrap()),
        repository: Arc::new(InMemoryStreamStatsRepository::new()),
        engine: None,
        config: config.clone(),
    };
    let scheduler = Arc::new(TaskScheduler::new(&config.scheduler));
    scheduler
        .register_all(build_tasks(&deps), &config.scheduler)
        .await
        .unwrap();
    assert_eq!(scheduler.list_status().await.len(), 4);

    scheduler.trigger("stream_probe").await.unwrap();
    wait_for_state(&scheduler, "stream_probe", TaskState::Failed).await;
    let result = scheduler.take_result("stream_probe").await.unwrap().unwrap();
    assert_eq!(result.error.as_deref(), Some(error_codes::NO_PROBER));
}
