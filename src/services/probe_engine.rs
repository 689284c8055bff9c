//! Concurrent stream probing
//!
//! A probe run fetches the stream list from the channel manager, probes each
//! stream with bounded parallelism and persists the outcome. Only one run may
//! be active per engine; the check-and-set on `probing_in_progress` is the
//! single mutual exclusion point for every probe-triggering task.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::ChannelManagerClient;
use crate::config::ProbingConfig;
use crate::errors::{ClientError, ProbeError};
use crate::job_scheduling::types::TaskProgress;
use crate::models::{ProbeMetrics, ProbeStatus, Stream};
use crate::observability::AppObservability;
use crate::repositories::StreamStatsRepository;
use crate::services::stream_prober::MediaProber;

#[derive(Debug, Error)]
pub enum ProbeEngineError {
    #[error("A probe run is already in progress")]
    AlreadyRunning,

    #[error("Failed to fetch streams: {0}")]
    Fetch(#[from] ClientError),
}

/// Record of the most recent probe run
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRunSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_streams: usize,
    pub success_count: usize,
    /// Failed and timed out probes
    pub failed_count: usize,
    pub timeout_count: usize,
    pub skipped_count: usize,
    pub black_screen_count: usize,
    pub cancelled: bool,
    /// "stream_id: reason" for every failed or skipped stream
    pub errors: Vec<String>,
}

impl ProbeRunSummary {
    pub fn processed(&self) -> usize {
        self.success_count + self.failed_count + self.skipped_count
    }
}

/// What happened to one stream in a run
#[derive(Debug)]
enum StreamOutcome {
    Success { is_black_screen: bool },
    Failed(String),
    TimedOut(String),
    Skipped(String),
    /// Cancellation was seen before this stream started
    NotStarted,
}

/// Clears the in-progress flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct StreamProbeEngine {
    client: Arc<dyn ChannelManagerClient>,
    repository: Arc<dyn StreamStatsRepository>,
    prober: Arc<dyn MediaProber>,
    config: ProbingConfig,
    page_size: u32,
    observability: AppObservability,
    probing_in_progress: AtomicBool,
    cancel_requested: AtomicBool,
    progress: RwLock<TaskProgress>,
    last_run: RwLock<Option<ProbeRunSummary>>,
}

impl StreamProbeEngine {
    pub fn new(
        client: Arc<dyn ChannelManagerClient>,
        repository: Arc<dyn StreamStatsRepository>,
        prober: Arc<dyn MediaProber>,
        config: ProbingConfig,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            repository,
            prober,
            config,
            page_size,
            observability: AppObservability::default(),
            probing_in_progress: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            progress: RwLock::new(TaskProgress::default()),
            last_run: RwLock::new(None),
        }
    }

    pub fn with_observability(mut self, observability: AppObservability) -> Self {
        self.observability = observability;
        self
    }

    pub fn is_probing(&self) -> bool {
        self.probing_in_progress.load(Ordering::SeqCst)
    }

    /// Stop starting new probes; probes already in flight finish
    pub fn cancel_probe(&self) {
        if self.is_probing() {
            info!("Probe run cancellation requested");
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub async fn progress(&self) -> TaskProgress {
        self.progress.read().await.clone()
    }

    pub async fn last_run(&self) -> Option<ProbeRunSummary> {
        self.last_run.read().await.clone()
    }

    /// Probe every known stream, or only `stream_ids` when given
    ///
    /// Returns [`ProbeEngineError::AlreadyRunning`] without touching progress
    /// or counters when another run holds the engine.
    pub async fn probe_all_streams(
        &self,
        stream_ids: Option<Vec<i64>>,
        skip_remote_refresh: bool,
    ) -> Result<ProbeRunSummary, ProbeEngineError> {
        if self
            .probing_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Probe run rejected: another run is in progress");
            return Err(ProbeEngineError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.probing_in_progress);

        self.cancel_requested.store(false, Ordering::SeqCst);
        let started_at = Utc::now();
        *self.progress.write().await = TaskProgress {
            status: "starting".to_string(),
            ..TaskProgress::default()
        };

        if !skip_remote_refresh {
            self.refresh_accounts().await;
        }

        self.set_status("fetching streams").await;
        let streams = match &stream_ids {
            Some(ids) => self.client.get_streams_by_ids(ids).await,
            None => self.client.get_all_streams(self.page_size).await,
        };
        let streams = match streams {
            Ok(streams) => streams,
            Err(e) => {
                warn!(error = %e, "Failed to fetch streams for probing");
                self.set_status("failed").await;
                return Err(e.into());
            }
        };

        let total = streams.len();
        let concurrency = self.config.effective_max_concurrent_probes();
        info!(
            total,
            concurrency,
            filtered = stream_ids.is_some(),
            "Starting probe run"
        );
        {
            let mut progress = self.progress.write().await;
            progress.total = total;
            progress.status = "probing".to_string();
        }

        let outcomes: Vec<(i64, StreamOutcome)> = stream::iter(streams)
            .map(|stream| async move {
                let id = stream.id;
                (id, self.probe_stream(stream).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // A cancel that arrives after the last stream started changes nothing
        let cancel_seen = self.cancel_requested.load(Ordering::SeqCst);
        let summary = Self::summarize(started_at, total, cancel_seen, outcomes);
        let cancelled = summary.cancelled;

        {
            let mut progress = self.progress.write().await;
            progress.status = if cancelled { "cancelled" } else { "completed" }.to_string();
            progress.current_item = None;
        }
        *self.last_run.write().await = Some(summary.clone());

        info!(
            total = summary.total_streams,
            success = summary.success_count,
            failed = summary.failed_count,
            timeouts = summary.timeout_count,
            skipped = summary.skipped_count,
            black = summary.black_screen_count,
            cancelled,
            "Probe run finished"
        );
        Ok(summary)
    }

    /// Probe one URL outside of any run; nothing is persisted
    ///
    /// A failed black screen check leaves the verdict unknown, as in a run.
    pub async fn probe_url(&self, url: &str) -> Result<(ProbeMetrics, Option<bool>), ProbeError> {
        let metrics = self.prober.probe(url).await?;
        let black = self.black_screen_verdict(url).await;
        Ok((metrics, black))
    }

    async fn refresh_accounts(&self) {
        self.set_status("refreshing accounts").await;
        let accounts = match self.client.get_m3u_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "Could not list M3U accounts, probing without refresh");
                return;
            }
        };
        for account in accounts.iter().filter(|a| a.is_active) {
            if self.cancel_requested.load(Ordering::SeqCst) {
                break;
            }
            match self.client.refresh_m3u_account(account.id).await {
                Ok(()) => debug!(account_id = account.id, "Refreshed M3U account"),
                Err(e) => warn!(account_id = account.id, error = %e, "M3U account refresh failed"),
            }
        }
    }

    async fn probe_stream(&self, stream: Stream) -> StreamOutcome {
        if self.cancel_requested.load(Ordering::SeqCst) {
            return StreamOutcome::NotStarted;
        }
        self.progress.write().await.current_item = Some(stream.name.clone());

        let outcome = match stream.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            None => StreamOutcome::Skipped("no stream URL".to_string()),
            Some(url) => self.probe_and_record(stream.id, url).await,
        };

        let mut progress = self.progress.write().await;
        progress.current += 1;
        match &outcome {
            StreamOutcome::Success { .. } => progress.success_count += 1,
            StreamOutcome::Failed(_) | StreamOutcome::TimedOut(_) => progress.failed_count += 1,
            StreamOutcome::Skipped(_) => progress.skipped_count += 1,
            StreamOutcome::NotStarted => {}
        }
        outcome
    }

    async fn probe_and_record(&self, stream_id: i64, url: &str) -> StreamOutcome {
        let started = Instant::now();
        let outcome = match self.prober.probe(url).await {
            Ok(metrics) => {
                let is_black_screen = self.detect_black_screen(stream_id, url).await;
                match self
                    .repository
                    .record_success(stream_id, metrics, is_black_screen)
                    .await
                {
                    Ok(_) => StreamOutcome::Success {
                        is_black_screen: is_black_screen == Some(true),
                    },
                    Err(e) => {
                        warn!(stream_id, error = %e, "Failed to store probe result");
                        StreamOutcome::Failed(format!("storing result failed: {e}"))
                    }
                }
            }
            Err(e) => {
                let status = if e.is_timeout() {
                    ProbeStatus::Timeout
                } else {
                    ProbeStatus::Failed
                };
                debug!(stream_id, %status, error = %e, "Probe failed");
                if let Err(store_err) = self
                    .repository
                    .record_failure(stream_id, status, Some(e.to_string()))
                    .await
                {
                    warn!(stream_id, error = %store_err, "Failed to store probe failure");
                }
                if e.is_timeout() {
                    StreamOutcome::TimedOut(e.to_string())
                } else {
                    StreamOutcome::Failed(e.to_string())
                }
            }
        };

        let (label, black) = match &outcome {
            StreamOutcome::Success { is_black_screen } => ("success", *is_black_screen),
            StreamOutcome::TimedOut(_) => ("timeout", false),
            _ => ("failed", false),
        };
        self.observability.record_probe(label, started.elapsed(), black);
        outcome
    }

    async fn detect_black_screen(&self, stream_id: i64, url: &str) -> Option<bool> {
        let black = self.black_screen_verdict(url).await;
        if black == Some(true) {
            info!(stream_id, "Stream classified as black screen");
        }
        black
    }

    /// Black screen verdict, or `None` when detection is off or could not run
    async fn black_screen_verdict(&self, url: &str) -> Option<bool> {
        if !self.config.black_screen_detection {
            return None;
        }
        let sample = self.config.effective_black_screen_sample_secs();
        match self.prober.detect_black_screen(url, sample).await {
            Ok(black) => Some(black),
            Err(e) => {
                warn!(%url, error = %e, "Black screen detection failed");
                None
            }
        }
    }

    async fn set_status(&self, status: &str) {
        self.progress.write().await.status = status.to_string();
    }

    fn summarize(
        started_at: DateTime<Utc>,
        total: usize,
        cancelled: bool,
        outcomes: Vec<(i64, StreamOutcome)>,
    ) -> ProbeRunSummary {
        let mut summary = ProbeRunSummary {
            started_at,
            completed_at: Utc::now(),
            total_streams: total,
            success_count: 0,
            failed_count: 0,
            timeout_count: 0,
            skipped_count: 0,
            black_screen_count: 0,
            cancelled,
            errors: Vec::new(),
        };
        for (stream_id, outcome) in outcomes {
            match outcome {
                StreamOutcome::Success { is_black_screen } => {
                    summary.success_count += 1;
                    if is_black_screen {
                        summary.black_screen_count += 1;
                    }
                }
                StreamOutcome::Failed(reason) => {
                    summary.failed_count += 1;
                    summary.errors.push(format!("{stream_id}: {reason}"));
                }
                StreamOutcome::TimedOut(reason) => {
                    summary.failed_count += 1;
                    summary.timeout_count += 1;
                    summary.errors.push(format!("{stream_id}: {reason}"));
                }
                StreamOutcome::Skipped(reason) => {
                    summary.skipped_count += 1;
                    summary.errors.push(format!("{stream_id}: {reason}"));
                }
                StreamOutcome::NotStarted => {}
            }
        }
        summary.errors.sort();
        summary.cancelled = cancelled && summary.processed() < total;
        summary
    }
}
