use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_health::{
    client::{ChannelManagerClient, HttpChannelManagerClient},
    config::Config,
    database::Database,
    errors::AppError,
    job_scheduling::{TaskDependencies, TaskScheduler, build_task, build_tasks},
    observability::AppObservability,
    ordering::{StreamOrderingPipeline, apply_channel_order},
    repositories::{
        InMemoryStreamStatsRepository, StreamStatsRepository, StreamStatsSeaOrmRepository,
    },
    services::{FfprobeProber, StreamProbeEngine},
};

#[derive(Parser)]
#[command(name = "stream-health")]
#[command(version)]
#[command(about = "Stream health probing, ranking and scheduled maintenance for IPTV channels")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Keep stream statistics in memory instead of the database
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the task scheduler until interrupted (default)
    Serve,
    /// Run one task once and print its result as JSON
    Run {
        /// Task identifier, e.g. stream_probe
        task_id: String,
    },
    /// Probe a single URL and print the metrics
    Probe { url: String },
    /// Compute a channel's stream order from stored statistics
    Order {
        channel_id: i64,
        /// Write the computed order back to the channel manager
        #[arg(long)]
        apply: bool,
    },
}

struct Services {
    config: Config,
    client: Arc<dyn ChannelManagerClient>,
    repository: Arc<dyn StreamStatsRepository>,
    engine: Arc<StreamProbeEngine>,
    observability: AppObservability,
    _meter_provider: SdkMeterProvider,
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("stream_health={level}").into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn build_services(config: Config, ephemeral: bool) -> Result<Services> {
    let (observability, meter_provider) = AppObservability::new();

    let repository: Arc<dyn StreamStatsRepository> = if ephemeral {
        info!("Using in-memory stream statistics");
        Arc::new(InMemoryStreamStatsRepository::new())
    } else {
        info!("Using database: {}", config.database.url);
        let database = Database::new(&config.database).await?;
        database.migrate().await?;
        info!("Database connection established and migrations applied");
        Arc::new(StreamStatsSeaOrmRepository::new(database.connection()))
    };

    let client: Arc<dyn ChannelManagerClient> = Arc::new(
        HttpChannelManagerClient::new(&config.remote)
            .context("Failed to create channel manager client")?,
    );
    let prober = Arc::new(FfprobeProber::new(&config.probing));
    let engine = Arc::new(
        StreamProbeEngine::new(
            client.clone(),
            repository.clone(),
            prober,
            config.probing.clone(),
            config.remote.page_size,
        )
        .with_observability(observability.clone()),
    );

    Ok(Services {
        config,
        client,
        repository,
        engine,
        observability,
        _meter_provider: meter_provider,
    })
}

impl Services {
    fn dependencies(&self) -> TaskDependencies {
        TaskDependencies {
            client: self.client.clone(),
            repository: self.repository.clone(),
            engine: Some(self.engine.clone()),
            config: self.config.clone(),
        }
    }
}

async fn serve(services: Services) -> Result<()> {
    let scheduler = Arc::new(
        TaskScheduler::new(&services.config.scheduler)
            .with_observability(services.observability.clone()),
    );
    scheduler
        .register_all(
            build_tasks(&services.dependencies()),
            &services.config.scheduler,
        )
        .await?;
    for status in scheduler.list_status().await {
        info!(
            task_id = %status.task_id,
            enabled = status.enabled,
            next_run = ?status.next_run,
            "Task registered"
        );
    }

    let mut completions = scheduler.subscribe();
    tokio::spawn(async move {
        while let Ok(completion) = completions.recv().await {
            info!(
                task_id = %completion.task_id,
                state = %completion.state,
                message = %completion.result.message,
                "Task finished"
            );
        }
    });

    let token = CancellationToken::new();
    let runner = tokio::spawn(scheduler.clone().run(token.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    token.cancel();
    runner.await.context("Scheduler task failed")?;
    Ok(())
}

async fn run_task(services: Services, task_id: &str) -> Result<()> {
    let task = build_task(task_id, &services.dependencies())
        .with_context(|| format!("Unknown task '{task_id}'"))?;
    if let Some(settings) = services
        .config
        .scheduler
        .tasks
        .get(task_id)
        .and_then(|entry| entry.config.clone())
    {
        task.update_config(settings)
            .await
            .map_err(|e| anyhow::anyhow!("Invalid configuration for '{task_id}': {e}"))?;
    }

    let execution = task.execute();
    tokio::pin!(execution);
    let result = tokio::select! {
        result = &mut execution => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(task_id, "Interrupted, cancelling task");
            task.cancel().await;
            execution.await
        }
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!(
            "Task '{task_id}' did not succeed ({})",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn probe_url(services: Services, url: &str) -> Result<()> {
    let (metrics, black_screen) = services
        .engine
        .probe_url(url)
        .await
        .with_context(|| format!("Probe of {url} failed"))?;
    let output = serde_json::json!({
        "url": url,
        "metrics": metrics,
        "is_black_screen": black_screen,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn order_channel(services: Services, channel_id: i64, apply: bool) -> Result<()> {
    let channel = services
        .client
        .get_all_channels(services.config.remote.page_size)
        .await?
        .into_iter()
        .find(|c| c.id == channel_id)
        .ok_or_else(|| AppError::not_found("channel", channel_id.to_string()))?;

    let streams: HashMap<_, _> = services
        .client
        .get_streams_by_ids(&channel.streams)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();
    let stats = services.repository.get_many(&channel.streams).await?;

    let pipeline = StreamOrderingPipeline::new(services.config.ordering.clone());
    let ordered = pipeline.order_channel(&channel.streams, &streams, &stats);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "channel_id": channel.id,
            "channel_name": channel.name,
            "current": channel.streams,
            "ordered": ordered.ordered,
            "excluded": ordered.excluded,
        }))?
    );

    if apply {
        apply_channel_order(services.client.as_ref(), channel.id, &ordered.ordered).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    info!("Starting stream-health v{}", env!("CARGO_PKG_VERSION"));
    let config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    let services = build_services(config, cli.ephemeral).await?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(services).await,
        Command::Run { task_id } => run_task(services, &task_id).await,
        Command::Probe { url } => probe_url(services, &url).await,
        Command::Order { channel_id, apply } => order_channel(services, channel_id, apply).await,
    }
}
