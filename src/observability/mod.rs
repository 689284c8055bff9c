use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter, MeterProvider},
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::time::Duration;
use tracing::info;

const METER_NAME: &str = "stream-health";

/// Metrics instruments for probing and task execution
#[derive(Clone)]
pub struct AppObservability {
    pub meter: Meter,

    pub stream_probes: Counter<u64>,
    pub stream_probe_duration: Histogram<f64>,
    pub black_screens_detected: Counter<u64>,

    pub task_runs: Counter<u64>,
    pub task_duration: Histogram<f64>,
}

impl AppObservability {
    /// Install an SDK meter provider as the global provider and build instruments from it
    pub fn new() -> (Self, SdkMeterProvider) {
        let provider = SdkMeterProvider::builder().build();
        global::set_meter_provider(provider.clone());

        let meter = provider.meter(METER_NAME);
        info!("OpenTelemetry configured: local metrics only");
        (Self::build_with_instruments(meter), provider)
    }

    /// Instruments bound to whatever global provider is installed; no-op when none is
    pub fn from_global() -> Self {
        Self::build_with_instruments(global::meter(METER_NAME))
    }

    fn build_with_instruments(meter: Meter) -> Self {
        let stream_probes = meter
            .u64_counter("stream_probes_total")
            .with_description("Stream probes by outcome")
            .build();
        let stream_probe_duration = meter
            .f64_histogram("stream_probe_duration_seconds")
            .with_description("Wall time of a single stream probe")
            .build();
        let black_screens_detected = meter
            .u64_counter("black_screens_detected_total")
            .with_description("Successful probes classified as black screen")
            .build();
        let task_runs = meter
            .u64_counter("scheduled_task_runs_total")
            .with_description("Scheduled task executions by outcome")
            .build();
        let task_duration = meter
            .f64_histogram("scheduled_task_duration_seconds")
            .with_description("Wall time of a scheduled task execution")
            .build();

        Self {
            meter,
            stream_probes,
            stream_probe_duration,
            black_screens_detected,
            task_runs,
            task_duration,
        }
    }

    pub fn record_probe(&self, status: &str, elapsed: Duration, is_black_screen: bool) {
        let attributes = [KeyValue::new("status", status.to_string())];
        self.stream_probes.add(1, &attributes);
        self.stream_probe_duration
            .record(elapsed.as_secs_f64(), &attributes);
        if is_black_screen {
            self.black_screens_detected.add(1, &[]);
        }
    }

    pub fn record_task_run(&self, task_id: &str, outcome: &str, elapsed: Duration) {
        let attributes = [
            KeyValue::new("task_id", task_id.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.task_runs.add(1, &attributes);
        self.task_duration.record(elapsed.as_secs_f64(), &attributes);
    }
}

impl Default for AppObservability {
    fn default() -> Self {
        Self::from_global()
    }
}
