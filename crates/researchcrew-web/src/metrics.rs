use std::time::Duration;
use tracing::info;

use crate::state::RunMetrics;

pub fn run_started(topic_chars: usize, metrics: RunMetrics) {
    info!(
        target = "telemetry.web",
        topic_chars,
        running_runs = metrics.running,
        available_permits = metrics.available_permits,
        event = "run_started"
    );
}

pub fn run_completed(elapsed: Duration, failed_tasks: usize, saved: bool, metrics: RunMetrics) {
    info!(
        target = "telemetry.web",
        elapsed_ms = elapsed.as_millis() as u64,
        failed_tasks,
        saved,
        running_runs = metrics.running,
        available_permits = metrics.available_permits,
        event = "run_completed"
    );
}

pub fn run_failed(error: &str, metrics: RunMetrics) {
    info!(
        target = "telemetry.web",
        error,
        running_runs = metrics.running,
        available_permits = metrics.available_permits,
        event = "run_failed"
    );
}

pub fn run_rejected(metrics: RunMetrics) {
    info!(
        target = "telemetry.web",
        running_runs = metrics.running,
        max_concurrency = metrics.max_concurrency,
        event = "run_rejected"
    );
}

pub fn report_downloaded(file_name: &str, bytes: usize) {
    info!(
        target = "telemetry.web",
        file_name,
        bytes,
        event = "report_downloaded"
    );
}
