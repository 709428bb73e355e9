//! Prometheus metrics for the scheduler and fetch layer
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! Until then (and if registration fails) every recording call is a no-op,
//! which keeps library users and tests free of global registry state.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    dispatches: Counter,
    jobs: CounterVec,
    job_duration: HistogramVec,
    items_persisted: Counter,
    dedup_stops: Counter,
    retry_waits: CounterVec,
    retry_wait_seconds: CounterVec,
    queue_depth: Gauge,
}

static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SchedulerMetrics {
        dispatches: register_counter!(
            "tidewatch_dispatches_total",
            "Total scrape jobs handed to the worker pool"
        )?,
        jobs: register_counter_vec!(
            "tidewatch_jobs_total",
            "Completed scrape jobs by outcome",
            &["outcome"]
        )?,
        job_duration: register_histogram_vec!(
            "tidewatch_job_duration_seconds",
            "Time spent in one scrape job",
            &["outcome"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
        )?,
        items_persisted: register_counter!(
            "tidewatch_items_persisted_total",
            "Total new items inserted into the store"
        )?,
        dedup_stops: register_counter!(
            "tidewatch_dedup_stops_total",
            "Fetches that stopped on an already known item"
        )?,
        retry_waits: register_counter_vec!(
            "tidewatch_retry_waits_total",
            "Waits performed by the backoff wrapper",
            &["kind"]
        )?,
        retry_wait_seconds: register_counter_vec!(
            "tidewatch_retry_wait_seconds_total",
            "Seconds spent waiting in the backoff wrapper",
            &["kind"]
        )?,
        queue_depth: register_gauge!(
            "tidewatch_queue_depth",
            "Number of terms waiting in the task queue"
        )?,
    };

    SCHEDULER_METRICS
        .set(metrics)
        .map_err(|_| "Scheduler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a dispatch decision
pub fn record_dispatch() {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.dispatches.inc();
    }
}

/// Record a finished job
pub fn record_job(success: bool, duration: Duration) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    let outcome = if success { "success" } else { "failure" };
    m.jobs.with_label_values(&[outcome]).inc();
    m.job_duration
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

/// Record items inserted for a term
pub fn record_items_persisted(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.items_persisted.inc_by(count as f64);
    }
}

/// Record a fetch that ended on a known item
pub fn record_dedup_stop() {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.dedup_stops.inc();
    }
}

/// Record one backoff wait
pub fn record_retry_wait(kind: &str, wait: Duration) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    m.retry_waits.with_label_values(&[kind]).inc();
    m.retry_wait_seconds
        .with_label_values(&[kind])
        .inc_by(wait.as_secs_f64());
}

/// Update the queue depth gauge
pub fn set_queue_depth(depth: usize) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.queue_depth.set(depth as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_is_safe_without_init() {
        record_dispatch();
        record_job(true, Duration::from_secs(1));
        record_items_persisted(3);
        record_retry_wait("transient", Duration::from_secs(5));
        set_queue_depth(2);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());

        record_dispatch();
        let text = encode_metrics().unwrap();
        assert!(text.contains("tidewatch_dispatches_total"));
    }
}
