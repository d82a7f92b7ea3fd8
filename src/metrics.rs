use crate::job_store::{JobStats, JobStore};
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metric name prefix for all metrics of this server
const PREFIX: &str = "recipe_jobs";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Queue Metrics
    pub static ref JOBS_ENQUEUED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_enqueued_total"), "Jobs enqueued by type and outcome"),
        &["job_type", "outcome"]
    ).expect("Failed to create jobs_enqueued_total metric");

    pub static ref JOBS_BY_STATUS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_jobs"), "Jobs currently stored, by status"),
        &["status"]
    ).expect("Failed to create jobs metric");

    // Worker Metrics
    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Handler executions by type and status"),
        &["job_type", "status"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Handler execution time in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["job_type"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref WORKERS_REGISTERED: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_workers_registered"), "Started workers per job type"),
        &["job_type"]
    ).expect("Failed to create workers_registered metric");

    pub static ref WORKERS_BUSY: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_workers_busy"), "Workers currently running a job"),
        &["job_type"]
    ).expect("Failed to create workers_busy metric");

    // Scheduler Metrics
    pub static ref SCHEDULER_FIRINGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_scheduler_firings_total"), "Recurring job firings"),
        &["job_id", "outcome"]
    ).expect("Failed to create scheduler_firings_total metric");

    // Trending Metrics
    pub static ref TRENDING_ENTRIES: Gauge = Gauge::new(
        format!("{PREFIX}_trending_entries"),
        "Entries in the published trending snapshot"
    ).expect("Failed to create trending_entries metric");

    pub static ref TRENDING_SNAPSHOT_VERSION: Gauge = Gauge::new(
        format!("{PREFIX}_trending_snapshot_version"),
        "Version of the published trending snapshot"
    ).expect("Failed to create trending_snapshot_version metric");

    // Delivery Metrics
    pub static ref EMAILS_SENT_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_emails_sent_total"), "Recommendation emails by status"),
        &["status"]
    ).expect("Failed to create emails_sent_total metric");

    pub static ref IMPORTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_imports_total"), "Recipe imports by status"),
        &["status"]
    ).expect("Failed to create imports_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOBS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_BY_STATUS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(WORKERS_REGISTERED.clone()));
    let _ = REGISTRY.register(Box::new(WORKERS_BUSY.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULER_FIRINGS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRENDING_ENTRIES.clone()));
    let _ = REGISTRY.register(Box::new(TRENDING_SNAPSHOT_VERSION.clone()));
    let _ = REGISTRY.register(Box::new(EMAILS_SENT_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IMPORTS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_job_enqueued(job_type: &str, outcome: &str) {
    JOBS_ENQUEUED_TOTAL
        .with_label_values(&[job_type, outcome])
        .inc();
}

pub fn record_job_execution(job_type: &str, status: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();

    JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration.as_secs_f64());
}

pub fn set_workers_registered(job_type: &str, count: usize) {
    WORKERS_REGISTERED
        .with_label_values(&[job_type])
        .set(count as f64);
}

pub fn set_workers_busy(job_type: &str, count: usize) {
    WORKERS_BUSY.with_label_values(&[job_type]).set(count as f64);
}

pub fn record_scheduler_firing(job_id: &str, outcome: &str) {
    SCHEDULER_FIRINGS_TOTAL
        .with_label_values(&[job_id, outcome])
        .inc();
}

pub fn set_trending_snapshot(version: u64, entries: usize) {
    TRENDING_SNAPSHOT_VERSION.set(version as f64);
    TRENDING_ENTRIES.set(entries as f64);
}

pub fn record_email(status: &str) {
    EMAILS_SENT_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_import(status: &str) {
    IMPORTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn update_job_stats(stats: &JobStats) {
    for (status, count) in [
        ("pending", stats.pending),
        ("running", stats.running),
        ("succeeded", stats.succeeded),
        ("failed", stats.failed),
    ] {
        JOBS_BY_STATUS.with_label_values(&[status]).set(count as f64);
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler(State(job_store): State<Arc<dyn JobStore>>) -> impl IntoResponse {
    // Refresh queue depth before returning metrics
    match tokio::task::spawn_blocking(move || job_store.stats()).await {
        Ok(Ok(stats)) => update_job_stats(&stats),
        Ok(Err(e)) => tracing::warn!("Failed to read job stats: {:#}", e),
        Err(e) => tracing::warn!("Job stats task failed: {}", e),
    }

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

pub fn metrics_router(job_store: Arc<dyn JobStore>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(job_store)
}

/// Serve `/metrics` on `port` until `shutdown` is cancelled.
pub async fn run_metrics_server(
    port: u16,
    job_store: Arc<dyn JobStore>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    tracing::info!("Metrics available at port {}", port);

    axum::serve(listener, metrics_router(job_store))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Metrics server failed")
}
