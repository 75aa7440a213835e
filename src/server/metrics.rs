use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all billing metrics
const PREFIX: &str = "rental_billing";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Billing Metrics
    pub static ref INVOICES_GENERATED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_invoices_generated_total"),
        "Total recurring invoices generated"
    ).expect("Failed to create invoices_generated_total metric");

    pub static ref SCHEDULES_FAILED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_schedules_failed_total"),
            "Recurring schedules that failed to generate, by reason"
        ),
        &["reason"]
    ).expect("Failed to create schedules_failed_total metric");

    pub static ref INVOICES_MARKED_OVERDUE_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_invoices_marked_overdue_total"),
        "Total invoices moved from pending to overdue"
    ).expect("Failed to create invoices_marked_overdue_total metric");

    pub static ref INVOICE_LINES_REPAIRED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_invoice_lines_repaired_total"),
        "Invoice lines written to complete an invoice left partial by an earlier run"
    ).expect("Failed to create invoice_lines_repaired_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_executions_total"),
            "Background job executions by outcome"
        ),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_running"),
            "Whether a background job is currently running (1) or not (0)"
        ),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(INVOICES_GENERATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULES_FAILED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INVOICES_MARKED_OVERDUE_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INVOICE_LINES_REPAIRED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_invoice_generated() {
    INVOICES_GENERATED_TOTAL.inc();
}

pub fn record_schedule_failed(reason: &str) {
    SCHEDULES_FAILED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_invoices_marked_overdue(count: usize) {
    INVOICES_MARKED_OVERDUE_TOTAL.inc_by(count as f64);
}

pub fn record_invoice_lines_repaired(count: usize) {
    INVOICE_LINES_REPAIRED_TOTAL.inc_by(count as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
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
