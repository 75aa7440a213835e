//! Daily billing background job.
//!
//! Generates the recurring invoices that fall inside the lookahead window and
//! then flags pending invoices whose due date has passed.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
    scheduler::JobScheduler,
};
use crate::billing::{BillingProcessor, BillingRunSummary, BillingSettings};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct BillingCronJob {
    processor: Arc<BillingProcessor>,
    period: Duration,
    initial_delay: Duration,
}

impl BillingCronJob {
    pub fn new(processor: Arc<BillingProcessor>, period: Duration, initial_delay: Duration) -> Self {
        Self {
            processor,
            period,
            initial_delay,
        }
    }

    fn log_summary(summary: &BillingRunSummary) {
        match &summary.generation {
            Ok(report) => info!(
                "Billing run generated {} invoices ({} due, {} already generated, {} repaired, {} failed)",
                report.generated, report.due, report.already_generated, report.repaired, report.failed
            ),
            Err(e) => warn!("Billing run could not generate invoices: {}", e),
        }
        match &summary.overdue {
            Ok(report) => info!(
                "Billing run marked {} of {} pending invoices overdue ({} failed)",
                report.marked_overdue, report.checked, report.failed
            ),
            Err(e) => warn!("Billing run could not check overdue invoices: {}", e),
        }
    }
}

#[async_trait]
impl BackgroundJob for BillingCronJob {
    fn id(&self) -> &'static str {
        "billing_cron"
    }

    fn name(&self) -> &'static str {
        "Billing Cron"
    }

    fn description(&self) -> &'static str {
        "Generate due recurring invoices and mark past-due invoices overdue"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval {
            period: self.period,
            initial_delay: self.initial_delay,
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Unprocessed schedules stay due and are picked up by the next run
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let today = Utc::now().date_naive();
        let summary = self.processor.run_billing_cron_jobs(today).await;
        Self::log_summary(&summary);

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if !summary.is_success() {
            let mut failures = Vec::new();
            if let Err(e) = &summary.generation {
                failures.push(format!("generation: {}", e));
            }
            if let Err(e) = &summary.overdue {
                failures.push(format!("overdue check: {}", e));
            }
            return Err(JobError::ExecutionFailed(failures.join("; ")));
        }
        Ok(())
    }
}

/// Registers the billing job on `scheduler` using the configured cadence.
pub async fn setup_billing_cron_job(
    scheduler: &mut JobScheduler,
    processor: Arc<BillingProcessor>,
    settings: &BillingSettings,
) {
    info!(
        "Billing job runs every {:?}, first run in {:?}, lookahead {} days",
        settings.run_interval, settings.startup_delay, settings.lookahead_days
    );
    let job = BillingCronJob::new(processor, settings.run_interval, settings.startup_delay);
    scheduler.register_job(Arc::new(job)).await;
}
