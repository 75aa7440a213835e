use super::error::BillingError;
use super::invoice_number::{InvoiceNumbering, RandomSuffixNumbering};
use super::{GenerationReport, OverdueReport, DEFAULT_PAYMENT_TERMS};
use crate::billing_store::InvoiceStore;
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Tunables for the billing job.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingSettings {
    /// Schedules due up to `today + lookahead_days` (inclusive) are invoiced.
    pub lookahead_days: u32,
    /// Payment terms used when a schedule has none.
    pub default_payment_terms: String,
    /// Upper bound for a single store call.
    pub store_call_timeout: Duration,
    /// How many invoice numbers to try before giving up on a schedule.
    pub invoice_number_attempts: u32,
    pub run_interval: Duration,
    pub startup_delay: Duration,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            lookahead_days: 6,
            default_payment_terms: DEFAULT_PAYMENT_TERMS.to_string(),
            store_call_timeout: Duration::from_secs(30),
            invoice_number_attempts: 5,
            run_interval: Duration::from_secs(24 * 60 * 60),
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// Outcome of one full billing run.
///
/// Each phase keeps its own result so a failing phase never hides the
/// other one.
#[derive(Debug)]
pub struct BillingRunSummary {
    pub generation: Result<GenerationReport, BillingError>,
    pub overdue: Result<OverdueReport, BillingError>,
}

impl BillingRunSummary {
    pub fn is_success(&self) -> bool {
        self.generation.is_ok() && self.overdue.is_ok()
    }
}

/// Generates recurring invoices and flags overdue ones against an
/// [`InvoiceStore`].
pub struct BillingProcessor {
    pub(super) store: Arc<dyn InvoiceStore>,
    pub(super) settings: BillingSettings,
    pub(super) numbering: Arc<dyn InvoiceNumbering>,
    pub(super) cancellation: CancellationToken,
}

impl BillingProcessor {
    pub fn new(store: Arc<dyn InvoiceStore>, settings: BillingSettings) -> Self {
        Self {
            store,
            settings,
            numbering: Arc::new(RandomSuffixNumbering),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_numbering(mut self, numbering: Arc<dyn InvoiceNumbering>) -> Self {
        self.numbering = numbering;
        self
    }

    /// Stops in-progress runs between units of work once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn settings(&self) -> &BillingSettings {
        &self.settings
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Awaits a store call, bounded by the configured per-call timeout.
    pub(super) async fn store_call<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, BillingError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.settings.store_call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(BillingError::Storage { operation, cause }),
            Err(_) => Err(BillingError::StoreTimeout { operation }),
        }
    }

    /// Runs invoice generation followed by the overdue sweep.
    ///
    /// Never fails: a phase error is logged and reported in the summary, and
    /// the sweep runs even when generation failed.
    pub async fn run_billing_cron_jobs(&self, today: NaiveDate) -> BillingRunSummary {
        info!("Running billing jobs for {}", today);

        let generation = self.process_recurring_invoices(today).await;
        if let Err(e) = &generation {
            error!("Recurring invoice generation failed: {}", e);
        }

        let overdue = self.check_overdue_invoices(today).await;
        if let Err(e) = &overdue {
            error!("Overdue invoice check failed: {}", e);
        }

        BillingRunSummary { generation, overdue }
    }
}
