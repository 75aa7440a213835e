use super::error::BillingError;
use super::processor::BillingProcessor;
use crate::billing_store::{InvoicePatch, InvoiceStatus};
use crate::server::metrics;
use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

/// Counts from one overdue sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverdueReport {
    /// Pending invoices inspected.
    pub checked: usize,
    pub marked_overdue: usize,
    pub failed: usize,
}

impl BillingProcessor {
    /// Moves every pending invoice whose due date is before `today` to
    /// `overdue`.
    ///
    /// An invoice due today is not overdue yet. Update failures are logged
    /// per invoice and do not stop the sweep.
    pub async fn check_overdue_invoices(
        &self,
        today: NaiveDate,
    ) -> Result<OverdueReport, BillingError> {
        let pending = self
            .store_call(
                "list_invoices_by_status",
                self.store.list_invoices_by_status(InvoiceStatus::Pending),
            )
            .await?;

        let mut report = OverdueReport {
            checked: pending.len(),
            ..Default::default()
        };

        let patch = InvoicePatch {
            status: InvoiceStatus::Overdue,
        };
        for invoice in pending.iter().filter(|invoice| invoice.due_date < today) {
            if self.is_cancelled() {
                warn!("Overdue check cancelled, remaining invoices left for next run");
                break;
            }

            match self
                .store_call("update_invoice", self.store.update_invoice(&invoice.id, &patch))
                .await
            {
                Ok(()) => {
                    debug!(
                        "Invoice {} (due {}) is now overdue",
                        invoice.invoice_number, invoice.due_date
                    );
                    report.marked_overdue += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to mark invoice {} overdue: {}",
                        invoice.invoice_number, e
                    );
                    report.failed += 1;
                }
            }
        }

        metrics::record_invoices_marked_overdue(report.marked_overdue);
        info!(
            "Overdue check: {} pending, {} marked overdue, {} failed",
            report.checked, report.marked_overdue, report.failed
        );
        Ok(report)
    }
}
