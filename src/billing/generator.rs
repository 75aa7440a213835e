//! Recurring invoice generation.
//!
//! Each due schedule yields at most one invoice per invoice date. The lookup
//! against existing invoices is the fast path; the store's unique
//! (schedule, invoice date) key is what actually rules out duplicates when two
//! runs race.

use super::dates::{due_date, next_invoice_date};
use super::error::BillingError;
use super::processor::BillingProcessor;
use crate::billing_store::{
    CreateInvoiceOutcome, Invoice, InvoiceInit, InvoiceLine, InvoiceLineInit, InvoiceStatus,
    InvoiceTemplate, RecurringSchedule, SchedulePatch, TemplateLineItem,
};
use crate::server::metrics;
use chrono::{Days, NaiveDate};
use tracing::{debug, error, info, warn};

/// Counts from one generation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Schedules whose next invoice date fell inside the lookahead window.
    pub due: usize,
    pub generated: usize,
    /// Due schedules that already had their invoice; advanced without a new one.
    pub already_generated: usize,
    /// Already generated invoices that were missing lines and got them written.
    pub repaired: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum ScheduleOutcome {
    Generated(Invoice),
    /// Carries the number of lines written to complete the existing invoice.
    AlreadyGenerated { lines_written: usize },
}

impl BillingProcessor {
    /// Generates invoices for every active schedule due on or before
    /// `today + lookahead_days`.
    ///
    /// Only a failure to list schedules fails the pass. Errors on a single
    /// schedule are logged and counted; that schedule is left untouched and
    /// retried on the next run.
    pub async fn process_recurring_invoices(
        &self,
        today: NaiveDate,
    ) -> Result<GenerationReport, BillingError> {
        let horizon = today
            .checked_add_days(Days::new(u64::from(self.settings.lookahead_days)))
            .ok_or(BillingError::DateOverflow)?;

        let schedules = self
            .store_call(
                "list_active_recurring_schedules",
                self.store.list_active_recurring_schedules(),
            )
            .await?;

        let mut report = GenerationReport::default();
        for schedule in schedules
            .iter()
            .filter(|s| s.is_active && s.next_invoice_date <= horizon)
        {
            if self.is_cancelled() {
                warn!("Invoice generation cancelled, remaining schedules left for next run");
                break;
            }
            report.due += 1;

            match self.process_schedule(schedule, today).await {
                Ok(ScheduleOutcome::Generated(invoice)) => {
                    info!(
                        "Generated invoice {} for schedule {} (customer {}, dated {})",
                        invoice.invoice_number,
                        schedule.id,
                        schedule.customer_id,
                        invoice.invoice_date
                    );
                    metrics::record_invoice_generated();
                    report.generated += 1;
                }
                Ok(ScheduleOutcome::AlreadyGenerated { lines_written }) => {
                    report.already_generated += 1;
                    if lines_written > 0 {
                        report.repaired += 1;
                    }
                }
                Err(e) => {
                    error!(
                        "Failed to process recurring schedule {} (customer {}): {}",
                        schedule.id, schedule.customer_id, e
                    );
                    metrics::record_schedule_failed(e.kind());
                    report.failed += 1;
                }
            }
        }

        info!(
            "Recurring invoices: {} due up to {}, {} generated, {} already generated ({} repaired), {} failed",
            report.due,
            horizon,
            report.generated,
            report.already_generated,
            report.repaired,
            report.failed
        );
        Ok(report)
    }

    async fn process_schedule(
        &self,
        schedule: &RecurringSchedule,
        today: NaiveDate,
    ) -> Result<ScheduleOutcome, BillingError> {
        // Everything that can be rejected up front is, before any write
        let frequency = schedule.frequency()?;
        let template = schedule.template()?;
        template.validate()?;
        let invoice_date = schedule.next_invoice_date;
        let interval = schedule.interval()?;
        let following_date = next_invoice_date(frequency, interval, invoice_date)?;

        let existing = self
            .store_call(
                "list_invoices_for_customer",
                self.store.list_invoices_for_customer(&schedule.customer_id),
            )
            .await?;
        let already_invoiced = existing.iter().find(|invoice| {
            invoice.invoice_date == invoice_date
                && invoice.recurring_schedule_id.as_deref() == Some(schedule.id.as_str())
        });
        if let Some(invoice) = already_invoiced {
            // A run that failed after inserting the invoice may have left it without all its lines
            let lines_written = self.complete_invoice_lines(invoice, &template).await?;
            info!(
                "Schedule {} already invoiced for {}, advancing to {}",
                schedule.id, invoice_date, following_date
            );
            self.advance_schedule(schedule, invoice_date, following_date)
                .await?;
            return Ok(ScheduleOutcome::AlreadyGenerated { lines_written });
        }

        let payment_terms = schedule
            .payment_terms
            .as_deref()
            .map(str::trim)
            .filter(|terms| !terms.is_empty())
            .unwrap_or(self.settings.default_payment_terms.as_str())
            .to_string();
        let due = due_date(invoice_date, &payment_terms)?;

        let Some(invoice) = self
            .insert_invoice(schedule, &template, invoice_date, due, payment_terms, today)
            .await?
        else {
            // The other run owns the line writes; a later run completes them if it fails
            info!(
                "Invoice for schedule {} on {} was created concurrently, advancing",
                schedule.id, invoice_date
            );
            self.advance_schedule(schedule, invoice_date, following_date)
                .await?;
            return Ok(ScheduleOutcome::AlreadyGenerated { lines_written: 0 });
        };

        for item in &template.items {
            self.write_invoice_line(&invoice, item).await?;
        }
        debug!(
            "Wrote {} lines for invoice {}",
            template.items.len(),
            invoice.invoice_number
        );

        self.advance_schedule(schedule, invoice_date, following_date)
            .await?;
        Ok(ScheduleOutcome::Generated(invoice))
    }

    /// Inserts the invoice, drawing a fresh number on each collision.
    ///
    /// Returns `None` when the store already holds an invoice for this
    /// schedule and date.
    async fn insert_invoice(
        &self,
        schedule: &RecurringSchedule,
        template: &InvoiceTemplate,
        invoice_date: NaiveDate,
        due: NaiveDate,
        payment_terms: String,
        today: NaiveDate,
    ) -> Result<Option<Invoice>, BillingError> {
        let attempts = self.settings.invoice_number_attempts.max(1);
        let mut last_number = String::new();

        for attempt in 1..=attempts {
            let invoice_number = self.numbering.next_number(today);
            let data = InvoiceInit {
                invoice_number: invoice_number.clone(),
                customer_id: schedule.customer_id.clone(),
                customer: template.customer.clone(),
                invoice_date,
                due_date: due,
                status: InvoiceStatus::Pending,
                subtotal: template.subtotal,
                tax_amount: template.tax_amount,
                discount_amount: template.discount_amount,
                total: template.total,
                notes: template.notes.clone(),
                payment_terms: payment_terms.clone(),
                is_recurring: true,
                recurring_schedule_id: Some(schedule.id.clone()),
            };

            match self
                .store_call("create_invoice", self.store.create_invoice(&data))
                .await?
            {
                CreateInvoiceOutcome::Created(invoice) => return Ok(Some(invoice)),
                CreateInvoiceOutcome::AlreadyGenerated => return Ok(None),
                CreateInvoiceOutcome::DuplicateNumber => {
                    warn!(
                        "Invoice number {} already taken (attempt {}/{})",
                        invoice_number, attempt, attempts
                    );
                    last_number = invoice_number;
                }
            }
        }

        Err(BillingError::DuplicateInvoiceNumber(last_number))
    }

    /// Writes the template lines `invoice` does not have yet and returns how
    /// many were written.
    async fn complete_invoice_lines(
        &self,
        invoice: &Invoice,
        template: &InvoiceTemplate,
    ) -> Result<usize, BillingError> {
        let lines = self
            .store_call(
                "list_invoice_lines",
                self.store.list_invoice_lines(&invoice.id),
            )
            .await?;
        let missing = missing_lines(&template.items, &lines);
        if missing.is_empty() {
            return Ok(0);
        }

        warn!(
            "Invoice {} has {} of {} lines, writing the missing {}",
            invoice.invoice_number,
            lines.len(),
            template.items.len(),
            missing.len()
        );
        for item in &missing {
            self.write_invoice_line(invoice, item).await?;
        }
        metrics::record_invoice_lines_repaired(missing.len());
        Ok(missing.len())
    }

    async fn write_invoice_line(
        &self,
        invoice: &Invoice,
        item: &TemplateLineItem,
    ) -> Result<(), BillingError> {
        self.store_call(
            "create_invoice_line",
            self.store
                .create_invoice_line(&InvoiceLineInit::from_template(&invoice.id, item)),
        )
        .await?;
        Ok(())
    }

    async fn advance_schedule(
        &self,
        schedule: &RecurringSchedule,
        invoiced_on: NaiveDate,
        next: NaiveDate,
    ) -> Result<(), BillingError> {
        let patch = SchedulePatch {
            last_invoice_date: invoiced_on,
            next_invoice_date: next,
        };
        self.store_call(
            "update_recurring_schedule",
            self.store.update_recurring_schedule(&schedule.id, &patch),
        )
        .await
    }
}

/// Template items with no stored line for them. Each stored line accounts for
/// at most one item, so repeated items are matched one to one.
fn missing_lines<'a>(
    items: &'a [TemplateLineItem],
    lines: &[InvoiceLine],
) -> Vec<&'a TemplateLineItem> {
    let mut unmatched: Vec<&InvoiceLine> = lines.iter().collect();
    items
        .iter()
        .filter(|item| {
            let found = unmatched.iter().position(|line| {
                line.item_id == item.item_id
                    && line.description == item.description
                    && line.serial_numbers == item.serial_numbers
            });
            match found {
                Some(index) => {
                    unmatched.swap_remove(index);
                    false
                }
                None => true,
            }
        })
        .collect()
}
