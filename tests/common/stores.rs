use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rental_billing::billing::InvoiceNumbering;
use rental_billing::billing_store::{
    CreateInvoiceOutcome, Invoice, InvoiceInit, InvoiceLine, InvoiceLineInit, InvoicePatch,
    InvoiceStatus, InvoiceStore, RecurringSchedule, SchedulePatch, ScheduleInit,
};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Hands out a fixed sequence of invoice numbers, repeating the last one.
pub struct FixedNumbering {
    numbers: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl FixedNumbering {
    pub fn new(numbers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            numbers: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
            last: Mutex::new(numbers.last().map(|n| n.to_string()).unwrap_or_default()),
        })
    }
}

impl InvoiceNumbering for FixedNumbering {
    fn next_number(&self, _run_date: NaiveDate) -> String {
        match self.numbers.lock().unwrap().pop_front() {
            Some(number) => number,
            None => self.last.lock().unwrap().clone(),
        }
    }
}

/// Wraps a store and makes selected operations fail or stall.
///
/// Operations are named after the [`InvoiceStore`] method.
pub struct FaultyStore {
    inner: Arc<dyn InvoiceStore>,
    failing: HashSet<&'static str>,
    slow: HashSet<&'static str>,
    delay: Duration,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn InvoiceStore>) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
            slow: HashSet::new(),
            delay: Duration::from_secs(5),
        }
    }

    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    pub fn slow(mut self, operation: &'static str) -> Self {
        self.slow.insert(operation);
        self
    }

    async fn fault(&self, operation: &'static str) -> Result<()> {
        if self.slow.contains(operation) {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(operation) {
            bail!("injected failure in {}", operation);
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for FaultyStore {
    async fn list_active_recurring_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        self.fault("list_active_recurring_schedules").await?;
        self.inner.list_active_recurring_schedules().await
    }

    async fn list_invoices_for_customer(&self, customer_id: &str) -> Result<Vec<Invoice>> {
        self.fault("list_invoices_for_customer").await?;
        self.inner.list_invoices_for_customer(customer_id).await
    }

    async fn create_invoice(&self, data: &InvoiceInit) -> Result<CreateInvoiceOutcome> {
        self.fault("create_invoice").await?;
        self.inner.create_invoice(data).await
    }

    async fn create_invoice_line(&self, data: &InvoiceLineInit) -> Result<InvoiceLine> {
        self.fault("create_invoice_line").await?;
        self.inner.create_invoice_line(data).await
    }

    async fn update_recurring_schedule(&self, id: &str, patch: &SchedulePatch) -> Result<()> {
        self.fault("update_recurring_schedule").await?;
        self.inner.update_recurring_schedule(id, patch).await
    }

    async fn list_invoices_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        self.fault("list_invoices_by_status").await?;
        self.inner.list_invoices_by_status(status).await
    }

    async fn update_invoice(&self, id: &str, patch: &InvoicePatch) -> Result<()> {
        self.fault("update_invoice").await?;
        self.inner.update_invoice(id, patch).await
    }

    async fn create_recurring_schedule(&self, data: &ScheduleInit) -> Result<RecurringSchedule> {
        self.inner.create_recurring_schedule(data).await
    }

    async fn get_recurring_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>> {
        self.inner.get_recurring_schedule(id).await
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>> {
        self.inner.get_invoice(id).await
    }

    async fn list_invoice_lines(&self, invoice_id: &str) -> Result<Vec<InvoiceLine>> {
        self.fault("list_invoice_lines").await?;
        self.inner.list_invoice_lines(invoice_id).await
    }
}
