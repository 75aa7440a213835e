//! Persistence for recurring schedules, invoices and invoice lines.

mod models;
mod schema;
mod sqlite_billing_store;

pub use models::*;
pub use schema::BILLING_VERSIONED_SCHEMAS;
pub use sqlite_billing_store::SqliteInvoiceStore;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn list_active_recurring_schedules(&self) -> Result<Vec<RecurringSchedule>>;
    async fn list_invoices_for_customer(&self, customer_id: &str) -> Result<Vec<Invoice>>;

    /// Inserts an invoice unless one already exists for the same
    /// (recurring schedule, invoice date) pair.
    async fn create_invoice(&self, data: &InvoiceInit) -> Result<CreateInvoiceOutcome>;
    async fn create_invoice_line(&self, data: &InvoiceLineInit) -> Result<InvoiceLine>;

    /// Fails if the patch would move `next_invoice_date` backwards.
    async fn update_recurring_schedule(&self, id: &str, patch: &SchedulePatch) -> Result<()>;
    async fn list_invoices_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>>;
    async fn update_invoice(&self, id: &str, patch: &InvoicePatch) -> Result<()>;

    // Schedule management and lookups
    async fn create_recurring_schedule(&self, data: &ScheduleInit) -> Result<RecurringSchedule>;
    async fn get_recurring_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>>;
    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>>;
    async fn list_invoice_lines(&self, invoice_id: &str) -> Result<Vec<InvoiceLine>>;
}
