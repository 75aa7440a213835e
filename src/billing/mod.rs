//! Recurring invoice generation and overdue tracking.

mod dates;
mod error;
mod generator;
mod invoice_number;
mod overdue;
mod processor;

pub use dates::{due_date, net_days, next_invoice_date, DEFAULT_NET_DAYS, DEFAULT_PAYMENT_TERMS};
pub use error::BillingError;
pub use generator::GenerationReport;
pub use invoice_number::{format_invoice_number, InvoiceNumbering, RandomSuffixNumbering};
pub use overdue::OverdueReport;
pub use processor::{BillingProcessor, BillingRunSummary, BillingSettings};
