//! Rental Billing Library
//!
//! Recurring invoice generation, overdue tracking and the background job
//! runtime driving them. Exposed as a library for the server binary and the
//! integration tests.

pub mod background_jobs;
pub mod billing;
pub mod billing_store;
pub mod config;
pub mod server;
pub mod server_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use billing::{BillingError, BillingProcessor, BillingRunSummary, BillingSettings};
pub use billing_store::{InvoiceStore, SqliteInvoiceStore};
pub use server_store::{ServerStore, SqliteServerStore};
