use thiserror::Error;

/// Failures raised while generating invoices or sweeping overdue ones.
///
/// Every variant is scoped to a single unit of work (one schedule or one
/// invoice); the processor logs it and moves on.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("unsupported frequency: {0:?}")]
    UnsupportedFrequency(String),

    #[error("invalid interval {0}, must be a positive integer")]
    InvalidInterval(i64),

    #[error("date arithmetic overflowed")]
    DateOverflow,

    #[error("invalid invoice template: {0}")]
    InvalidTemplate(String),

    #[error("storage failure during {operation}: {cause:#}")]
    Storage {
        operation: &'static str,
        cause: anyhow::Error,
    },

    #[error("store call {operation} timed out")]
    StoreTimeout { operation: &'static str },

    #[error("could not allocate a unique invoice number (last tried {0})")]
    DuplicateInvoiceNumber(String),
}

impl BillingError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::UnsupportedFrequency(_) => "unsupported_frequency",
            BillingError::InvalidInterval(_) => "invalid_interval",
            BillingError::DateOverflow => "date_overflow",
            BillingError::InvalidTemplate(_) => "invalid_template",
            BillingError::Storage { .. } => "storage",
            BillingError::StoreTimeout { .. } => "timeout",
            BillingError::DuplicateInvoiceNumber(_) => "duplicate_invoice_number",
        }
    }
}
