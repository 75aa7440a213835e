use chrono::NaiveDate;
use rand::Rng;

/// Source of human-readable invoice numbers.
pub trait InvoiceNumbering: Send + Sync {
    /// Produces a candidate number for an invoice generated on `run_date`.
    ///
    /// Candidates are not required to be unique; the store rejects duplicates
    /// and the generator asks again.
    fn next_number(&self, run_date: NaiveDate) -> String;
}

/// `INV-YYYYMMDD-NNN`, where the date is the generation run's date and
/// `NNN` is a random three digit suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSuffixNumbering;

impl InvoiceNumbering for RandomSuffixNumbering {
    fn next_number(&self, run_date: NaiveDate) -> String {
        let suffix: u16 = rand::rng().random_range(0..1000);
        format_invoice_number(run_date, suffix)
    }
}

pub fn format_invoice_number(run_date: NaiveDate, suffix: u16) -> String {
    format!("INV-{}-{:03}", run_date.format("%Y%m%d"), suffix)
}
