//! Calendar rules for recurring schedules.
//!
//! Month arithmetic clamps to the last day of the target month: Jan 31 plus
//! one month is Feb 28 (Feb 29 in leap years), and a quarter after Jan 31 is
//! Apr 30. Advancing always starts from the invoice date actually used, so a
//! clamped date carries forward (Jan 31, Feb 28, Mar 28, ...).

use super::error::BillingError;
use crate::billing_store::Frequency;
use chrono::{Days, Months, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

/// Payment terms applied when a schedule carries none.
pub const DEFAULT_PAYMENT_TERMS: &str = "Net 30";

/// Days until due when payment terms have no readable "Net N".
pub const DEFAULT_NET_DAYS: u64 = 30;

lazy_static! {
    static ref NET_DAYS_PATTERN: Regex =
        Regex::new(r"(?i)\bnet\s*(\d+)").expect("net days pattern is valid");
}

/// Date of the invoice following one issued on `from`.
pub fn next_invoice_date(
    frequency: Frequency,
    interval: u32,
    from: NaiveDate,
) -> Result<NaiveDate, BillingError> {
    if interval == 0 {
        return Err(BillingError::InvalidInterval(i64::from(interval)));
    }
    let months = frequency
        .months_per_period()
        .checked_mul(interval)
        .ok_or(BillingError::DateOverflow)?;
    from.checked_add_months(Months::new(months))
        .ok_or(BillingError::DateOverflow)
}

/// Parses the "Net N" day count out of free-text payment terms.
///
/// Returns `None` when no pattern is present or the number does not fit.
pub fn net_days(payment_terms: &str) -> Option<u64> {
    NET_DAYS_PATTERN
        .captures(payment_terms)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(u64::from)
}

/// Due date for an invoice issued on `invoice_date` under `payment_terms`.
///
/// Unreadable terms fall back to [`DEFAULT_NET_DAYS`] silently.
pub fn due_date(invoice_date: NaiveDate, payment_terms: &str) -> Result<NaiveDate, BillingError> {
    let days = net_days(payment_terms).unwrap_or(DEFAULT_NET_DAYS);
    invoice_date
        .checked_add_days(Days::new(days))
        .ok_or(BillingError::DateOverflow)
}
