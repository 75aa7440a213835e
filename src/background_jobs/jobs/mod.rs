//! Concrete background jobs.

pub mod billing_cron;

pub use billing_cron::{setup_billing_cron_job, BillingCronJob};
