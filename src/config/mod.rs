mod file_config;

pub use file_config::{BillingConfig, FileConfig};

use crate::billing::BillingSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_METRICS_PORT: u16 = 9092;

/// Longest accepted billing run interval (one leap year).
pub const MAX_RUN_INTERVAL_HOURS: u64 = 366 * 24;

/// Longest accepted delay before the first billing run (one day).
pub const MAX_STARTUP_DELAY_SECS: u64 = 24 * 60 * 60;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub lookahead_days: Option<u32>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            metrics_port: DEFAULT_METRICS_PORT,
            lookahead_days: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub metrics_port: u16,
    pub billing: BillingSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let billing_file = file.billing.unwrap_or_default();
        let defaults = BillingSettings::default();

        let default_payment_terms = billing_file
            .default_payment_terms
            .unwrap_or(defaults.default_payment_terms);
        if default_payment_terms.trim().is_empty() {
            bail!("billing.default_payment_terms must not be empty");
        }

        let run_interval = match billing_file.run_interval_hours {
            Some(0) => bail!("billing.run_interval_hours must be greater than 0"),
            Some(hours) if hours > MAX_RUN_INTERVAL_HOURS => bail!(
                "billing.run_interval_hours must be at most {}, got {}",
                MAX_RUN_INTERVAL_HOURS,
                hours
            ),
            Some(hours) => match hours.checked_mul(60 * 60) {
                Some(secs) => Duration::from_secs(secs),
                None => bail!("billing.run_interval_hours {} is out of range", hours),
            },
            None => defaults.run_interval,
        };

        let startup_delay = match billing_file.startup_delay_secs {
            Some(secs) if secs > MAX_STARTUP_DELAY_SECS => bail!(
                "billing.startup_delay_secs must be at most {}, got {}",
                MAX_STARTUP_DELAY_SECS,
                secs
            ),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.startup_delay,
        };

        let store_call_timeout = match billing_file.store_call_timeout_secs {
            Some(0) => bail!("billing.store_call_timeout_secs must be greater than 0"),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.store_call_timeout,
        };

        let invoice_number_attempts = match billing_file.invoice_number_attempts {
            Some(0) => bail!("billing.invoice_number_attempts must be greater than 0"),
            Some(attempts) => attempts,
            None => defaults.invoice_number_attempts,
        };

        let billing = BillingSettings {
            lookahead_days: billing_file
                .lookahead_days
                .or(cli.lookahead_days)
                .unwrap_or(defaults.lookahead_days),
            default_payment_terms,
            store_call_timeout,
            invoice_number_attempts,
            run_interval,
            startup_delay,
        };

        Ok(Self {
            db_dir,
            metrics_port,
            billing,
        })
    }

    pub fn billing_db_path(&self) -> PathBuf {
        self.db_dir.join("billing.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}
