use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,

    pub billing: Option<BillingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BillingConfig {
    pub lookahead_days: Option<u32>,
    pub default_payment_terms: Option<String>,
    pub run_interval_hours: Option<u64>,
    pub startup_delay_secs: Option<u64>,
    pub store_call_timeout_secs: Option<u64>,
    pub invoice_number_attempts: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
