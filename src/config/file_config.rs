use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub startup_timeout_secs: Option<u64>,
    pub health_path: Option<String>,
    pub commit_delay_ms: Option<u64>,
    pub run_slow: Option<bool>,

    // Passed to the server process and the test process
    pub testing: Option<bool>,
    pub log_level: Option<String>,

    // Feature configs
    pub server: Option<ServerFileConfig>,
    pub setup: Option<SetupFileConfig>,
    pub factory: Option<FactoryFileConfig>,
}

/// Presence of `program` switches the harness from attaching to spawning.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ServerFileConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub host: Option<String>,
    /// 0 picks a free port
    pub port: Option<u16>,
    pub port_arg: Option<String>,
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SetupFileConfig {
    pub business_type: Option<String>,
    pub user_name: Option<String>,
    pub user_password: Option<String>,
    pub user_pin: Option<String>,
    pub business_name: Option<String>,
    pub business_address: Option<String>,
    pub business_phone: Option<String>,
    pub business_email: Option<String>,
    pub business_currency: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FactoryFileConfig {
    pub user_pin: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
