use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable that overrides config file discovery.
pub const CONFIG_ENV_VAR: &str = "ETHBOT_DASHBOARD_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    pub general: General,
    pub api: Api,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub observability: Observability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Api {
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Api {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Polling {
    pub interval_ms: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

impl Polling {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// SQLite file holding the persisted credential. `None` keeps the
    /// session in memory only.
    pub store_path: Option<String>,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            store_path: None,
            storage_key: default_storage_key(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Observability {
    pub prometheus_port: Option<u16>,
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_storage_key() -> String {
    "ethbot_token".to_string()
}

impl DashboardConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: DashboardConfig =
            toml::from_str(s).context("failed to parse dashboard config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.api.base_url)
            .with_context(|| format!("api.base_url is not a valid URL: {}", self.api.base_url))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "api.base_url must use http or https"
        );
        anyhow::ensure!(
            self.api.request_timeout_secs > 0,
            "api.request_timeout_secs must be > 0"
        );
        anyhow::ensure!(self.polling.interval_ms > 0, "polling.interval_ms must be > 0");
        anyhow::ensure!(
            !self.session.storage_key.trim().is_empty(),
            "session.storage_key must not be empty"
        );
        Ok(())
    }

    pub fn default_config_path() -> String {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return path;
            }
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(std::path::Path::to_path_buf));

        // Next to the binary first
        if let Some(dir) = &exe_dir {
            let candidate = dir.join("dashboard.toml");
            if candidate.exists() {
                return candidate.to_string_lossy().to_string();
            }
        }

        let candidate = Path::new("config/dashboard.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        "config/dashboard.toml".to_string()
    }
}

impl FromStr for DashboardConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
