use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub cms: CmsConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// The CMS that owns harvester configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CmsConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Maximum new records accepted per invocation; 0 means unlimited.
    #[serde(default = "default_new_record_limit")]
    pub new_record_limit: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Age after which an invocation lease is considered abandoned.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            new_record_limit: default_new_record_limit(),
            http_timeout_secs: default_http_timeout_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl HarvestConfig {
    pub fn limit(&self) -> Option<usize> {
        match self.new_record_limit {
            0 => None,
            n => Some(n),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_new_record_limit() -> usize {
    1
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_lock_ttl_secs() -> i64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9090".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(config.cms.url.starts_with("http://") || config.cms.url.starts_with("https://")) {
        anyhow::bail!("cms.url must be an http(s) URL, got '{}'", config.cms.url);
    }

    if config.harvest.http_timeout_secs == 0 {
        anyhow::bail!("harvest.http_timeout_secs must be > 0");
    }

    if config.harvest.lock_ttl_secs <= 0 {
        anyhow::bail!("harvest.lock_ttl_secs must be > 0");
    }

    match config.log.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!(
            "Unknown log level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    Ok(config)
}
