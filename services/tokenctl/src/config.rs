//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `TOKENCTL_BASE_URL` and `TOKENCTL_STORAGE_PATH` override the matching
//! file settings so one config file can serve several environments.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted refresh threshold (one year)
const MAX_REFRESH_THRESHOLD_SECS: u64 = 86_400 * 365;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub storage: StorageConfig,
}

/// Auth server and refresh timing
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// Origin of the auth server; the refresh path is appended to it
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
}

/// Credential file location
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

fn default_timeout() -> u64 {
    token_lifecycle::DEFAULT_REFRESH_TIMEOUT.as_secs()
}

fn default_refresh_threshold() -> u64 {
    token_lifecycle::DEFAULT_REFRESH_THRESHOLD_SECS.unsigned_abs()
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_threshold(&self) -> chrono::TimeDelta {
        let secs = self.refresh_threshold_secs.min(MAX_REFRESH_THRESHOLD_SECS);
        chrono::TimeDelta::seconds(secs as i64)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("TOKENCTL_BASE_URL") {
            config.auth.base_url = url;
        }
        if let Ok(storage) = std::env::var("TOKENCTL_STORAGE_PATH") {
            config.storage.path = PathBuf::from(storage);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.auth.base_url.starts_with("http://") && !self.auth.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.auth.base_url
            )));
        }

        if self.auth.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.auth.refresh_threshold_secs > MAX_REFRESH_THRESHOLD_SECS {
            return Err(common::Error::Config(
                "refresh_threshold_secs must be at most one year".into(),
            ));
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err(common::Error::Config("storage.path must not be empty".into()));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tokenctl.toml")
    }
}
