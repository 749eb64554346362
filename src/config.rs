//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the cron trigger secret, the price-feed API key) are referenced
//! by env-var name in the config and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::scoring::SlotMultipliers;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    pub cron: CronConfig,
    /// Slot multipliers; omitted entries fall back to the defaults.
    #[serde(default)]
    pub scoring: SlotMultipliers,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite://roundkeeper.db`.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceFeedConfig {
    pub base_url: String,
    /// Hard upper bound on any single feed call.
    pub timeout_secs: u64,
    /// Env var holding an optional API key (sent as `x-cg-demo-api-key`).
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UniverseConfig {
    /// Number of assets frozen into each round's draft universe.
    pub size: usize,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self { size: 100 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CronConfig {
    /// Env var holding the shared trigger secret.
    pub secret_env: String,
    /// Half-width of the due-round selection window.
    pub tolerance_hours: i64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse configuration TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the scheduler or feed misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.cron.tolerance_hours <= 0 {
            anyhow::bail!("cron.tolerance_hours must be positive");
        }
        if self.price_feed.timeout_secs == 0 {
            anyhow::bail!("price_feed.timeout_secs must be positive");
        }
        if self.universe.size == 0 {
            anyhow::bail!("universe.size must be positive");
        }
        self.scoring.validate()?;
        Ok(())
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.price_feed.timeout_secs)
    }

    pub fn cron_tolerance(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cron.tolerance_hours)
    }

    /// The shared cron secret, or `None` when the env var is unset or empty.
    ///
    /// `None` is not an error here: the trigger endpoints fail closed on it.
    pub fn cron_secret(&self) -> Option<SecretString> {
        std::env::var(&self.cron.secret_env)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::new)
    }

    /// Optional price-feed API key.
    pub fn feed_api_key(&self) -> Option<SecretString> {
        self.price_feed
            .api_key_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
            .filter(|s| !s.is_empty())
            .map(SecretString::new)
    }
}
