//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
    /// Rate limit buckets.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Moderation policy knobs.
    #[serde(default)]
    pub moderation: ModerationConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "beegramm.example.net").
    pub name: String,
    /// Server description shown in logs.
    #[serde(default)]
    pub description: String,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:5222").
    pub address: SocketAddr,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    pub path: String,
}

/// A rate limit quota: at most `limit` events within the trailing window.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Quota {
    /// Maximum admitted events inside the window.
    pub limit: u32,
    /// Trailing window length in seconds.
    pub window_secs: u64,
}

impl Quota {
    const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

/// Per-bucket rate limit quotas.
///
/// Each bucket has an independent sliding window; exhausting one never
/// starves another.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub login: Quota,
    pub connect: Quota,
    pub message_send: Quota,
    pub reaction: Quota,
    pub typing: Quota,
    pub delete_message: Quota,
    pub call_offer: Quota,
    pub call_answer: Quota,
    pub call_ice: Quota,
    pub call_hangup: Quota,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            login: Quota::new(10, 60),
            connect: Quota::new(30, 60),
            message_send: Quota::new(45, 10),
            reaction: Quota::new(30, 10),
            typing: Quota::new(60, 10),
            delete_message: Quota::new(20, 60),
            call_offer: Quota::new(6, 60),
            call_answer: Quota::new(10, 60),
            call_ice: Quota::new(120, 60),
            call_hangup: Quota::new(30, 60),
        }
    }
}

/// Moderation policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Upper bound for timed bans, in minutes. Longer requests are clamped.
    pub max_ban_minutes: i64,
    /// Maximum outstanding unused activation keys per key family.
    pub key_cap: i64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            // 30 days
            max_ban_minutes: 43_200,
            key_cap: 100,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "beegramm.test"

            [listen]
            address = "127.0.0.1:5222"
            "#,
        )
        .expect("minimal config");

        assert_eq!(config.limits.message_send.limit, 45);
        assert_eq!(config.limits.message_send.window_secs, 10);
        assert_eq!(config.limits.call_ice.limit, 120);
        assert_eq!(config.moderation.max_ban_minutes, 43_200);
        assert_eq!(config.moderation.key_cap, 100);
    }

    #[test]
    fn quota_overrides_apply() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "beegramm.test"

            [listen]
            address = "127.0.0.1:5222"

            [limits]
            message_send = { limit = 5, window_secs = 2 }
            "#,
        )
        .expect("config with override");

        assert_eq!(config.limits.message_send.limit, 5);
        assert_eq!(config.limits.message_send.window_secs, 2);
        // Untouched buckets keep defaults.
        assert_eq!(config.limits.login.limit, 10);
    }
}
