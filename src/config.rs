use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration.
///
/// Layering (later wins): built-in defaults, `config.toml`, then `PORTAL_*`
/// environment variables with `__` separating nested keys
/// (e.g. `PORTAL_BASIC__ADMIN_KEY`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub store: StoreConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    /// Empty disables authentication.
    pub admin_key: String,
    pub loglevel: String,
    pub database_url: String,
    pub body_limit_bytes: usize,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            admin_key: String::new(),
            loglevel: "info".to_string(),
            database_url: "sqlite:data/portal.sqlite".to_string(),
            body_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_max_times: usize,
    /// Upper bound for a single mutation round-trip through the store actor.
    pub call_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_min_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            retry_max_times: 3,
            call_timeout_ms: 5_000,
        }
    }
}

/// Database engine queried for live size and table counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// `mysql://` URL of the MariaDB/MySQL server; empty keeps stored values.
    pub engine_url: String,
    pub acquire_timeout_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            engine_url: String::new(),
            acquire_timeout_ms: 3_000,
        }
    }
}

impl StatsConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl StoreConfig {
    pub fn retry_min_delay(&self) -> Duration {
        Duration::from_millis(self.retry_min_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms.max(self.retry_min_delay_ms))
    }
}

impl Config {
    /// Load configuration from `config.toml` and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("PORTAL_").split("__"))
    }
}
