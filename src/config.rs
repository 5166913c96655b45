use std::time::Duration;

use serde::Deserialize;

/// Development-only master key. Rejected when `SWITCHBOARD_ENV=production`.
pub const PLACEHOLDER_MASTER_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub store: StoreBackend,
    pub master_key: String,
    pub admin_key: Option<String>,
    /// Upper bound for a single provider call, including body read.
    /// Set via SWITCHBOARD_PROVIDER_TIMEOUT_SECS. Default: 30.
    pub provider_timeout_secs: u64,
    /// Block dispatch attempts once a service has used its quota.
    /// Set via SWITCHBOARD_ENFORCE_RATE_LIMITS. Default: true.
    pub enforce_rate_limits: bool,
    /// Days added to "today" when a rate limit is reset.
    pub rate_limit_period_days: i64,
}

impl Config {
    /// Returns the admin key for API authentication.
    /// Falls back to master_key if SWITCHBOARD_ADMIN_KEY is not set.
    pub fn admin_key(&self) -> &str {
        self.admin_key.as_deref().unwrap_or(&self.master_key)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8443,
            database_url: "postgres://localhost/switchboard".into(),
            store: StoreBackend::Memory,
            master_key: PLACEHOLDER_MASTER_KEY.into(),
            admin_key: None,
            provider_timeout_secs: 30,
            enforce_rate_limits: true,
            rate_limit_period_days: 30,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let master_key = std::env::var("SWITCHBOARD_MASTER_KEY")
        .unwrap_or_else(|_| PLACEHOLDER_MASTER_KEY.into());

    if master_key == PLACEHOLDER_MASTER_KEY {
        let env_mode = std::env::var("SWITCHBOARD_ENV").unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "SWITCHBOARD_MASTER_KEY is not set. \
                 Set a 64-char hex key before running in production."
            );
        }
        tracing::warn!("SWITCHBOARD_MASTER_KEY is not set, using insecure placeholder key");
    }

    let store = match std::env::var("SWITCHBOARD_STORE")
        .unwrap_or_else(|_| "postgres".into())
        .to_lowercase()
        .as_str()
    {
        "postgres" => StoreBackend::Postgres,
        "memory" => StoreBackend::Memory,
        other => anyhow::bail!("invalid SWITCHBOARD_STORE: {}. Must be 'postgres' or 'memory'", other),
    };

    Ok(Config {
        port: std::env::var("SWITCHBOARD_PORT")
            .unwrap_or_else(|_| "8443".into())
            .parse()
            .unwrap_or(8443),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/switchboard".into()),
        store,
        master_key,
        admin_key: std::env::var("SWITCHBOARD_ADMIN_KEY").ok(),
        provider_timeout_secs: std::env::var("SWITCHBOARD_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30),
        enforce_rate_limits: std::env::var("SWITCHBOARD_ENFORCE_RATE_LIMITS")
            .ok()
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true),
        rate_limit_period_days: std::env::var("SWITCHBOARD_RATE_LIMIT_PERIOD_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30),
    })
}
