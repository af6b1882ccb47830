//! Runtime configuration, read once from the environment at startup.
//!
//! Every knob has a default good enough for local use; a `.env` file is
//! honored when present.

use anyhow::{Context, Result};
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite://repdash.db";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_MB: u64 = 100;
const DEFAULT_STATS_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    pub stats_cache_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("REPDASH_DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let bind_addr =
            std::env::var("REPDASH_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let max_upload_mb = env_u64("REPDASH_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;
        let stats_ttl_secs = env_u64("REPDASH_STATS_TTL_SECS", DEFAULT_STATS_TTL_SECS)?;

        Ok(Self {
            database_url,
            bind_addr,
            max_upload_bytes: (max_upload_mb * 1024 * 1024) as usize,
            stats_cache_ttl: Duration::from_secs(stats_ttl_secs),
        })
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} must be an integer, got '{}'", name, value)),
        Err(_) => Ok(default),
    }
}
