//! Environment-driven configuration, loaded once at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub scheduler_timezone: String,
    pub temp_dir: PathBuf,
    pub http_timeout: Duration,
    pub db_pool_max: u32,
    pub db_pool_min: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL must be set in the environment")?;

        let bind_addr =
            env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let scheduler_timezone =
            env::var("SCHEDULER_TIMEZONE").unwrap_or_else(|_| "Europe/Ljubljana".to_string());

        let temp_dir = env::var("TEMP_DIR")
            .unwrap_or_else(|_| std::env::temp_dir().join("domogled_ingestion").display().to_string())
            .into();

        let http_timeout = Duration::from_secs(
            env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        );

        let db_pool_max = env::var("DB_POOL_MAX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let db_pool_min = env::var("DB_POOL_MIN")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Config {
            database_url,
            bind_addr,
            cors_origins,
            scheduler_timezone,
            temp_dir,
            http_timeout,
            db_pool_max,
            db_pool_min,
        })
    }
}
