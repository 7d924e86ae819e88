use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use tracing::{info, warn};

pub fn load_environment() -> anyhow::Result<()> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> anyhow::Result<()> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)
        .with_context(|| format!("Failed to load environment file {}", path))?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match dotenvy::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = name, value = %raw, "Ignoring unparseable environment value");
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub session_ttl_hours: i64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: dotenvy::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://progress.db?mode=rwc".to_string()),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            acquire_timeout_secs: env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 30),
            session_ttl_hours: env_or("SESSION_TTL_HOURS", 24),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 10,
            max_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: dotenvy::var("PROGRESS_API_URL").unwrap_or(defaults.base_url),
            timeout_secs: env_or("PROGRESS_SYNC_TIMEOUT_SECS", defaults.timeout_secs),
            max_attempts: env_or("PROGRESS_SYNC_MAX_ATTEMPTS", defaults.max_attempts),
            retry_delay_ms: env_or("PROGRESS_SYNC_RETRY_DELAY_MS", defaults.retry_delay_ms),
        }
    }
}
