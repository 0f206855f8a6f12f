// Server configuration
//
// Loaded once at startup from the environment (after `.env` is applied).
// Invalid values are startup errors rather than silent defaults.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use taskq_queue::{QueueConfig, RetryPolicy};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://tasks.db?mode=rwc";
pub const DEFAULT_NUM_WORKERS: usize = 2;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";
pub const DEFAULT_COMPLETION_MAX_ATTEMPTS: u32 = 5;

/// Where task records live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store, lost on restart
    Memory,
    /// SQLite database URL
    Sqlite(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub num_workers: usize,
    pub bind_addr: SocketAddr,
    pub completion_max_attempts: u32,
    /// Origins allowed for cross-origin requests; empty means same-origin only
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: SQLite URL, or `memory` (default: `sqlite://tasks.db?mode=rwc`)
    /// - `NUM_WORKERS`: worker pool size, at least 1 (default: 2)
    /// - `BIND_ADDR`: listen address (default: `0.0.0.0:9000`)
    /// - `COMPLETION_MAX_ATTEMPTS`: completion write attempts (default: 5)
    /// - `CORS_ALLOWED_ORIGINS`: comma separated origins
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let store = if database_url.eq_ignore_ascii_case("memory") {
            StoreBackend::Memory
        } else {
            StoreBackend::Sqlite(database_url)
        };

        let num_workers = match lookup("NUM_WORKERS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("NUM_WORKERS must be a positive integer, got {raw:?}"))?,
            None => DEFAULT_NUM_WORKERS,
        };
        if num_workers == 0 {
            bail!("NUM_WORKERS must be at least 1");
        }

        let raw_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = raw_addr
            .trim()
            .parse()
            .with_context(|| format!("BIND_ADDR is not a socket address: {raw_addr:?}"))?;

        let completion_max_attempts = match lookup("COMPLETION_MAX_ATTEMPTS") {
            Some(raw) => raw.trim().parse::<u32>().with_context(|| {
                format!("COMPLETION_MAX_ATTEMPTS must be a positive integer, got {raw:?}")
            })?,
            None => DEFAULT_COMPLETION_MAX_ATTEMPTS,
        };
        if completion_max_attempts == 0 {
            bail!("COMPLETION_MAX_ATTEMPTS must be at least 1");
        }

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            store,
            num_workers,
            bind_addr,
            completion_max_attempts,
            cors_allowed_origins,
        })
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new(self.num_workers).with_completion_retry(
            RetryPolicy::exponential()
                .with_max_attempts(self.completion_max_attempts)
                .with_max_interval(Duration::from_secs(5)),
        )
    }
}
