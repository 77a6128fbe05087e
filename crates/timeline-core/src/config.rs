//! Configuration management for the timeline service and its worker.
//!
//! Loads configuration from environment variables, following the
//! `from_env`-with-defaults convention used across this workspace's
//! services.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub bus: BusConfig,
    pub timeline: TimelineConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Configuration for the PostgreSQL-backed event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: i64,
    #[serde(default = "default_max_receives")]
    pub max_receives: i32,
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    #[serde(default = "default_receive_wait_secs")]
    pub receive_wait_secs: u64,
}

/// Tunables specific to timeline delivery (celebrity threshold, cap, fan-out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_celebrity_threshold")]
    pub celebrity_threshold: i64,
    #[serde(default = "default_timeline_cap")]
    pub timeline_cap: i64,
    #[serde(default = "default_fanout_batch_size")]
    pub fanout_batch_size: i64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_celebrity_pull_lookback_secs")]
    pub celebrity_pull_lookback_secs: i64,
    #[serde(default = "default_fallback_lookback_secs")]
    pub fallback_lookback_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,
}

fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_visibility_timeout_secs() -> i64 {
    30
}
fn default_max_receives() -> i32 {
    3
}
fn default_publish_max_attempts() -> u32 {
    3
}
fn default_receive_wait_secs() -> u64 {
    20
}
fn default_celebrity_threshold() -> i64 {
    100_000
}
fn default_timeline_cap() -> i64 {
    1000
}
fn default_fanout_batch_size() -> i64 {
    1000
}
fn default_worker_concurrency() -> usize {
    8
}
fn default_celebrity_pull_lookback_secs() -> i64 {
    24 * 3600
}
fn default_fallback_lookback_secs() -> i64 {
    24 * 3600
}
fn default_token_ttl_secs() -> i64 {
    3600
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_or("PORT", 8080),
        };

        let database = DatabaseConfig {
            url: std::env::var("DB_URL").context("DB_URL environment variable not set")?,
            max_connections: env_or("DB_POOL_SIZE", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", default_connect_timeout_secs()),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", default_acquire_timeout_secs()),
        };
        // DB_MAX_OVERFLOW widens the pool beyond the warm `max_connections`
        // baseline, matching spec.md's "10 warm + 20 overflow" guidance.
        let overflow: u32 = env_or("DB_MAX_OVERFLOW", 20);
        let database = DatabaseConfig {
            max_connections: database.max_connections + overflow,
            ..database
        };

        let redis = RedisConfig {
            url: std::env::var("CACHE_URL").context("CACHE_URL environment variable not set")?,
        };

        let bus = BusConfig {
            visibility_timeout_secs: env_or(
                "EVENT_BUS_VISIBILITY_TIMEOUT",
                default_visibility_timeout_secs(),
            ),
            max_receives: env_or("EVENT_BUS_MAX_RECEIVES", default_max_receives()),
            publish_max_attempts: default_publish_max_attempts(),
            receive_wait_secs: default_receive_wait_secs(),
        };

        let timeline = TimelineConfig {
            celebrity_threshold: env_or("CELEBRITY_THRESHOLD", default_celebrity_threshold()),
            timeline_cap: env_or("TIMELINE_CAP", default_timeline_cap()),
            fanout_batch_size: env_or("FANOUT_BATCH_SIZE", default_fanout_batch_size()),
            worker_concurrency: env_or("WORKER_CONCURRENCY", default_worker_concurrency()),
            celebrity_pull_lookback_secs: env_or(
                "CELEBRITY_PULL_LOOKBACK_SECS",
                default_celebrity_pull_lookback_secs(),
            ),
            fallback_lookback_secs: env_or(
                "FALLBACK_LOOKBACK_SECS",
                default_fallback_lookback_secs(),
            ),
        };

        let auth = AuthConfig {
            token_secret: std::env::var("TOKEN_SECRET")
                .context("TOKEN_SECRET environment variable not set")?,
            token_ttl_secs: env_or("TOKEN_TTL", default_token_ttl_secs()),
        };

        Ok(Config {
            app,
            database,
            redis,
            bus,
            timeline,
            auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_required_env() {
        std::env::set_var("DB_URL", "postgres://test/test");
        std::env::set_var("CACHE_URL", "redis://localhost");
        std::env::set_var("TOKEN_SECRET", "test-secret");
    }

    #[test]
    fn defaults_match_spec() {
        set_required_env();
        std::env::remove_var("CELEBRITY_THRESHOLD");
        std::env::remove_var("TIMELINE_CAP");
        let config = Config::from_env().unwrap();
        assert_eq!(config.timeline.celebrity_threshold, 100_000);
        assert_eq!(config.timeline.timeline_cap, 1000);
        assert_eq!(config.bus.visibility_timeout_secs, 30);
        assert_eq!(config.bus.max_receives, 3);
    }

    #[test]
    fn pool_size_includes_overflow() {
        set_required_env();
        std::env::set_var("DB_POOL_SIZE", "10");
        std::env::set_var("DB_MAX_OVERFLOW", "20");
        let config = Config::from_env().unwrap();
        assert_eq!(config.database.max_connections, 30);
    }
}
