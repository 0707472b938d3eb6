use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::bridge::BackoffPolicy;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub idle_threshold: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub queue_capacity: usize,
    pub heartbeat: HeartbeatConfig,
    pub backoff: BackoffPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = env_parse("PORT", 8086u16)?;
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let queue_capacity = env_parse("QUEUE_CAPACITY", 100usize)?;
        let heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECS", 30u64)?),
            idle_threshold: Duration::from_secs(env_parse("IDLE_THRESHOLD_SECS", 60u64)?),
        };
        let backoff = BackoffPolicy {
            base: Duration::from_millis(env_parse("RECONNECT_BASE_MS", 100u64)?),
            multiplier: 2,
            cap: Duration::from_millis(env_parse("RECONNECT_CAP_MS", 2000u64)?),
        };

        Ok(Self {
            port,
            redis_url,
            queue_capacity,
            heartbeat,
            backoff,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{name} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
