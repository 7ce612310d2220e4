use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::store::StoreSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub redis_url: Option<String>,
    pub redis_connect_timeout_secs: u64,
    pub redis_response_timeout_ms: u64,
    pub delivery_id_prefix: String,
    pub connection_buffer_size: usize,
    pub event_buffer_size: usize,
    pub live_ttl_secs: u64,
    pub history_retention_secs: u64,
    pub history_cap: usize,
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 8080)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            redis_connect_timeout_secs: parse_or_default("REDIS_CONNECT_TIMEOUT_SECS", 5)?,
            redis_response_timeout_ms: parse_or_default("REDIS_RESPONSE_TIMEOUT_MS", 3000)?,
            delivery_id_prefix: env::var("DELIVERY_ID_PREFIX").unwrap_or_else(|_| "DLV".to_string()),
            connection_buffer_size: parse_or_default("CONNECTION_BUFFER_SIZE", 256)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            live_ttl_secs: parse_or_default("LIVE_TTL_SECS", 24 * 60 * 60)?,
            history_retention_secs: parse_or_default("HISTORY_RETENTION_SECS", 7 * 24 * 60 * 60)?,
            history_cap: parse_or_default("HISTORY_CAP", 1000)?,
            stale_after_secs: parse_or_default("STALE_AFTER_SECS", 30 * 60)?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", 5 * 60)?,
        })
    }

    pub fn redis_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_connect_timeout_secs.max(1))
    }

    /// Bounds every Redis reply and every broker publish.
    pub fn redis_response_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_response_timeout_ms.max(1))
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            live_ttl: Duration::from_secs(self.live_ttl_secs),
            history_retention: Duration::from_secs(self.history_retention_secs),
            history_cap: self.history_cap.max(1),
            stale_after: Duration::from_secs(self.stale_after_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            redis_url: None,
            redis_connect_timeout_secs: 5,
            redis_response_timeout_ms: 3000,
            delivery_id_prefix: "DLV".to_string(),
            connection_buffer_size: 256,
            event_buffer_size: 1024,
            live_ttl_secs: 24 * 60 * 60,
            history_retention_secs: 7 * 24 * 60 * 60,
            history_cap: 1000,
            stale_after_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, LogFormat};

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" compact ".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("pretty".parse::<LogFormat>().is_err());
    }

    #[test]
    fn store_settings_never_zero_cap_or_interval() {
        let config = Config {
            history_cap: 0,
            sweep_interval_secs: 0,
            ..Config::default()
        };

        let settings = config.store_settings();
        assert_eq!(settings.history_cap, 1);
        assert!(!settings.sweep_interval.is_zero());
    }

    #[test]
    fn response_timeout_defaults_to_three_seconds_and_is_never_zero() {
        assert_eq!(Config::default().redis_response_timeout().as_millis(), 3000);

        let config = Config {
            redis_response_timeout_ms: 0,
            ..Config::default()
        };
        assert!(!config.redis_response_timeout().is_zero());
    }
}
