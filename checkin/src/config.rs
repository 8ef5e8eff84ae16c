//! Configuration management for the check-in binaries.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use turnstile_runtime::retry::RetryPolicy;

/// Check-in configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// REST backend configuration
    pub api: ApiConfig,
    /// Arrivals channel configuration
    pub channel: ChannelConfig,
    /// Event this device or dashboard is bound to
    pub event_id: String,
    /// Tab-scoped session file (in-memory storage when unset)
    pub session_file: Option<PathBuf>,
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_filter: String,
}

/// REST backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl ApiConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Arrivals channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket URL
    pub url: String,
    /// First reconnect delay in milliseconds
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap in milliseconds
    pub reconnect_max_ms: u64,
}

impl ChannelConfig {
    /// Backoff used between reconnect attempts.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(self.reconnect_initial_ms))
            .max_delay(Duration::from_millis(self.reconnect_max_ms))
            .build()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing or malformed values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            api: ApiConfig {
                base_url: lookup("CHECKIN_API_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| "http://localhost:3000".to_string()),
                request_timeout_ms: number("CHECKIN_REQUEST_TIMEOUT_MS", 10_000),
            },
            channel: ChannelConfig {
                url: lookup("CHECKIN_WS_URL")
                    .unwrap_or_else(|| "ws://localhost:3000/ws".to_string()),
                reconnect_initial_ms: number("CHECKIN_RECONNECT_INITIAL_MS", 500),
                reconnect_max_ms: number("CHECKIN_RECONNECT_MAX_MS", 30_000),
            },
            event_id: lookup("CHECKIN_EVENT_ID").unwrap_or_default(),
            session_file: lookup("CHECKIN_SESSION_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            log_filter: lookup("CHECKIN_LOG").unwrap_or_else(|| "checkin=info".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.channel.url, "ws://localhost:3000/ws");
        assert_eq!(config.event_id, "");
        assert!(config.session_file.is_none());
        assert_eq!(config.log_filter, "checkin=info");
    }

    #[test]
    fn overrides_and_malformed_numbers() {
        let config = config(&[
            ("CHECKIN_API_URL", "https://api.example.com/"),
            ("CHECKIN_EVENT_ID", "evt-42"),
            ("CHECKIN_REQUEST_TIMEOUT_MS", "soon"),
            ("CHECKIN_RECONNECT_INITIAL_MS", "250"),
            ("CHECKIN_SESSION_FILE", "/tmp/checkin-session.json"),
        ]);

        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.event_id, "evt-42");
        assert_eq!(config.api.request_timeout_ms, 10_000);
        assert_eq!(
            config.session_file,
            Some(PathBuf::from("/tmp/checkin-session.json"))
        );

        let policy = config.channel.retry_policy();
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
