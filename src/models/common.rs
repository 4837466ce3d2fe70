use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::errors::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "wss://events.near.stream/ws";
pub const DEFAULT_CONTRACT_ID: &str = "contract.main.burrow.near";
pub const DEFAULT_TOKEN_ID: &str = "token.burrow.near";
pub const MAX_TIMELINE_LEN: usize = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub endpoint: String,
    pub secret: String,
    pub fetch_past_events: u32,
    pub reconnect_delay_ms: u64,
    pub hidden_retry_delay_ms: u64,
    // Bounds the open handshake only; an open but silent connection is not detected
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            secret: "brrr".to_string(),
            fetch_past_events: 50,
            reconnect_delay_ms: 1,
            hidden_retry_delay_ms: 1_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn hidden_retry_delay(&self) -> Duration {
        Duration::from_millis(self.hidden_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub status: String,
    pub contract_id: String,
    pub standard: String,
    // Initial actor account narrowing, if any
    pub account_id: Option<String>,
    pub debounce_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            status: "SUCCESS".to_string(),
            contract_id: DEFAULT_CONTRACT_ID.to_string(),
            standard: "burrow".to_string(),
            account_id: None,
            debounce_ms: 500,
        }
    }
}

impl FilterConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub max_len: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_len: MAX_TIMELINE_LEN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub filter: FilterConfig,
    pub timeline: TimelineConfig,
    pub default_token_id: String,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            filter: FilterConfig::default(),
            timeline: TimelineConfig::default(),
            default_token_id: DEFAULT_TOKEN_ID.to_string(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = url::Url::parse(&self.stream.endpoint).map_err(|e| {
            ConfigError::InvalidEndpoint {
                endpoint: self.stream.endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.stream.endpoint.clone(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }
        if self.timeline.max_len == 0 {
            return Err(ConfigError::ZeroTimelineCapacity);
        }
        Ok(())
    }
}
