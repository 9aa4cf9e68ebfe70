//! # Configuration
//!
//! `ConnectionConfig` says where the store is; `ToolkitOptions` says how the
//! facade behaves (validation limits, value logging, subscriber timings,
//! retry). Both deserialize from partial JSON, with missing fields taking
//! their defaults. Durations are written as seconds and may be fractional.

use std::time::Duration;

use serde::Deserialize;

use crate::client::ClientConfig;
use crate::retry::RetryPolicy;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(with = "duration_secs_opt")]
    pub connect_timeout: Option<Duration>,
    #[serde(with = "duration_secs_opt")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "duration_secs_opt")]
    pub write_timeout: Option<Duration>,
    pub max_idle: usize,
    pub max_total: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: None,
            write_timeout: None,
            max_idle: 8,
            max_total: 16,
        }
    }
}

impl ConnectionConfig {
    /// Config pointing at `addr` ("host:port"), other fields defaulted.
    pub fn from_addr(addr: &str) -> Self {
        let mut config = ConnectionConfig::default();
        match addr.rsplit_once(':') {
            Some((host, port)) => {
                config.host = host.to_string();
                if let Ok(port) = port.parse() {
                    config.port = port;
                }
            }
            None => config.host = addr.to_string(),
        }
        config
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Converts to the client's configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            addr: self.addr(),
            max_idle: self.max_idle,
            max_total: self.max_total,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            connect_timeout: self.connect_timeout,
            // Empty credentials mean "no AUTH".
            username: self.username.clone().filter(|u| !u.is_empty()),
            password: self.password.clone().filter(|p| !p.is_empty()),
            db: self.db,
        }
    }
}

/// Facade behaviour knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToolkitOptions {
    /// Log values passing through set/get/publish/subscribe at info level.
    pub log_values: bool,
    /// Characters of a value kept in log lines before truncation.
    pub max_log_size: usize,
    /// Pause after an unexpected subscriber failure.
    #[serde(with = "duration_secs")]
    pub subscriber_retry_delay: Duration,
    /// How long `stop` waits for the listener thread.
    #[serde(with = "duration_secs")]
    pub subscriber_stop_timeout: Duration,
    /// Interval between liveness probes while reconnecting.
    #[serde(with = "duration_secs")]
    pub reconnect_poll_interval: Duration,
    /// Largest encoded value accepted, in bytes.
    pub max_value_size: usize,
    /// Longest key accepted, in characters.
    pub max_key_length: usize,
    /// Enforce the two limits above.
    pub enable_validation: bool,
    pub retry: RetryPolicy,
}

impl Default for ToolkitOptions {
    fn default() -> Self {
        ToolkitOptions {
            log_values: true,
            max_log_size: 256,
            subscriber_retry_delay: Duration::from_secs(5),
            subscriber_stop_timeout: Duration::from_secs(5),
            reconnect_poll_interval: Duration::from_secs(5),
            max_value_size: 10 * 1024 * 1024,
            max_key_length: 512,
            enable_validation: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ToolkitOptions {
    /// Parses options from JSON; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Batches may total ten single-value limits.
    pub fn max_batch_size(&self) -> usize {
        self.max_value_size.saturating_mul(10)
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod duration_secs_opt {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
