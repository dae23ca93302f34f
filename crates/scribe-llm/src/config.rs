//! Backend and gateway configuration.
//!
//! [`Settings`] is the serialized form (a JSON file for the CLI); it
//! converts into the runtime [`GatewayConfig`] plus an [`AnthropicConfig`]
//! describing how to reach the backend.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::retry::RetryConfig;

/// Default cap on concurrently in-flight asynchronous requests.
pub const DEFAULT_IN_FLIGHT_LIMIT: usize = 10;

/// Default model for requests that do not name one.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Runtime configuration for a [`Gateway`](crate::gateway::Gateway).
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Maximum number of asynchronous requests admitted at once (default: 10).
    pub in_flight_limit: usize,
    /// How long an asynchronous request may wait for admission. `None` waits indefinitely.
    pub admission_timeout: Option<Duration>,
    /// Retry policy shared by both calling conventions.
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            in_flight_limit: DEFAULT_IN_FLIGHT_LIMIT,
            admission_timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

/// How to reach the Anthropic Messages API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Base URL (e.g. "https://api.anthropic.com/v1").
    pub base_url: String,

    /// Environment variable that holds the API key.
    pub api_key_env: String,

    /// Value of the `anthropic-version` header.
    pub api_version: String,

    /// Model used when the caller does not choose one.
    pub default_model: String,

    /// Extra HTTP headers to include in every request.
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds. `None` leaves the client default.
    pub timeout_secs: Option<u64>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            api_version: "2023-06-01".into(),
            default_model: DEFAULT_MODEL.into(),
            headers: HashMap::new(),
            timeout_secs: None,
        }
    }
}

impl AnthropicConfig {
    /// Read the API key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConfigured`] if the variable is unset or empty.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(GatewayError::NotConfigured(format!(
                "set {} env var",
                self.api_key_env
            ))),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Serialized gateway tuning, in whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub in_flight_limit: usize,
    pub admission_timeout_secs: Option<u64>,
    pub max_attempts: u32,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_elapsed_secs: Option<u64>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            in_flight_limit: DEFAULT_IN_FLIGHT_LIMIT,
            admission_timeout_secs: None,
            max_attempts: retry.max_attempts,
            min_delay_secs: retry.min_delay.as_secs(),
            max_delay_secs: retry.max_delay.as_secs(),
            max_elapsed_secs: None,
        }
    }
}

impl GatewaySettings {
    /// Convert into the runtime configuration.
    pub fn to_config(&self) -> GatewayConfig {
        GatewayConfig {
            in_flight_limit: self.in_flight_limit,
            admission_timeout: self.admission_timeout_secs.map(Duration::from_secs),
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                min_delay: Duration::from_secs(self.min_delay_secs),
                max_delay: Duration::from_secs(self.max_delay_secs),
                max_elapsed: self.max_elapsed_secs.map(Duration::from_secs),
                ..RetryConfig::default()
            },
        }
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub anthropic: AnthropicConfig,
    pub gateway: GatewaySettings,
}

impl Settings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
