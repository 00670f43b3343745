//! Configuration schema types.
//!
//! Every key is optional so that a partial file only overrides what it
//! names. Accessors fall back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use super::error::ConfigError;
use crate::listener::{
    DEFAULT_ERROR_LOG_CAPACITY, DEFAULT_LOG_MAX_BYTES, DEFAULT_MAX_BODY_BYTES, ListenerOptions,
};
use crate::registry::DEFAULT_BACKGROUND_ERROR_CAPACITY;
use crate::telemetry::EventLogger;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Settings shared by every listener.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// HTTP capture settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// General settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Tracing filter used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Emit structured lifecycle events.
    #[serde(default)]
    pub events: Option<bool>,
}

/// Listener settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address listeners bind to.
    #[serde(default)]
    pub bind_host: Option<IpAddr>,

    /// Per-listener log bound in bytes (0 = unbounded).
    #[serde(default)]
    pub log_max_bytes: Option<usize>,

    /// Per-listener error log capacity.
    #[serde(default)]
    pub error_log_capacity: Option<usize>,
}

/// HTTP capture settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request bodies beyond this many bytes are truncated in the log.
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

/// Registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capacity of the error log that outlives self-terminated listeners.
    #[serde(default)]
    pub background_error_capacity: Option<usize>,
}

impl Config {
    /// Merge another config into this one. Keys set in `other` win.
    pub fn merge(&mut self, other: Config) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.general.log_level, other.general.log_level);
        take(&mut self.general.events, other.general.events);
        take(&mut self.listener.bind_host, other.listener.bind_host);
        take(&mut self.listener.log_max_bytes, other.listener.log_max_bytes);
        take(
            &mut self.listener.error_log_capacity,
            other.listener.error_log_capacity,
        );
        take(&mut self.http.max_body_bytes, other.http.max_body_bytes);
        take(
            &mut self.registry.background_error_capacity,
            other.registry.background_error_capacity,
        );
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("listener.error_log_capacity", self.listener.error_log_capacity),
            ("http.max_body_bytes", self.http.max_body_bytes),
            (
                "registry.background_error_capacity",
                self.registry.background_error_capacity,
            ),
        ];

        for (field, value) in positive {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if let Some(level) = &self.general.log_level
            && level.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Whether lifecycle events are emitted (default true).
    pub fn events_enabled(&self) -> bool {
        self.general.events.unwrap_or(true)
    }

    /// Listener bind address (default 127.0.0.1).
    pub fn bind_host(&self) -> IpAddr {
        self.listener
            .bind_host
            .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
    }

    /// Per-listener log bound.
    pub fn log_max_bytes(&self) -> usize {
        self.listener.log_max_bytes.unwrap_or(DEFAULT_LOG_MAX_BYTES)
    }

    /// Per-listener error log capacity.
    pub fn error_log_capacity(&self) -> usize {
        self.listener
            .error_log_capacity
            .unwrap_or(DEFAULT_ERROR_LOG_CAPACITY)
    }

    /// HTTP body capture cap.
    pub fn max_body_bytes(&self) -> usize {
        self.http.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }

    /// Registry background error capacity.
    pub fn background_error_capacity(&self) -> usize {
        self.registry
            .background_error_capacity
            .unwrap_or(DEFAULT_BACKGROUND_ERROR_CAPACITY)
    }

    /// Build listener options from this configuration.
    pub fn listener_options(&self, events: Arc<EventLogger>) -> ListenerOptions {
        ListenerOptions {
            bind_host: self.bind_host(),
            log_max_bytes: self.log_max_bytes(),
            error_log_capacity: self.error_log_capacity(),
            max_body_bytes: self.max_body_bytes(),
            events,
        }
    }
}
