//! Configuration system for oob-probe.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. User config: `~/.config/oob-probe/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Missing default-location files are skipped. A file named with
//! `--config` must exist.
//!
//! # Merge Behavior
//!
//! Every key is a scalar and a later source overrides an earlier one when
//! it sets the key.
//!
//! ```toml
//! [general]
//! log_level = "info"
//! events = true
//!
//! [listener]
//! bind_host = "127.0.0.1"
//! log_max_bytes = 16777216
//! error_log_capacity = 256
//!
//! [http]
//! max_body_bytes = 1048576
//!
//! [registry]
//! background_error_capacity = 256
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{Config, GeneralConfig, HttpConfig, ListenerConfig, RegistryConfig};
