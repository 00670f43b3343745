//! oob-probe: ephemeral capture listeners for out-of-band interaction testing
//!
//! This crate opens short-lived TCP and HTTP listeners on demand, exposes each
//! one through a tunnel, and records every byte or request that reaches it in a
//! bounded, offset-addressed log.
//!
//! # Architecture
//!
//! - **Store**: bounded byte log with offset pagination, plus a bounded error log
//! - **Listener**: single-connection TCP capture and concurrent HTTP capture
//! - **Registry**: port table enforcing one listener per port across kinds
//! - **Tunnel**: collaborator contract for public reachability
//! - **Control**: newline-delimited JSON request surface
//! - **Config**: hierarchical TOML configuration
//! - **Telemetry**: structured lifecycle events through `tracing`

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod control;
pub mod listener;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod tunnel;
