//! Structured lifecycle events for oob-probe.
//!
//! Listener lifecycle changes and captured traffic are reported as JSON
//! events on the `oob_probe::events` tracing target, separate from the
//! free-form diagnostic logs.
//!
//! # Usage
//!
//! ```
//! use oob_probe::telemetry::{EventLogger, ProbeEvent};
//! use oob_probe::listener::Protocol;
//!
//! let events = EventLogger::new(true);
//! events.log(ProbeEvent::ListenerOpened {
//!     protocol: Protocol::Http,
//!     port: 8080,
//!     public_url: "tcp://127.0.0.1:8080".to_string(),
//! });
//! ```
//!
//! # Event Format
//!
//! Events are serialized as JSON with an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"listener_opened","protocol":"http","port":8080,"public_url":"tcp://127.0.0.1:8080"}
//! ```

mod events;
mod logger;

pub use events::{ProbeEvent, TimestampedEvent};
pub use logger::{EVENT_TARGET, EventLogger};
