//! Lifecycle event types for structured logging.

use crate::listener::Protocol;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle events emitted by the registry and listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProbeEvent {
    /// A listener was opened and its tunnel is up.
    ListenerOpened {
        /// Listener kind.
        protocol: Protocol,
        /// Local port.
        port: u16,
        /// URL handed back to the caller.
        public_url: String,
    },

    /// A listener was closed on request.
    ListenerClosed {
        /// Listener kind.
        protocol: Protocol,
        /// Local port.
        port: u16,
    },

    /// A listener tore itself down after a runtime failure or disconnect.
    ListenerFailed {
        /// Listener kind.
        protocol: Protocol,
        /// Local port.
        port: u16,
        /// Last recorded error.
        reason: String,
    },

    /// A TCP listener accepted its connection.
    ConnectionAccepted {
        /// Local port.
        port: u16,
        /// Remote address of the peer.
        peer: String,
    },

    /// An HTTP listener captured a request.
    HttpRequest {
        /// Local port.
        port: u16,
        /// Request method.
        method: String,
        /// Request target.
        uri: String,
        /// Remote address of the client.
        remote: String,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a ProbeEvent,
}

impl ProbeEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
