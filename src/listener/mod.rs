//! Capture listeners.
//!
//! - [`TcpCaptureListener`]: raw TCP, one connection, bytes in both directions
//! - [`HttpCaptureListener`]: HTTP/1.1, one formatted log entry per request
//!
//! # Architecture
//!
//! Each listener owns its local socket, its tunnel handle and a
//! [`LogStore`](crate::store::LogStore). Background work runs on tokio tasks
//! that stop when the listener's `watch` shutdown signal flips to `true`.
//! Failures on those tasks are recorded in the listener's
//! [`ErrorLog`](crate::store::ErrorLog) and, when they end the listener,
//! reported to the registry as a [`ListenerEvent`].

pub mod error;
pub mod http;
pub mod tcp;

pub use error::{ListenerError, ListenerResult};
pub use http::HttpCaptureListener;
pub use tcp::{TcpCaptureListener, TcpPhase};

use crate::store::ErrorEntry;
use crate::telemetry::EventLogger;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Default maximum retained log bytes per listener (16 MiB).
pub const DEFAULT_LOG_MAX_BYTES: usize = 16 * 1024 * 1024;

/// Default number of errors retained per listener.
pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 256;

/// Default cap on logged HTTP body bytes (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Listener kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Raw TCP capture.
    Tcp,
    /// HTTP request capture.
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

/// Lifecycle notifications sent from listener tasks to the registry.
#[derive(Debug)]
pub enum ListenerEvent {
    /// A TCP listener accepted its connection.
    Connected {
        /// Listener port.
        port: u16,
        /// Listener id.
        id: Uuid,
    },
    /// A listener tore itself down.
    Terminated {
        /// Listener kind.
        protocol: Protocol,
        /// Listener port.
        port: u16,
        /// Listener id, used to ignore events from a replaced listener.
        id: Uuid,
        /// Errors the listener recorded before terminating.
        errors: Vec<ErrorEntry>,
    },
}

/// Sender half used by listeners to report lifecycle events.
pub type EventSender = mpsc::UnboundedSender<ListenerEvent>;

/// Settings shared by every listener a registry creates.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Address local sockets bind to.
    pub bind_host: IpAddr,
    /// Maximum retained log bytes per listener (0 = unbounded).
    pub log_max_bytes: usize,
    /// Errors retained per listener.
    pub error_log_capacity: usize,
    /// Cap on logged HTTP body bytes.
    pub max_body_bytes: usize,
    /// Sink for lifecycle events.
    pub events: Arc<EventLogger>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            error_log_capacity: DEFAULT_ERROR_LOG_CAPACITY,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            events: Arc::new(EventLogger::new_null()),
        }
    }
}

/// Resolve once the shutdown flag is `true` or the sender is gone.
pub(crate) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
