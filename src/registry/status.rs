//! Status snapshot types.

use crate::listener::Protocol;
use crate::store::ErrorEntry;
use serde::Serialize;
use uuid::Uuid;

/// Result of opening a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Opened {
    /// Local port.
    pub port: u16,
    /// URL the probe target should reach.
    pub public_url: String,
}

/// Descriptor of one live listener.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    /// Listener id.
    pub id: Uuid,
    /// Listener kind.
    pub protocol: Protocol,
    /// Local port.
    pub port: u16,
    /// Public tunnel URL.
    pub public_url: String,
    /// Whether a peer is connected (TCP only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    /// Requests received (HTTP only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<u64>,
    /// Errors the listener recorded.
    pub errors: Vec<String>,
}

/// Snapshot of every live listener plus background errors.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Live listeners, sorted by port.
    pub listeners: Vec<ListenerStatus>,
    /// Errors from listeners that have since torn themselves down.
    pub errors: Vec<ErrorEntry>,
    /// Background errors evicted because the log was full.
    pub dropped_errors: u64,
}
