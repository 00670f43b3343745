//! Error types for listener operations.

use crate::tunnel::TunnelError;
use std::net::IpAddr;
use thiserror::Error;

/// Errors from capture listeners.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind the local socket.
    #[error("Failed to listen on {host}:{port}: {source}")]
    BindFailed {
        /// Bind address.
        host: IpAddr,
        /// The port we tried to listen on.
        port: u16,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Send on a TCP listener that has no connection yet.
    #[error("no active connections")]
    NoActiveConnection,

    /// The listener has already been torn down.
    #[error("listener on port {0} is closed")]
    Closed(u16),

    /// Writing to the peer failed.
    #[error("failed to send data: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Tunnel operation failed.
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
}

/// Result type for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;
