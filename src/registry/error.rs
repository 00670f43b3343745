//! Error types for registry operations.

use crate::listener::{ListenerError, Protocol};
use thiserror::Error;

/// Errors from the listener registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Port 0 cannot be registered.
    #[error("invalid port {0}")]
    InvalidPort(u16),

    /// The port is already claimed by a listener of either kind.
    #[error("port {port} already listening ({holder})")]
    Conflict {
        /// Requested port.
        port: u16,
        /// Kind of the listener holding the port.
        holder: Protocol,
    },

    /// No live listener of the requested kind holds the port.
    #[error("port {port} not listening ({protocol})")]
    NotListening {
        /// Requested port.
        port: u16,
        /// Requested listener kind.
        protocol: Protocol,
    },

    /// The reservation was cleared by `close_all` while the open was still
    /// running. The new listener was closed again.
    #[error("open of {protocol} listener on port {port} cancelled")]
    Cancelled {
        /// Requested port.
        port: u16,
        /// Requested listener kind.
        protocol: Protocol,
    },

    /// Opening the tunnel or binding the socket failed. Partial resources
    /// were released.
    #[error("failed to open {protocol} listener on port {port}: {source}")]
    Provision {
        /// Requested port.
        port: u16,
        /// Requested listener kind.
        protocol: Protocol,
        /// What failed.
        #[source]
        source: ListenerError,
    },

    /// Closing the listener reported a failure. Its socket is released
    /// regardless.
    #[error("failed to close {protocol} listener on port {port}: {source}")]
    CloseFailed {
        /// Listener port.
        port: u16,
        /// Listener kind.
        protocol: Protocol,
        /// What failed.
        #[source]
        source: ListenerError,
    },

    /// A listener operation failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelError;

    #[test]
    fn test_conflict_error() {
        let err = RegistryError::Conflict {
            port: 8080,
            holder: Protocol::Http,
        };
        assert_eq!(err.to_string(), "port 8080 already listening (http)");
    }

    #[test]
    fn test_not_listening_error() {
        let err = RegistryError::NotListening {
            port: 4444,
            protocol: Protocol::Tcp,
        };
        assert!(err.to_string().contains("not listening"));
        assert!(err.to_string().contains("4444"));
    }

    #[test]
    fn test_provision_error_keeps_source() {
        let err = RegistryError::Provision {
            port: 4444,
            protocol: Protocol::Tcp,
            source: ListenerError::Tunnel(TunnelError::OpenFailed {
                port: 4444,
                message: "offline".to_string(),
            }),
        };
        assert!(err.to_string().contains("offline"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_listener_error_is_transparent() {
        let err = RegistryError::from(ListenerError::NoActiveConnection);
        assert_eq!(err.to_string(), "no active connections");
    }
}
