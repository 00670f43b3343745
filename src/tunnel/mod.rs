//! Tunnel collaborator contract.
//!
//! A tunnel makes a local listener reachable from outside. The registry only
//! needs two things from it: a public URL to hand back to the caller, and a
//! way to close it when the listener goes away.
//!
//! # Architecture
//!
//! ```text
//! Registry ──open(local_port)──> TunnelProvider ──> Box<dyn Tunnel>
//!                                                    ├─ public_url()
//!                                                    └─ close()
//! ```
//!
//! [`LoopbackTunnelProvider`] is the built-in provider. It does not forward
//! anything and reports the bind address itself as the public URL, which is
//! what a probe running on a directly reachable host wants.

pub mod loopback;

pub use loopback::{LoopbackTunnel, LoopbackTunnelProvider};

use std::future::Future;
use thiserror::Error;

/// Errors from tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The provider could not open a tunnel to the local port.
    #[error("Failed to open tunnel for port {port}: {message}")]
    OpenFailed {
        /// Local port the tunnel was meant to expose.
        port: u16,
        /// Provider-specific description.
        message: String,
    },

    /// Closing the tunnel failed.
    #[error("Failed to close tunnel {url}: {message}")]
    CloseFailed {
        /// Public URL of the tunnel being closed.
        url: String,
        /// Provider-specific description.
        message: String,
    },

    /// Underlying I/O failure.
    #[error("Tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// An open tunnel. Owned exclusively by one listener.
pub trait Tunnel: Send + Sync {
    /// Publicly reachable URL that forwards to the local port.
    fn public_url(&self) -> String;

    /// Tear the tunnel down. Called at most once per listener.
    fn close(&mut self) -> TunnelResult<()>;
}

/// Opens tunnels for local ports.
pub trait TunnelProvider: Send + Sync + 'static {
    /// Open a tunnel forwarding to `local_port`.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::OpenFailed`] if the provider cannot expose the port.
    fn open(
        &self,
        local_port: u16,
    ) -> impl Future<Output = TunnelResult<Box<dyn Tunnel>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failed_error() {
        let err = TunnelError::OpenFailed {
            port: 4444,
            message: "quota exceeded".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4444"));
        assert!(msg.contains("quota exceeded"));
    }

    #[test]
    fn test_close_failed_error() {
        let err = TunnelError::CloseFailed {
            url: "tcp://127.0.0.1:4444".to_string(),
            message: "session gone".to_string(),
        };
        assert!(err.to_string().contains("tcp://127.0.0.1:4444"));
    }
}
