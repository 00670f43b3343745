//! Loopback tunnel provider.
//!
//! Reports the listener's own bind address as its public URL. Useful when the
//! probe host is directly reachable, and in tests.

use super::{Tunnel, TunnelProvider, TunnelResult};
use std::net::IpAddr;
use tracing::debug;

/// Provider whose tunnels point straight at the bind address.
#[derive(Debug, Clone)]
pub struct LoopbackTunnelProvider {
    host: IpAddr,
}

impl LoopbackTunnelProvider {
    /// Create a provider reporting URLs on `host`.
    #[must_use]
    pub fn new(host: IpAddr) -> Self {
        Self { host }
    }
}

impl Default for LoopbackTunnelProvider {
    fn default() -> Self {
        Self::new(IpAddr::from([127, 0, 0, 1]))
    }
}

impl TunnelProvider for LoopbackTunnelProvider {
    async fn open(&self, local_port: u16) -> TunnelResult<Box<dyn Tunnel>> {
        let url = match self.host {
            IpAddr::V4(ip) => format!("tcp://{}:{}", ip, local_port),
            IpAddr::V6(ip) => format!("tcp://[{}]:{}", ip, local_port),
        };
        debug!("Opened loopback tunnel {}", url);
        Ok(Box::new(LoopbackTunnel { url, closed: false }))
    }
}

/// Tunnel handle returned by [`LoopbackTunnelProvider`].
#[derive(Debug)]
pub struct LoopbackTunnel {
    url: String,
    closed: bool,
}

impl Tunnel for LoopbackTunnel {
    fn public_url(&self) -> String {
        self.url.clone()
    }

    fn close(&mut self) -> TunnelResult<()> {
        if !self.closed {
            debug!("Closed loopback tunnel {}", self.url);
            self.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[tokio::test]
    async fn test_default_url_is_localhost() {
        let provider = LoopbackTunnelProvider::default();
        let tunnel = provider.open(8080).await.unwrap();
        assert_eq!(tunnel.public_url(), "tcp://127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_ipv6_url_is_bracketed() {
        let provider = LoopbackTunnelProvider::new(IpAddr::V6(Ipv6Addr::LOCALHOST));
        let tunnel = provider.open(9000).await.unwrap();
        assert_eq!(tunnel.public_url(), "tcp://[::1]:9000");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut tunnel = LoopbackTunnel {
            url: "tcp://127.0.0.1:1".to_string(),
            closed: false,
        };
        tunnel.close().unwrap();
        tunnel.close().unwrap();
        assert!(tunnel.closed);
    }
}
