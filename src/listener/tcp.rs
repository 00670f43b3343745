//! Raw TCP capture listener.
//!
//! A TCP listener accepts exactly one connection during its lifetime. Bytes
//! received from the peer and bytes sent through [`TcpCaptureListener::send`]
//! are appended to one log in completion order.
//!
//! # State Machine
//!
//! ```text
//!  Listening ──accept ok──> Connected ──read error / EOF──> Closed
//!      │                                                      ^
//!      └──────────────────accept error────────────────────────┘
//! ```
//!
//! Reaching `Closed` on its own tears the listener down (tunnel, socket,
//! connection) and reports [`ListenerEvent::Terminated`] to the registry.
//! A listener never returns to `Listening`.
//!
//! # Example
//!
//! ```ignore
//! let socket = tcp::bind(host, 4444).await?;
//! let tunnel = provider.open(4444).await?;
//! let listener = TcpCaptureListener::spawn(4444, socket, tunnel, &options, notify);
//!
//! listener.send(b"id\n").await?;
//! let window = listener.read(0, 0);
//! listener.close().await?;
//! ```

use super::{
    EventSender, ListenerError, ListenerEvent, ListenerOptions, ListenerResult, Protocol,
    shutdown_signalled,
};
use crate::store::{ErrorLog, LogStore, LogWindow};
use crate::telemetry::{EventLogger, ProbeEvent};
use crate::tunnel::Tunnel;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum bytes read from the peer per call.
const READ_CHUNK_SIZE: usize = 4096;

/// Bind the local socket for a TCP listener.
///
/// # Errors
///
/// Returns [`ListenerError::BindFailed`] if the address is unavailable.
pub async fn bind(host: IpAddr, port: u16) -> ListenerResult<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| ListenerError::BindFailed { host, port, source })
}

/// Observable phase of a TCP listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpPhase {
    /// Waiting for the single connection.
    Listening,
    /// A peer is connected.
    Connected,
    /// Torn down; no further traffic.
    Closed,
}

type SharedWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

enum TcpState {
    Listening,
    Connected { peer: SocketAddr, writer: SharedWriter },
    Closed,
}

impl TcpState {
    fn phase(&self) -> TcpPhase {
        match self {
            TcpState::Listening => TcpPhase::Listening,
            TcpState::Connected { .. } => TcpPhase::Connected,
            TcpState::Closed => TcpPhase::Closed,
        }
    }

    /// Install the connection. Only legal from `Listening`.
    fn connect(&mut self, peer: SocketAddr, writer: OwnedWriteHalf) -> bool {
        if !matches!(self, TcpState::Listening) {
            return false;
        }
        *self = TcpState::Connected {
            peer,
            writer: Arc::new(AsyncMutex::new(writer)),
        };
        true
    }

    /// Move to `Closed`, handing back the connection's writer if any.
    fn close(&mut self) -> Option<SharedWriter> {
        match std::mem::replace(self, TcpState::Closed) {
            TcpState::Connected { writer, .. } => Some(writer),
            _ => None,
        }
    }
}

struct TcpShared {
    id: Uuid,
    port: u16,
    public_url: String,
    log: LogStore,
    errors: ErrorLog,
    state: Mutex<TcpState>,
    tunnel: Mutex<Option<Box<dyn Tunnel>>>,
    events: Arc<EventLogger>,
}

impl TcpShared {
    fn close_tunnel(&self) -> ListenerResult<()> {
        let tunnel = self.tunnel.lock().unwrap().take();
        match tunnel {
            Some(mut tunnel) => tunnel.close().map_err(ListenerError::from),
            None => Ok(()),
        }
    }

    /// Worker-initiated teardown: tunnel, then socket, then connection.
    fn teardown(&self, socket: TcpListener, reader: Option<OwnedReadHalf>, notify: &EventSender) {
        if let Err(e) = self.close_tunnel() {
            self.errors
                .push(format!("tunnel close failed port={}: {}", self.port, e));
        }
        drop(socket);
        let writer = self.state.lock().unwrap().close();
        drop(writer);
        drop(reader);

        let errors = self.errors.drain();
        let reason = errors
            .last()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        warn!("TCP listener on port {} terminated: {}", self.port, reason);
        self.events.log(ProbeEvent::ListenerFailed {
            protocol: Protocol::Tcp,
            port: self.port,
            reason,
        });

        let _ = notify.send(ListenerEvent::Terminated {
            protocol: Protocol::Tcp,
            port: self.port,
            id: self.id,
            errors,
        });
    }
}

/// A single-connection TCP capture listener.
pub struct TcpCaptureListener {
    shared: Arc<TcpShared>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TcpCaptureListener {
    /// Start accepting on an already bound socket.
    ///
    /// # Arguments
    ///
    /// * `port` - Registry port this listener occupies
    /// * `socket` - Bound local socket, owned by the listener from now on
    /// * `tunnel` - Open tunnel, closed first on teardown
    /// * `options` - Log bounds and event sink
    /// * `notify` - Channel for lifecycle events to the registry
    pub fn spawn(
        port: u16,
        socket: TcpListener,
        tunnel: Box<dyn Tunnel>,
        options: &ListenerOptions,
        notify: EventSender,
    ) -> Self {
        let shared = Arc::new(TcpShared {
            id: Uuid::new_v4(),
            port,
            public_url: tunnel.public_url(),
            log: LogStore::new(options.log_max_bytes),
            errors: ErrorLog::new(options.error_log_capacity),
            state: Mutex::new(TcpState::Listening),
            tunnel: Mutex::new(Some(tunnel)),
            events: options.events.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shared.clone(), socket, shutdown_rx, notify));

        info!("TCP listener started on port {}", port);

        Self {
            shared,
            shutdown_tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Unique listener id.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Local port.
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Public URL reported by the tunnel.
    pub fn public_url(&self) -> &str {
        &self.shared.public_url
    }

    /// Current phase.
    pub fn phase(&self) -> TcpPhase {
        self.shared.state.lock().unwrap().phase()
    }

    /// Whether a peer is currently connected.
    pub fn is_connected(&self) -> bool {
        self.phase() == TcpPhase::Connected
    }

    /// Remote address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &*self.shared.state.lock().unwrap() {
            TcpState::Connected { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    /// Write `data` to the peer and record it in the log.
    ///
    /// Returns the number of bytes sent.
    ///
    /// # Errors
    ///
    /// - [`ListenerError::NoActiveConnection`] before a peer connects
    /// - [`ListenerError::Closed`] after teardown
    /// - [`ListenerError::SendFailed`] if the write fails (nothing is logged)
    pub async fn send(&self, data: &[u8]) -> ListenerResult<usize> {
        let writer = {
            let state = self.shared.state.lock().unwrap();
            match &*state {
                TcpState::Connected { writer, .. } => writer.clone(),
                TcpState::Listening => return Err(ListenerError::NoActiveConnection),
                TcpState::Closed => return Err(ListenerError::Closed(self.shared.port)),
            }
        };

        let mut writer = writer.lock().await;
        let sent = write_logged(&mut *writer, data, &self.shared.log).await?;

        debug!("Sent {} bytes on port {}", sent, self.shared.port);
        Ok(sent)
    }

    /// Read a window of the traffic log.
    pub fn read(&self, offset: u64, limit: usize) -> LogWindow {
        self.shared.log.read(offset, limit)
    }

    /// Traffic log.
    pub fn log(&self) -> &LogStore {
        &self.shared.log
    }

    /// Recorded error messages, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.shared.errors.messages()
    }

    /// Close the listener: tunnel first, then socket and connection.
    ///
    /// Returns once the socket is released. A tunnel close failure is
    /// returned after the socket and connection have been released anyway.
    pub async fn close(&self) -> ListenerResult<()> {
        let tunnel_result = self.shared.close_tunnel();

        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("TCP worker on port {} ended abnormally: {}", self.shared.port, e);
        }

        // Covers a worker that panicked before reaching its own teardown
        let writer = self.shared.state.lock().unwrap().close();
        drop(writer);

        info!("TCP listener on port {} closed", self.shared.port);
        tunnel_result
    }
}

impl Drop for TcpCaptureListener {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Write all of `data`, then append it to `log`. Nothing is logged on failure.
async fn write_logged<W>(writer: &mut W, data: &[u8], log: &LogStore) -> ListenerResult<usize>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(data)
        .await
        .map_err(ListenerError::SendFailed)?;
    log.append(data);
    Ok(data.len())
}

/// Accept one connection, then record inbound traffic until it ends.
async fn run(
    shared: Arc<TcpShared>,
    socket: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
    notify: EventSender,
) {
    let port = shared.port;

    let accepted = tokio::select! {
        result = socket.accept() => result,
        _ = shutdown_signalled(&mut shutdown_rx) => {
            debug!("TCP listener on port {} stopped before accepting", port);
            drop(socket);
            let _ = shared.state.lock().unwrap().close();
            return;
        }
    };

    let (stream, peer) = match accepted {
        Ok(pair) => pair,
        Err(e) => {
            shared.errors.push(format!("accept failed port={}: {}", port, e));
            shared.teardown(socket, None, &notify);
            return;
        }
    };

    let (mut reader, writer) = stream.into_split();
    if !shared.state.lock().unwrap().connect(peer, writer) {
        debug!("TCP listener on port {} closed during accept", port);
        return;
    }

    info!("TCP connection on port {} from {}", port, peer);
    shared.events.log(ProbeEvent::ConnectionAccepted {
        port,
        peer: peer.to_string(),
    });
    let _ = notify.send(ListenerEvent::Connected { port, id: shared.id });

    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let result = tokio::select! {
            result = reader.read(&mut buf) => result,
            _ = shutdown_signalled(&mut shutdown_rx) => {
                debug!("TCP listener on port {} stopping", port);
                drop(socket);
                let writer = shared.state.lock().unwrap().close();
                drop(writer);
                drop(reader);
                return;
            }
        };

        match result {
            Ok(0) => {
                shared
                    .errors
                    .push(format!("read failed port={}: end of stream", port));
                break;
            }
            Ok(n) => shared.log.append(&buf[..n]),
            Err(e) => {
                shared.errors.push(format!("read failed port={}: {}", port, e));
                break;
            }
        }
    }

    shared.teardown(socket, Some(reader), &notify);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{LoopbackTunnelProvider, TunnelProvider};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    /// Accepts a few bytes, then fails like a reset connection.
    struct BrokenWriter {
        budget: usize,
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn start() -> (TcpCaptureListener, mpsc::UnboundedReceiver<ListenerEvent>) {
        let host = IpAddr::from([127, 0, 0, 1]);
        let socket = bind(host, 0).await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let tunnel = LoopbackTunnelProvider::default().open(port).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let listener =
            TcpCaptureListener::spawn(port, socket, tunnel, &ListenerOptions::default(), tx);
        (listener, rx)
    }

    #[test]
    fn test_close_from_closed_is_noop() {
        let mut state = TcpState::Closed;
        assert!(state.close().is_none());
        assert_eq!(state.phase(), TcpPhase::Closed);
    }

    #[tokio::test]
    async fn test_failed_write_logs_nothing() {
        let log = LogStore::new(64);
        let mut writer = BrokenWriter { budget: 3 };

        let err = write_logged(&mut writer, b"partial", &log).await.unwrap_err();
        assert!(matches!(err, ListenerError::SendFailed(_)));
        assert!(err.to_string().starts_with("failed to send data"));
        assert_eq!(log.total_len(), 0);
    }

    #[tokio::test]
    async fn test_successful_write_is_logged() {
        let log = LogStore::new(64);
        let mut writer = Vec::new();

        let sent = write_logged(&mut writer, b"id\n", &log).await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(writer, b"id\n");
        assert_eq!(log.read(0, 0).data, b"id\n");
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (listener, _rx) = start().await;
        assert_eq!(listener.phase(), TcpPhase::Listening);

        let err = listener.send(b"early").await.unwrap_err();
        assert!(matches!(err, ListenerError::NoActiveConnection));
        assert_eq!(listener.log().total_len(), 0);

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_traffic_is_logged_in_both_directions() {
        let (listener, mut rx) = start().await;
        let mut client = TcpStream::connect(("127.0.0.1", listener.port()))
            .await
            .unwrap();

        wait_until(|| listener.is_connected()).await;
        assert!(matches!(
            rx.recv().await,
            Some(ListenerEvent::Connected { .. })
        ));

        client.write_all(b"hello ").await.unwrap();
        wait_until(|| listener.log().total_len() == 6).await;

        let sent = listener.send(b"world").await.unwrap();
        assert_eq!(sent, 5);

        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"world");

        assert_eq!(listener.read(0, 0).data, b"hello world");
        assert!(listener.peer_addr().is_some());

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_disconnect_tears_down() {
        let (listener, mut rx) = start().await;
        let client = TcpStream::connect(("127.0.0.1", listener.port()))
            .await
            .unwrap();
        wait_until(|| listener.is_connected()).await;
        drop(client);

        loop {
            match rx.recv().await {
                Some(ListenerEvent::Terminated { port, id, errors, .. }) => {
                    assert_eq!(port, listener.port());
                    assert_eq!(id, listener.id());
                    assert!(errors[0].message.contains("end of stream"));
                    break;
                }
                Some(ListenerEvent::Connected { .. }) => continue,
                None => panic!("event channel closed"),
            }
        }

        assert_eq!(listener.phase(), TcpPhase::Closed);
        let err = listener.send(b"late").await.unwrap_err();
        assert!(matches!(err, ListenerError::Closed(_)));
    }

    #[tokio::test]
    async fn test_close_releases_port() {
        let (listener, _rx) = start().await;
        let port = listener.port();

        listener.close().await.unwrap();
        assert_eq!(listener.phase(), TcpPhase::Closed);

        let rebound = bind(IpAddr::from([127, 0, 0, 1]), port).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_close_while_connected() {
        let (listener, _rx) = start().await;
        let mut client = TcpStream::connect(("127.0.0.1", listener.port()))
            .await
            .unwrap();
        wait_until(|| listener.is_connected()).await;

        listener.close().await.unwrap();

        // Peer sees the connection end
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
}
