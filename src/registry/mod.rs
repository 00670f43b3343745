//! Listener registry.
//!
//! The registry owns every live listener, keyed by port. A port is held by
//! at most one listener of either kind at a time.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────── Registry ────────────────┐
//!  open_tcp ──>│ reserve ─> tunnel ─> bind ─> spawn ─> commit
//!  open_http ─>│ reserve ─> bind+serve ─> tunnel ──> commit
//!              │                                          │
//!              │  slots: Mutex<HashMap<u16, Slot>>        │
//!              │                                          │
//!              │  supervisor <── ListenerEvent ── workers │
//!              └──────────────────────────────────────────┘
//! ```
//!
//! A reservation is written under the registry lock before any blocking
//! work, so a concurrent open of the same port sees it and fails with a
//! conflict. The tunnel and bind steps run outside the lock. If a step
//! fails (or the caller's future is dropped), the reservation is released
//! and the resources acquired so far are closed. If the reservation is
//! cleared while the open is still running (by `close_all`), the commit is
//! refused and the new listener is closed again.
//!
//! The supervisor task removes listeners that tore themselves down and keeps
//! their errors in the registry's background error log.
//!
//! # Example
//!
//! ```ignore
//! use oob_probe::registry::Registry;
//! use oob_probe::tunnel::LoopbackTunnelProvider;
//!
//! let registry = Registry::new(LoopbackTunnelProvider::default(), options);
//! let opened = registry.open_tcp(4444).await?;
//! println!("catching on {}", opened.public_url);
//!
//! registry.send_tcp(4444, b"id\n").await?;
//! let window = registry.read_tcp(4444, 0, 0)?;
//! registry.close_tcp(4444).await?;
//! ```

pub mod error;
pub mod status;

pub use error::{RegistryError, RegistryResult};
pub use status::{ListenerStatus, Opened, StatusReport};

use crate::listener::{
    EventSender, HttpCaptureListener, ListenerError, ListenerEvent, ListenerOptions, Protocol,
    TcpCaptureListener, TcpPhase, tcp,
};
use crate::store::{ErrorLog, LogWindow};
use crate::telemetry::{EventLogger, ProbeEvent};
use crate::tunnel::TunnelProvider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of background errors the registry keeps.
pub const DEFAULT_BACKGROUND_ERROR_CAPACITY: usize = 256;

/// One entry of the port table.
enum Slot {
    /// Claimed by an open still in progress, tagged with its reservation token.
    Reserved(Protocol, u64),
    Tcp(Arc<TcpCaptureListener>),
    Http(Arc<HttpCaptureListener>),
}

impl Slot {
    fn protocol(&self) -> Protocol {
        match self {
            Slot::Reserved(protocol, _) => *protocol,
            Slot::Tcp(_) => Protocol::Tcp,
            Slot::Http(_) => Protocol::Http,
        }
    }

    fn id(&self) -> Option<Uuid> {
        match self {
            Slot::Reserved(..) => None,
            Slot::Tcp(listener) => Some(listener.id()),
            Slot::Http(listener) => Some(listener.id()),
        }
    }

    /// A TCP listener that tore itself down before the supervisor removed it.
    fn is_stale(&self) -> bool {
        matches!(self, Slot::Tcp(listener) if listener.phase() == TcpPhase::Closed)
    }
}

type SlotTable = Mutex<HashMap<u16, Slot>>;

/// A claimed port. Released on drop unless committed.
struct Reservation<'a> {
    slots: &'a SlotTable,
    port: u16,
    token: u64,
    committed: bool,
}

impl Reservation<'_> {
    fn holds(&self, slots: &HashMap<u16, Slot>) -> bool {
        matches!(slots.get(&self.port), Some(Slot::Reserved(_, token)) if *token == self.token)
    }

    /// Replace the reservation with `slot`.
    ///
    /// Returns `false` without inserting if the reservation was cleared in
    /// the meantime.
    #[must_use]
    fn commit(mut self, slot: Slot) -> bool {
        self.committed = true;
        let mut slots = self.slots.lock().unwrap();
        if !self.holds(&slots) {
            return false;
        }
        slots.insert(self.port, slot);
        true
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.slots.lock().unwrap();
        if self.holds(&slots) {
            slots.remove(&self.port);
            debug!("Released reservation for port {}", self.port);
        }
    }
}

/// Registry of capture listeners.
///
/// Must be created inside a tokio runtime: it spawns its supervisor task.
pub struct Registry<P: TunnelProvider> {
    provider: P,
    options: ListenerOptions,
    slots: Arc<SlotTable>,
    next_token: AtomicU64,
    background: Arc<ErrorLog>,
    notify: EventSender,
    supervisor: JoinHandle<()>,
}

impl<P: TunnelProvider> Registry<P> {
    /// Create a registry with the default background error capacity.
    pub fn new(provider: P, options: ListenerOptions) -> Self {
        Self::with_capacity(provider, options, DEFAULT_BACKGROUND_ERROR_CAPACITY)
    }

    /// Create a registry keeping at most `background_capacity` background errors.
    pub fn with_capacity(
        provider: P,
        options: ListenerOptions,
        background_capacity: usize,
    ) -> Self {
        let slots = Arc::new(Mutex::new(HashMap::new()));
        let background = Arc::new(ErrorLog::new(background_capacity));
        let (notify, events_rx) = mpsc::unbounded_channel();

        let supervisor = tokio::spawn(supervise(events_rx, slots.clone(), background.clone()));

        Self {
            provider,
            options,
            slots,
            next_token: AtomicU64::new(0),
            background,
            notify,
            supervisor,
        }
    }

    fn events(&self) -> &EventLogger {
        &self.options.events
    }

    fn reserve(&self, port: u16, protocol: Protocol) -> RegistryResult<Reservation<'_>> {
        if port == 0 {
            return Err(RegistryError::InvalidPort(port));
        }

        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get(&port) {
            if !slot.is_stale() {
                return Err(RegistryError::Conflict {
                    port,
                    holder: slot.protocol(),
                });
            }
            debug!("Dropping torn-down TCP listener on port {}", port);
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        slots.insert(port, Slot::Reserved(protocol, token));

        Ok(Reservation {
            slots: &self.slots,
            port,
            token,
            committed: false,
        })
    }

    /// Open a TCP capture listener.
    ///
    /// Order: reserve, open tunnel, bind, start worker.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Conflict`] if the port is held by any listener
    /// - [`RegistryError::Provision`] if the tunnel or bind fails (the
    ///   tunnel is closed again and the port released)
    pub async fn open_tcp(&self, port: u16) -> RegistryResult<Opened> {
        let reservation = self.reserve(port, Protocol::Tcp)?;
        let provision = |source: ListenerError| RegistryError::Provision {
            port,
            protocol: Protocol::Tcp,
            source,
        };

        let mut tunnel = self
            .provider
            .open(port)
            .await
            .map_err(|e| provision(e.into()))?;

        let socket = match tcp::bind(self.options.bind_host, port).await {
            Ok(socket) => socket,
            Err(e) => {
                if let Err(close_err) = tunnel.close() {
                    warn!("Failed to close tunnel for port {}: {}", port, close_err);
                }
                return Err(provision(e));
            }
        };

        let listener = Arc::new(TcpCaptureListener::spawn(
            port,
            socket,
            tunnel,
            &self.options,
            self.notify.clone(),
        ));
        let public_url = listener.public_url().to_string();
        if !reservation.commit(Slot::Tcp(listener.clone())) {
            if let Err(e) = listener.close().await {
                warn!("Failed to close cancelled TCP listener on port {}: {}", port, e);
            }
            return Err(RegistryError::Cancelled {
                port,
                protocol: Protocol::Tcp,
            });
        }

        info!("Opened TCP listener on port {} ({})", port, public_url);
        self.events().log(ProbeEvent::ListenerOpened {
            protocol: Protocol::Tcp,
            port,
            public_url: public_url.clone(),
        });

        Ok(Opened { port, public_url })
    }

    /// Open an HTTP capture listener.
    ///
    /// Order: reserve, bind and serve, open tunnel.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Conflict`] if the port is held by any listener
    /// - [`RegistryError::Provision`] if the bind or tunnel fails (the
    ///   server is stopped and the port released)
    pub async fn open_http(&self, port: u16) -> RegistryResult<Opened> {
        let reservation = self.reserve(port, Protocol::Http)?;
        let provision = |source: ListenerError| RegistryError::Provision {
            port,
            protocol: Protocol::Http,
            source,
        };

        let listener = HttpCaptureListener::bind(self.options.bind_host, port, &self.options)
            .await
            .map_err(provision)?;

        let tunnel = match self.provider.open(port).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                if let Err(close_err) = listener.close().await {
                    warn!("Failed to stop HTTP server on port {}: {}", port, close_err);
                }
                return Err(provision(e.into()));
            }
        };
        listener.attach_tunnel(tunnel);

        let public_url = listener.public_url();
        let listener = Arc::new(listener);
        if !reservation.commit(Slot::Http(listener.clone())) {
            if let Err(e) = listener.close().await {
                warn!("Failed to close cancelled HTTP listener on port {}: {}", port, e);
            }
            return Err(RegistryError::Cancelled {
                port,
                protocol: Protocol::Http,
            });
        }

        info!("Opened HTTP listener on port {} ({})", port, public_url);
        self.events().log(ProbeEvent::ListenerOpened {
            protocol: Protocol::Http,
            port,
            public_url: public_url.clone(),
        });

        Ok(Opened { port, public_url })
    }

    /// Close the TCP listener on `port`.
    ///
    /// Returns after the socket is released, so the port can be opened again
    /// straight away.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotListening`] if no live TCP listener holds the port
    /// - [`RegistryError::CloseFailed`] if the tunnel failed to close
    pub async fn close_tcp(&self, port: u16) -> RegistryResult<()> {
        let not_listening = RegistryError::NotListening {
            port,
            protocol: Protocol::Tcp,
        };

        let listener = {
            let mut slots = self.slots.lock().unwrap();
            match slots.remove(&port) {
                Some(Slot::Tcp(listener)) => listener,
                Some(other) => {
                    slots.insert(port, other);
                    return Err(not_listening);
                }
                None => return Err(not_listening),
            }
        };

        let was_live = listener.phase() != TcpPhase::Closed;
        let result = listener.close().await;

        if !was_live {
            return Err(not_listening);
        }

        self.events().log(ProbeEvent::ListenerClosed {
            protocol: Protocol::Tcp,
            port,
        });
        result.map_err(|source| RegistryError::CloseFailed {
            port,
            protocol: Protocol::Tcp,
            source,
        })
    }

    /// Close the HTTP listener on `port`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotListening`] if no HTTP listener holds the port
    /// - [`RegistryError::CloseFailed`] if the tunnel failed to close
    pub async fn close_http(&self, port: u16) -> RegistryResult<()> {
        let not_listening = RegistryError::NotListening {
            port,
            protocol: Protocol::Http,
        };

        let listener = {
            let mut slots = self.slots.lock().unwrap();
            match slots.remove(&port) {
                Some(Slot::Http(listener)) => listener,
                Some(other) => {
                    slots.insert(port, other);
                    return Err(not_listening);
                }
                None => return Err(not_listening),
            }
        };

        let result = listener.close().await;
        self.events().log(ProbeEvent::ListenerClosed {
            protocol: Protocol::Http,
            port,
        });
        result.map_err(|source| RegistryError::CloseFailed {
            port,
            protocol: Protocol::Http,
            source,
        })
    }

    /// Close every listener. Failures are logged, not returned.
    ///
    /// Opens still in progress lose their reservation and fail with
    /// [`RegistryError::Cancelled`].
    pub async fn close_all(&self) {
        let drained: Vec<(u16, Slot)> = self.slots.lock().unwrap().drain().collect();
        let count = drained.len();

        for (port, slot) in drained {
            let result = match slot {
                Slot::Reserved(..) => continue,
                Slot::Tcp(listener) => listener.close().await,
                Slot::Http(listener) => listener.close().await,
            };
            if let Err(e) = result {
                warn!("Failed to close listener on port {}: {}", port, e);
            }
        }

        info!("Closed all listeners ({} slots)", count);
    }

    /// Snapshot of live listeners (sorted by port) and background errors.
    pub fn status(&self) -> StatusReport {
        let mut listeners: Vec<ListenerStatus> = {
            let slots = self.slots.lock().unwrap();
            slots
                .iter()
                .filter(|(_, slot)| !slot.is_stale())
                .filter_map(|(port, slot)| match slot {
                    Slot::Reserved(..) => None,
                    Slot::Tcp(listener) => Some(ListenerStatus {
                        id: listener.id(),
                        protocol: Protocol::Tcp,
                        port: *port,
                        public_url: listener.public_url().to_string(),
                        connected: Some(listener.is_connected()),
                        requests: None,
                        errors: listener.errors(),
                    }),
                    Slot::Http(listener) => Some(ListenerStatus {
                        id: listener.id(),
                        protocol: Protocol::Http,
                        port: *port,
                        public_url: listener.public_url(),
                        connected: None,
                        requests: Some(listener.request_count()),
                        errors: listener.errors(),
                    }),
                })
                .collect()
        };
        listeners.sort_by_key(|status| status.port);

        StatusReport {
            listeners,
            errors: self.background.entries(),
            dropped_errors: self.background.dropped(),
        }
    }

    /// Live TCP listener on `port`.
    pub fn tcp(&self, port: u16) -> Option<Arc<TcpCaptureListener>> {
        match self.slots.lock().unwrap().get(&port) {
            Some(Slot::Tcp(listener)) if listener.phase() != TcpPhase::Closed => {
                Some(listener.clone())
            }
            _ => None,
        }
    }

    /// HTTP listener on `port`.
    pub fn http(&self, port: u16) -> Option<Arc<HttpCaptureListener>> {
        match self.slots.lock().unwrap().get(&port) {
            Some(Slot::Http(listener)) => Some(listener.clone()),
            _ => None,
        }
    }

    /// Send `data` on the TCP listener's connection.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotListening`] if there is no live TCP listener
    /// - [`RegistryError::Listener`] for no connection yet, or a write failure
    pub async fn send_tcp(&self, port: u16, data: &[u8]) -> RegistryResult<usize> {
        let not_listening = || RegistryError::NotListening {
            port,
            protocol: Protocol::Tcp,
        };

        let listener = self.tcp(port).ok_or_else(not_listening)?;
        listener.send(data).await.map_err(|e| match e {
            ListenerError::Closed(_) => not_listening(),
            other => RegistryError::Listener(other),
        })
    }

    /// Read a window of a TCP listener's log.
    pub fn read_tcp(&self, port: u16, offset: u64, limit: usize) -> RegistryResult<LogWindow> {
        self.tcp(port)
            .map(|listener| listener.read(offset, limit))
            .ok_or(RegistryError::NotListening {
                port,
                protocol: Protocol::Tcp,
            })
    }

    /// Read a window of an HTTP listener's log.
    pub fn read_http(&self, port: u16, offset: u64, limit: usize) -> RegistryResult<LogWindow> {
        self.http(port)
            .map(|listener| listener.read(offset, limit))
            .ok_or(RegistryError::NotListening {
                port,
                protocol: Protocol::Http,
            })
    }

    /// Number of ports currently claimed, reservations included.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Whether no port is claimed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: TunnelProvider> Drop for Registry<P> {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// Handle lifecycle events from listener workers.
async fn supervise(
    mut events_rx: mpsc::UnboundedReceiver<ListenerEvent>,
    slots: Arc<SlotTable>,
    background: Arc<ErrorLog>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            ListenerEvent::Connected { port, id } => {
                debug!("Listener {} on port {} connected", id, port);
            }
            ListenerEvent::Terminated {
                protocol,
                port,
                id,
                errors,
            } => {
                let removed = {
                    let mut slots = slots.lock().unwrap();
                    if slots.get(&port).and_then(Slot::id) == Some(id) {
                        slots.remove(&port)
                    } else {
                        None
                    }
                };
                for entry in errors {
                    background.push_entry(entry);
                }
                if removed.is_some() {
                    info!("Removed terminated {} listener on port {}", protocol, port);
                }
            }
        }
    }
}
