//! Connection lifecycle state machine.
//!
//! Owns the single shared transport session: starts the handshake, reacts to
//! handshake and connect results, subscribes to the broadcast channel and
//! routes inbound messages to the [`QueryRegistry`].
//!
//! # States
//!
//! ```text
//! NotStarted ──start──► Handshaking ──connect ok──► Connected ◄──► Broken
//!                            │                          │
//!                            └──────── connect failed ──┴──────► Closed
//! ```
//!
//! Every transition is reported to the connection callback as a
//! [`MetaMessage`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Result;
use crate::protocol::{CloseReason, MESSAGING_CHANNEL, Message, MetaEvent, MetaMessage};
use crate::registry::{QueryRegistry, Routed};

use super::{Advice, Transport, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Receives every connection-level notification.
pub type ConnectionCallback = Arc<dyn Fn(&MetaMessage) + Send + Sync>;

/// Runs once when the connection is both connected and subscribed.
pub(crate) type ReadyCallback = Box<dyn FnOnce() + Send>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable state of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `start` not called yet.
    NotStarted,
    /// Handshake issued, no connect result yet.
    Handshaking,
    /// Connected.
    Connected,
    /// A connect cycle reported while already connected.
    Broken,
    /// Closed by the server or by disconnect.
    Closed,
}

// ============================================================================
// ConnectFlags
// ============================================================================

/// Flags that decide which notification a connect result produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    /// Result of the latest connect cycle.
    pub connected: bool,
    /// Result of the cycle before it.
    pub was_connected: bool,
    /// A disconnect was requested.
    pub disconnecting: bool,
}

impl ConnectFlags {
    /// Applies one connect result and returns the notification to emit.
    ///
    /// | was | now | disconnecting | event |
    /// |-----|-----|---------------|-------|
    /// | any | any | yes | `CONNECTION_CLOSED{UNKNOWN}` |
    /// | no | yes | no | `CONNECTED` |
    /// | yes | yes | no | `CONNECTION_BROKEN` |
    /// | any | no | no | `CONNECTION_CLOSED{advice}` |
    pub fn on_connect(&mut self, successful: bool, advice: &Advice) -> MetaEvent {
        if self.disconnecting {
            self.connected = false;
            return MetaEvent::Closed {
                reason: CloseReason::Unknown,
            };
        }

        self.was_connected = self.connected;
        self.connected = successful;

        match (self.was_connected, self.connected) {
            (false, true) => MetaEvent::Connected,
            (true, true) => MetaEvent::Broken,
            (_, false) => MetaEvent::Closed {
                reason: CloseReason::from_multiple_clients(advice.multiple_clients),
            },
        }
    }
}

// ============================================================================
// ConnectionLifecycle
// ============================================================================

struct Status {
    state: ConnectionState,
    flags: ConnectFlags,
    subscribed: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    endpoint: Url,
    registry: QueryRegistry,
    notifier: ConnectionCallback,
    started: AtomicBool,
    status: Mutex<Status>,
    on_ready: Mutex<Option<ReadyCallback>>,
}

/// Drives the shared connection.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    inner: Arc<Inner>,
}

impl ConnectionLifecycle {
    /// Creates an idle lifecycle.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: Url,
        registry: QueryRegistry,
        notifier: ConnectionCallback,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                endpoint,
                registry,
                notifier,
                started: AtomicBool::new(false),
                status: Mutex::new(Status {
                    state: ConnectionState::NotStarted,
                    flags: ConnectFlags::default(),
                    subscribed: false,
                }),
                on_ready: Mutex::new(None),
            }),
        }
    }

    /// Starts the handshake. Only the first call has any effect.
    ///
    /// `on_ready` runs once the connection is connected and subscribed.
    /// Returns `true` if this call started the session.
    pub(crate) fn start(&self, on_ready: ReadyCallback) -> bool {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        *self.inner.on_ready.lock() = Some(on_ready);
        self.inner.status.lock().state = ConnectionState::Handshaking;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            info!(endpoint = %inner.endpoint, "Starting connection");
            if let Err(e) = inner.transport.handshake(&inner.endpoint, tx).await {
                warn!(error = %e, "Handshake failed");
                return;
            }
            inner.run(rx).await;
        });
        true
    }

    /// Requests a graceful disconnect.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the disconnect could not be sent.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.status.lock().flags.disconnecting = true;
        debug!("Disconnect requested");
        self.inner.transport.disconnect().await
    }

    /// Returns `true` once `start` was called.
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status.lock().state
    }

    /// Returns `true` when connected and subscribed.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let status = self.inner.status.lock();
        status.flags.connected && status.subscribed
    }
}

impl fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.status.lock();
        f.debug_struct("ConnectionLifecycle")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("state", &status.state)
            .field("flags", &status.flags)
            .field("subscribed", &status.subscribed)
            .finish()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl Inner {
    async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("Transport event stream ended");
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Handshake { successful: false } => {
                warn!("Handshake rejected by server");
            }

            TransportEvent::Handshake { successful: true } => {
                if let Err(e) = self.transport.subscribe(MESSAGING_CHANNEL).await {
                    warn!(channel = MESSAGING_CHANNEL, error = %e, "Subscribe failed");
                    return;
                }
                self.status.lock().subscribed = true;
                self.notify(MetaEvent::Subscribed);
                self.release_if_ready();
            }

            TransportEvent::Connect { successful, advice } => {
                let event = {
                    let mut status = self.status.lock();
                    let event = status.flags.on_connect(successful, &advice);
                    status.state = match event {
                        MetaEvent::Connected => ConnectionState::Connected,
                        MetaEvent::Broken => ConnectionState::Broken,
                        _ => ConnectionState::Closed,
                    };
                    event
                };
                self.notify(event);
                self.release_if_ready();
            }

            TransportEvent::Message { channel, data } => {
                if channel != MESSAGING_CHANNEL {
                    trace!(%channel, "Message on unrouted channel");
                    return;
                }
                let message: Message = match serde_json::from_value(data) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Unparseable broadcast message dropped");
                        return;
                    }
                };
                if let Routed::Unknown(id) = self.registry.route(message) {
                    debug!(request_id = ?id, "No live query for message");
                    self.notify(MetaEvent::NoQuery { id });
                }
            }
        }
    }

    fn release_if_ready(&self) {
        {
            let status = self.status.lock();
            if !(status.flags.connected && status.subscribed) {
                return;
            }
        }
        let on_ready = self.on_ready.lock().take();
        if let Some(on_ready) = on_ready {
            info!("Connection ready");
            on_ready();
        }
    }

    fn notify(&self, event: MetaEvent) {
        let message = MetaMessage::new(event);
        trace!(event = ?message.data, "Connection notification");
        (self.notifier)(&message);
    }
}

// ============================================================================
// Tests
// ============================================================================
