//! Publish/subscribe transport layer.
//!
//! This module owns the single shared connection every query is
//! multiplexed over.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌──────────────────┐
//! │  ConnectionLifecycle │  handshake / subscribe  │  Transport       │
//! │  (event loop task)   │────────────────────────►│  (Bayeux over    │
//! │                      │◄────────────────────────│   WebSocket)     │
//! │  → QueryRegistry     │     TransportEvent      │                  │
//! └──────────────────────┘                         └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::handshake` - open the session, hand over the event sink
//! 2. `TransportEvent::Handshake` - subscribe to the broadcast channel
//! 3. `TransportEvent::Connect` - report connected/broken/closed
//! 4. `TransportEvent::Message` - route to the owning query
//! 5. `Transport::disconnect` - graceful teardown
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bayeux` | Bayeux protocol over WebSocket |
//! | `lifecycle` | Connection state machine and message routing |

// ============================================================================
// Submodules
// ============================================================================

/// Bayeux protocol over WebSocket.
pub mod bayeux;

/// Connection state machine and message routing.
pub mod lifecycle;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use bayeux::BayeuxTransport;
pub use lifecycle::{ConnectionCallback, ConnectionLifecycle, ConnectionState};

// ============================================================================
// Advice
// ============================================================================

/// Server advice attached to connect results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Advice {
    /// The server saw another client for this session.
    #[serde(rename = "multiple-clients", default)]
    pub multiple_clients: bool,

    /// Reconnect policy (`retry`, `handshake` or `none`).
    #[serde(default)]
    pub reconnect: Option<String>,

    /// Milliseconds to wait before the next connect.
    #[serde(default)]
    pub interval: Option<u64>,

    /// Milliseconds the server may hold a connect.
    #[serde(default)]
    pub timeout: Option<u64>,
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Result of the handshake.
    Handshake {
        /// Whether the server accepted the handshake.
        successful: bool,
    },
    /// Result of one connect cycle.
    Connect {
        /// Whether the cycle succeeded.
        successful: bool,
        /// Server advice.
        advice: Advice,
    },
    /// A data message on a subscribed channel.
    Message {
        /// Channel the message arrived on.
        channel: String,
        /// Message payload.
        data: Value,
    },
}

/// Sink the transport reports events into.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// Publish/subscribe connection capability.
///
/// After a successful handshake the transport keeps its connect cycle
/// running on its own and reports each result as
/// [`TransportEvent::Connect`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts the session against `endpoint`, reporting into `events`.
    async fn handshake(&self, endpoint: &Url, events: TransportEventSender) -> Result<()>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Publishes a payload to a channel.
    async fn publish(&self, channel: &str, payload: Value) -> Result<()>;

    /// Ends the session.
    async fn disconnect(&self) -> Result<()>;
}
