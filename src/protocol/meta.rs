//! Connection-level notifications.
//!
//! Every lifecycle transition and every unroutable message is reported to
//! the configured connection callback as a [`MetaMessage`].
//!
//! # Format
//!
//! ```json
//! { "channel": "/meta", "data": { "type": "CONNECTION_CLOSED", "reason": "MULTIPLE_CLIENTS" } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use super::channel::META_CHANNEL;

// ============================================================================
// MetaEvent
// ============================================================================

/// A connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetaEvent {
    /// Connection established for the first time (or after a close).
    Connected,

    /// A connect cycle succeeded while already connected.
    #[serde(rename = "CONNECTION_BROKEN")]
    Broken,

    /// Connection closed.
    #[serde(rename = "CONNECTION_CLOSED")]
    Closed {
        /// Why the connection closed.
        reason: CloseReason,
    },

    /// Subscribed to the shared broadcast channel.
    Subscribed,

    /// A message arrived for a request id with no live query.
    NoQuery {
        /// The request id carried by the message, if any.
        id: Option<String>,
    },
}

// ============================================================================
// CloseReason
// ============================================================================

/// Reason attached to [`MetaEvent::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// No specific reason known.
    Unknown,
    /// The server saw another client on the same session.
    MultipleClients,
}

impl CloseReason {
    /// Maps the transport's multiple-clients advice to a reason.
    #[inline]
    #[must_use]
    pub const fn from_multiple_clients(multiple_clients: bool) -> Self {
        if multiple_clients {
            Self::MultipleClients
        } else {
            Self::Unknown
        }
    }
}

// ============================================================================
// MetaMessage
// ============================================================================

/// Envelope delivered to the connection callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaMessage {
    /// Always `/meta`.
    pub channel: &'static str,
    /// The notification.
    pub data: MetaEvent,
}

impl MetaMessage {
    /// Wraps an event for the `/meta` channel.
    #[inline]
    #[must_use]
    pub const fn new(data: MetaEvent) -> Self {
        Self {
            channel: META_CHANNEL,
            data,
        }
    }
}

impl From<MetaEvent> for MetaMessage {
    #[inline]
    fn from(event: MetaEvent) -> Self {
        Self::new(event)
    }
}

// ============================================================================
// Tests
// ============================================================================
