//! Channel names used on the shared connection.

// ============================================================================
// Constants
// ============================================================================

/// Shared broadcast channel carrying every inbound job message.
pub const MESSAGING_CHANNEL: &str = "/messaging";

/// Pseudo-channel used for connection-level notifications.
pub const META_CHANNEL: &str = "/meta";

// ============================================================================
// ServiceChannel
// ============================================================================

/// Outbound service channel a query is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceChannel {
    /// Unsigned query, authorised by the transport session.
    Query,
    /// Query wrapped in a signed envelope.
    SignedQuery,
}

impl ServiceChannel {
    /// Returns the full channel path.
    #[inline]
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Query => "/service/query",
            Self::SignedQuery => "/service/signed_query",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
