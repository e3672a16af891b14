//! Publish/subscribe message types.
//!
//! This module defines the payloads exchanged over the shared connection
//! and the notifications reported to the connection callback.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Channel |
//! |---------|-----------|---------|
//! | raw query + `requestId` | Client → Server | `/service/query` |
//! | [`SignedEnvelope`](crate::auth::SignedEnvelope) + `requestId` | Client → Server | `/service/signed_query` |
//! | [`Message`] | Server → Client | `/messaging` (shared broadcast) |
//! | [`MetaMessage`] | Client → connection callback | `/meta` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Channel names |
//! | `message` | Inbound job messages and tagged results |
//! | `meta` | Connection-level notifications |

// ============================================================================
// Submodules
// ============================================================================

/// Channel names.
pub mod channel;

/// Inbound job messages.
pub mod message;

/// Connection-level notifications.
pub mod meta;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{MESSAGING_CHANNEL, META_CHANNEL, ServiceChannel};
pub use message::{Message, MessageData, MessageType, QueryResult};
pub use meta::{CloseReason, MetaEvent, MetaMessage};
