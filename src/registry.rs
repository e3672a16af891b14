//! Registry of live queries.
//!
//! Maps each [`QueryId`] to the inbox of its query task. Inbound messages
//! from the shared subscription are routed here by request id.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              QueryRegistry               │
//! │  ┌────────────────────────────────────┐  │
//! │  │ QueryId A → inbox of query task A  │  │
//! │  │ QueryId B → inbox of query task B  │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! An id is registered once at submission and removed once when its query
//! finishes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::QueryId;
use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Sending half of a query task's inbox.
pub type QueryInbox = mpsc::UnboundedSender<Message>;

/// Map of query ids to inboxes.
type InboxMap = FxHashMap<QueryId, QueryInbox>;

// ============================================================================
// Routed
// ============================================================================

/// Outcome of routing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to a live query.
    Delivered(QueryId),
    /// No live query matched; carries the raw id, if any.
    Unknown(Option<String>),
}

// ============================================================================
// QueryRegistry
// ============================================================================

/// Live queries keyed by request id.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone, Default)]
pub struct QueryRegistry {
    entries: Arc<Mutex<InboxMap>>,
}

impl QueryRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateQuery`] if the id is already live.
    pub fn register(&self, id: QueryId, inbox: QueryInbox) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(Error::duplicate_query(id));
        }
        entries.insert(id, inbox);
        debug!(query_id = %id, live = entries.len(), "Query registered");
        Ok(())
    }

    /// Looks up the inbox for a live query.
    #[inline]
    #[must_use]
    pub fn lookup(&self, id: &QueryId) -> Option<QueryInbox> {
        self.entries.lock().get(id).cloned()
    }

    /// Removes a query. Returns `true` if it was live.
    pub fn deregister(&self, id: &QueryId) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.remove(id).is_some();
        if removed {
            debug!(query_id = %id, live = entries.len(), "Query deregistered");
        }
        removed
    }

    /// Routes an inbound message to its query by request id.
    ///
    /// Messages for unknown, unparseable or already-finished ids are dropped.
    pub fn route(&self, message: Message) -> Routed {
        let raw_id = message.request_id().map(str::to_string);

        let Some(id) = raw_id.as_deref().and_then(|raw| raw.parse::<QueryId>().ok()) else {
            return Routed::Unknown(raw_id);
        };

        let Some(inbox) = self.lookup(&id) else {
            return Routed::Unknown(raw_id);
        };

        if inbox.send(message).is_err() {
            // Task already gone; it deregisters itself on the way out.
            return Routed::Unknown(raw_id);
        }

        trace!(query_id = %id, "Message routed");
        Routed::Delivered(id)
    }

    /// Returns the number of live queries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no query is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every entry, closing all inboxes.
    pub fn clear(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cleared live queries");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::MessageType;

    #[test]
    fn test_register_lookup_deregister() {
        let registry = QueryRegistry::new();
        let id = QueryId::generate();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(id, tx).expect("register");
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&id).is_some());

        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(registry.is_empty());
        assert!(registry.lookup(&id).is_none());
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let registry = QueryRegistry::new();
        let id = QueryId::generate();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(id, tx.clone()).expect("register");
        let err = registry.register(id, tx).expect_err("duplicate");
        assert!(matches!(err, Error::DuplicateQuery { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_route_delivers_in_order() {
        let registry = QueryRegistry::new();
        let id = QueryId::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(id, tx).expect("register");

        let first = Message::new(MessageType::Spawn, id.to_string());
        let second = Message::new(MessageType::Stop, id.to_string());
        assert_eq!(registry.route(first), Routed::Delivered(id));
        assert_eq!(registry.route(second), Routed::Delivered(id));

        assert_eq!(rx.try_recv().expect("first").message_type, MessageType::Spawn);
        assert_eq!(rx.try_recv().expect("second").message_type, MessageType::Stop);
    }

    #[test]
    fn test_route_unknown_id() {
        let registry = QueryRegistry::new();
        let stray = QueryId::generate().to_string();

        let routed = registry.route(Message::new(MessageType::Stop, stray.clone()));
        assert_eq!(routed, Routed::Unknown(Some(stray)));
    }

    #[test]
    fn test_route_unparseable_and_missing_id() {
        let registry = QueryRegistry::new();

        let routed = registry.route(Message::new(MessageType::Stop, "12345.6"));
        assert_eq!(routed, Routed::Unknown(Some("12345.6".into())));

        let mut anonymous = Message::new(MessageType::Stop, "");
        anonymous.request_id = None;
        assert_eq!(registry.route(anonymous), Routed::Unknown(None));
    }

    #[test]
    fn test_route_to_closed_inbox() {
        let registry = QueryRegistry::new();
        let id = QueryId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(id, tx).expect("register");
        drop(rx);

        let routed = registry.route(Message::new(MessageType::Stop, id.to_string()));
        assert!(matches!(routed, Routed::Unknown(_)));
    }

    #[test]
    fn test_clear() {
        let registry = QueryRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        registry.register(QueryId::generate(), tx).expect("register");

        registry.clear();
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
