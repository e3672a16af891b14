//! Caller-side handle to a submitted query.

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::identifiers::QueryId;
use crate::protocol::QueryResult;

use super::state::QueryEvent;

/// Outcome channel settled once per query.
pub(crate) type OutcomeSender = oneshot::Sender<Result<Vec<QueryResult>>>;

/// Handle returned by `Client::query`.
///
/// The handle is both an event stream (`next_event`) and a future-like
/// completion (`wait`). Dropping it does not cancel the query; callbacks
/// still fire until it finishes.
#[derive(Debug)]
pub struct QueryHandle {
    id: QueryId,
    events: mpsc::UnboundedReceiver<QueryEvent>,
    outcome: oneshot::Receiver<Result<Vec<QueryResult>>>,
}

impl QueryHandle {
    pub(crate) fn new(
        id: QueryId,
        events: mpsc::UnboundedReceiver<QueryEvent>,
        outcome: oneshot::Receiver<Result<Vec<QueryResult>>>,
    ) -> Self {
        Self {
            id,
            events,
            outcome,
        }
    }

    /// Returns the query id sent as `requestId`.
    #[inline]
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Receives the next event. Returns `None` once the query finished and
    /// every event was consumed.
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// Returns an already-queued event without waiting.
    pub fn try_next_event(&mut self) -> Option<QueryEvent> {
        self.events.try_recv().ok()
    }

    /// Waits for the query to settle.
    ///
    /// Resolves with every accumulated result once the query finishes
    /// (naturally or at its deadline).
    ///
    /// # Errors
    ///
    /// - [`Error::ServerReported`](crate::Error::ServerReported) if the
    ///   server sent `UNAUTH` or `ERROR`
    /// - the signing or publish error if the query could not be sent
    /// - [`Error::ChannelClosed`](crate::Error::ChannelClosed) if the query
    ///   task was torn down before settling
    pub async fn wait(self) -> Result<Vec<QueryResult>> {
        self.outcome.await?
    }
}
