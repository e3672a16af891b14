//! Query task.
//!
//! Each submitted query runs as one tokio task that signs and publishes
//! the query, then drives its [`QueryState`] from the inbox the registry
//! routes into. A deadline armed after publish force-finishes the query.
//!
//! ```text
//! resolve auth ──► publish ──► Start ──► select! { inbox | deadline } ──► deregister
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::auth::{self, Auth};
use crate::error::{Error, Result};
use crate::protocol::{Message, QueryResult};
use crate::registry::{QueryInbox, QueryRegistry};
use crate::transport::Transport;

use super::callbacks::{Callbacks, EventSink};
use super::handle::{OutcomeSender, QueryHandle};
use super::state::{QueryEvent, QueryState};

// ============================================================================
// QueryContext
// ============================================================================

/// Client-wide collaborators a query task needs.
#[derive(Clone)]
pub(crate) struct QueryContext {
    pub(crate) auth: Option<Auth>,
    pub(crate) http: reqwest::Client,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: QueryRegistry,
    pub(crate) timeout: Duration,
}

// ============================================================================
// QueryTask
// ============================================================================

/// One in-flight query.
pub(crate) struct QueryTask {
    state: QueryState,
    query: Value,
    ctx: QueryContext,
    inbox: mpsc::UnboundedReceiver<Message>,
    sink: EventSink,
    events: mpsc::UnboundedSender<QueryEvent>,
    outcome: Option<OutcomeSender>,
}

impl QueryTask {
    /// Builds the task, its caller handle and the inbox to register.
    pub(crate) fn new(
        state: QueryState,
        query: Value,
        callbacks: Callbacks,
        ctx: QueryContext,
    ) -> (Self, QueryHandle, QueryInbox) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let handle = QueryHandle::new(state.id(), events_rx, outcome_rx);
        let task = Self {
            state,
            query,
            ctx,
            inbox: inbox_rx,
            sink: callbacks.into_sink(),
            events: events_tx,
            outcome: Some(outcome_tx),
        };
        (task, handle, inbox_tx)
    }

    /// Runs the query to completion.
    pub(crate) async fn run(mut self) {
        let id = self.state.id();

        if let Err(e) = self.publish().await {
            warn!(query_id = %id, error = %e, "Query could not be sent");
            let reason = e.to_string();
            self.settle(Err(e));
            for event in self.state.reject(reason) {
                self.emit(event);
            }
            self.ctx.registry.deregister(&id);
            return;
        }

        let deadline = sleep(self.ctx.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                message = self.inbox.recv() => {
                    let Some(message) = message else {
                        debug!(query_id = %id, "Inbox closed");
                        self.expire();
                        break;
                    };
                    for event in self.state.receive(message) {
                        self.emit(event);
                    }
                    if self.state.is_finished() {
                        break;
                    }
                }

                () = &mut deadline => {
                    self.expire();
                    break;
                }
            }
        }

        self.ctx.registry.deregister(&id);
    }

    async fn publish(&mut self) -> Result<()> {
        let outbound = auth::resolve(self.ctx.auth.as_ref(), &self.query, &self.ctx.http).await?;
        let channel = outbound.channel.path();
        let payload = outbound.into_payload(self.state.id())?;

        self.ctx.transport.publish(channel, payload).await?;
        debug!(query_id = %self.state.id(), channel, "Query published");

        let start = self.state.mark_started();
        self.emit(start);
        Ok(())
    }

    fn expire(&mut self) {
        if let Some(event) = self.state.expire() {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: QueryEvent) {
        self.sink.dispatch(&event);

        match &event {
            QueryEvent::Failed {
                message_type,
                error_type,
                data,
            } => {
                self.settle(Err(Error::server_reported(
                    *message_type,
                    error_type.clone(),
                    data.clone(),
                )));
            }
            QueryEvent::Done(results) => self.settle(Ok(results.clone())),
            _ => {}
        }

        // Handle may have been dropped; callbacks already ran.
        let _ = self.events.send(event);
    }

    /// First settlement wins.
    fn settle(&mut self, outcome: Result<Vec<QueryResult>>) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
