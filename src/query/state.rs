//! Per-query state machine.
//!
//! [`QueryState`] turns the ordered message stream of one query into
//! caller-visible [`QueryEvent`]s. It performs no I/O; the query task owns
//! one and drives it from its inbox and deadline.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──► Started ──first message──► Running ──► Finished
//!                                                  │
//!                                                  └──UNAUTH/ERROR──► Errored
//! ```
//!
//! # Page accounting
//!
//! | Type | Effect |
//! |------|--------|
//! | `INIT` | next `STOP` is the warm-up signal and is not counted |
//! | `START` | `pages.started += 1` |
//! | `SPAWN` | `pages.queued += 1`, progress |
//! | `STOP` | `pages.completed += 1`, progress, finished when `queued == completed` |
//! | `MESSAGE` | results appended, data |
//! | `UNAUTH`/`ERROR` | fail, finished |
//!
//! A query that could not be sent is finished through [`QueryState::reject`].

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::{debug, trace};

use crate::identifiers::QueryId;
use crate::protocol::{Message, MessageType, QueryResult};

// ============================================================================
// Pages
// ============================================================================

/// Page counters of a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pages {
    /// Pages queued.
    pub queued: u64,
    /// Pages started.
    pub started: u64,
    /// Pages completed.
    pub completed: u64,
}

impl Pages {
    /// Completion percentage, rounded half-up; `0` when nothing is queued.
    #[inline]
    #[must_use]
    pub fn percent(&self) -> u64 {
        if self.queued == 0 {
            return 0;
        }
        (200 * self.completed + self.queued) / (2 * self.queued)
    }

    /// Snapshot as a [`Progress`] report.
    #[inline]
    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            percent: self.percent(),
            completed: self.completed,
            queued: self.queued,
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Progress report emitted on `SPAWN` and counted `STOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// `round(100 * completed / queued)`.
    pub percent: u64,
    /// Pages completed.
    pub completed: u64,
    /// Pages queued.
    pub queued: u64,
}

// ============================================================================
// QueryPhase
// ============================================================================

/// Where a query is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// Built but not yet published.
    Created,
    /// Published, no message seen yet.
    Started,
    /// At least one message processed.
    Running,
    /// Completed naturally or by deadline.
    Finished,
    /// Completed after a server-reported error.
    Errored,
}

impl QueryPhase {
    /// Returns `true` for `Finished` and `Errored`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

// ============================================================================
// QueryEvent
// ============================================================================

/// An event observable on a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// The query was published.
    Start,
    /// Any message received, emitted after its type-specific events.
    Message(Message),
    /// A batch of tagged results.
    Data(Vec<QueryResult>),
    /// Page progress changed.
    Progress(Progress),
    /// The server rejected the query.
    Failed {
        /// `UNAUTH` or `ERROR`.
        message_type: MessageType,
        /// Server error classification.
        error_type: String,
        /// Server error details.
        data: Value,
    },
    /// The query could not be sent.
    Rejected {
        /// Why signing or publishing failed.
        reason: String,
    },
    /// The query finished; carries every accumulated result in order.
    Done(Vec<QueryResult>),
}

// ============================================================================
// QueryState
// ============================================================================

/// State of one query.
#[derive(Debug, Clone)]
pub struct QueryState {
    id: QueryId,
    phase: QueryPhase,
    initialising: bool,
    failed: bool,
    message_count: u64,
    results: Vec<QueryResult>,
    pages: Pages,
}

impl QueryState {
    /// Creates state for a new query.
    #[must_use]
    pub fn new(id: QueryId) -> Self {
        Self {
            id,
            phase: QueryPhase::Created,
            initialising: false,
            failed: false,
            message_count: 0,
            results: Vec::new(),
            pages: Pages::default(),
        }
    }

    /// Returns the query id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Returns the current phase.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    /// Returns `true` once the query reached a terminal phase.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Returns the page counters.
    #[inline]
    #[must_use]
    pub fn pages(&self) -> Pages {
        self.pages
    }

    /// Returns the number of `MESSAGE` batches received.
    #[inline]
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Returns the results accumulated so far.
    #[inline]
    #[must_use]
    pub fn results(&self) -> &[QueryResult] {
        &self.results
    }

    /// Marks the query as published.
    pub fn mark_started(&mut self) -> QueryEvent {
        if self.phase == QueryPhase::Created {
            self.phase = QueryPhase::Started;
        }
        QueryEvent::Start
    }

    /// Processes one inbound message.
    ///
    /// Returns the events it produced, in emission order. Messages after
    /// the query finished produce nothing.
    pub fn receive(&mut self, message: Message) -> Vec<QueryEvent> {
        if self.is_finished() {
            trace!(query_id = %self.id, "Message after finish ignored");
            return Vec::new();
        }
        self.phase = QueryPhase::Running;

        let mut events = Vec::with_capacity(3);
        let mut finished = false;

        match message.message_type {
            MessageType::Init => {
                self.initialising = true;
            }
            MessageType::Start => {
                self.pages.started += 1;
            }
            MessageType::Spawn => {
                self.pages.queued += 1;
                events.push(QueryEvent::Progress(self.pages.progress()));
            }
            MessageType::Stop => {
                if self.initialising {
                    self.initialising = false;
                    debug!(query_id = %self.id, "Warm-up STOP consumed");
                } else {
                    self.pages.completed += 1;
                    events.push(QueryEvent::Progress(self.pages.progress()));
                    finished = self.pages.queued == self.pages.completed;
                }
            }
            MessageType::Message => {
                self.message_count += 1;
                let batch = message.tagged_results();
                self.results.extend(batch.iter().cloned());
                events.push(QueryEvent::Data(batch));
            }
            MessageType::Unauth | MessageType::Error => {
                self.failed = true;
                events.push(QueryEvent::Failed {
                    message_type: message.message_type,
                    error_type: message.error_type().to_string(),
                    data: message.error_data(),
                });
                finished = true;
            }
            MessageType::Unknown => {}
        }

        events.push(QueryEvent::Message(message));

        if finished {
            events.push(self.finish());
        }
        events
    }

    /// Fails a query that never reached the server.
    ///
    /// Returns the rejection followed by the final `Done`, or nothing if
    /// the query already finished.
    pub fn reject(&mut self, reason: impl Into<String>) -> Vec<QueryEvent> {
        if self.is_finished() {
            return Vec::new();
        }
        self.failed = true;
        vec![
            QueryEvent::Rejected {
                reason: reason.into(),
            },
            self.finish(),
        ]
    }

    /// Force-finishes with the results accumulated so far.
    ///
    /// Returns `None` if the query already finished.
    pub fn expire(&mut self) -> Option<QueryEvent> {
        if self.is_finished() {
            return None;
        }
        debug!(query_id = %self.id, results = self.results.len(), "Query deadline reached");
        Some(self.finish())
    }

    fn finish(&mut self) -> QueryEvent {
        self.phase = if self.failed {
            QueryPhase::Errored
        } else {
            QueryPhase::Finished
        };
        debug!(
            query_id = %self.id,
            phase = ?self.phase,
            queued = self.pages.queued,
            completed = self.pages.completed,
            "Query finished"
        );
        QueryEvent::Done(self.results.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn state() -> QueryState {
        let mut state = QueryState::new(QueryId::generate());
        state.mark_started();
        state
    }

    fn message(state: &QueryState, message_type: MessageType) -> Message {
        Message::new(message_type, state.id().to_string())
    }

    fn feed(state: &mut QueryState, message_type: MessageType) -> Vec<QueryEvent> {
        let message = message(state, message_type);
        state.receive(message)
    }

    #[test]
    fn test_phases() {
        let mut state = QueryState::new(QueryId::generate());
        assert_eq!(state.phase(), QueryPhase::Created);
        assert_eq!(state.mark_started(), QueryEvent::Start);
        assert_eq!(state.phase(), QueryPhase::Started);
        feed(&mut state, MessageType::Start);
        assert_eq!(state.phase(), QueryPhase::Running);
    }

    #[test]
    fn test_spawn_then_stop_finishes() {
        let mut state = state();

        let events = feed(&mut state, MessageType::Spawn);
        assert_eq!(
            events[0],
            QueryEvent::Progress(Progress {
                percent: 0,
                completed: 0,
                queued: 1
            })
        );
        assert!(!state.is_finished());

        let events = feed(&mut state, MessageType::Stop);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            QueryEvent::Progress(Progress {
                percent: 100,
                completed: 1,
                queued: 1
            })
        );
        assert!(matches!(events[1], QueryEvent::Message(_)));
        assert_eq!(events[2], QueryEvent::Done(Vec::new()));
        assert_eq!(state.phase(), QueryPhase::Finished);
    }

    #[test]
    fn test_init_stop_is_not_counted() {
        let mut state = state();
        feed(&mut state, MessageType::Init);
        let events = feed(&mut state, MessageType::Stop);

        assert_eq!(state.pages().completed, 0);
        assert!(!state.is_finished());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], QueryEvent::Message(_)));
    }

    #[test]
    fn test_warm_up_then_real_pages() {
        let mut state = state();
        feed(&mut state, MessageType::Init);
        feed(&mut state, MessageType::Spawn);
        feed(&mut state, MessageType::Start);
        feed(&mut state, MessageType::Stop);
        assert!(!state.is_finished());

        feed(&mut state, MessageType::Stop);
        assert!(state.is_finished());
        assert_eq!(
            state.pages(),
            Pages {
                queued: 1,
                started: 1,
                completed: 1
            }
        );
    }

    #[test]
    fn test_message_appends_tagged_results() {
        let mut state = state();
        let mut msg = message(&state, MessageType::Message);
        msg.connector_guid = Some("conn".into());
        msg.connector_version_guid = Some("ver".into());
        msg.data.results = Some(vec![json!({"r": 1}), json!({"r": 2})]);

        let events = state.receive(msg);
        let QueryEvent::Data(batch) = &events[0] else {
            panic!("expected data event");
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].data, json!({"r": 1}));
        assert_eq!(batch[1].data, json!({"r": 2}));
        assert!(batch.iter().all(|r| r.connector_guid.as_deref() == Some("conn")));
        assert!(batch.iter().all(|r| r.connector_version_guid.as_deref() == Some("ver")));

        assert_eq!(state.results(), batch.as_slice());
        assert_eq!(state.message_count(), 1);
    }

    #[test]
    fn test_results_accumulate_across_batches() {
        let mut state = state();
        for n in 0..3 {
            let mut msg = message(&state, MessageType::Message);
            msg.data.results = Some(vec![json!(n)]);
            state.receive(msg);
        }
        let rows: Vec<_> = state.results().iter().map(|r| r.data.clone()).collect();
        assert_eq!(rows, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn test_error_fails_then_finishes() {
        let mut state = state();
        let mut msg = message(&state, MessageType::Unauth);
        msg.data.error_type = Some("UnauthorizedException".into());
        msg.data.data = Some(json!("expired"));

        let events = state.receive(msg);
        assert_eq!(
            events[0],
            QueryEvent::Failed {
                message_type: MessageType::Unauth,
                error_type: "UnauthorizedException".into(),
                data: json!("expired"),
            }
        );
        assert!(matches!(events[1], QueryEvent::Message(_)));
        assert_eq!(events[2], QueryEvent::Done(Vec::new()));
        assert_eq!(state.phase(), QueryPhase::Errored);
    }

    #[test]
    fn test_reject_before_start() {
        let mut state = QueryState::new(QueryId::generate());
        let events = state.reject("Connection closed");
        assert_eq!(
            events,
            vec![
                QueryEvent::Rejected {
                    reason: "Connection closed".into(),
                },
                QueryEvent::Done(Vec::new()),
            ]
        );
        assert_eq!(state.phase(), QueryPhase::Errored);
        assert!(state.reject("again").is_empty());
    }

    #[test]
    fn test_unknown_type_only_emits_message() {
        let mut state = state();
        let events = feed(&mut state, MessageType::Unknown);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], QueryEvent::Message(_)));
    }

    #[test]
    fn test_messages_after_finish_ignored() {
        let mut state = state();
        feed(&mut state, MessageType::Error);
        assert!(feed(&mut state, MessageType::Spawn).is_empty());
        assert_eq!(state.pages().queued, 0);
    }

    #[test]
    fn test_expire_returns_partial_results_once() {
        let mut state = state();
        let mut msg = message(&state, MessageType::Message);
        msg.data.results = Some(vec![json!("partial")]);
        state.receive(msg);

        let QueryEvent::Done(results) = state.expire().expect("first expiry") else {
            panic!("expected done");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(state.phase(), QueryPhase::Finished);
        assert!(state.expire().is_none());
    }

    #[test]
    fn test_percent_rounding() {
        let pages = |completed, queued| Pages {
            queued,
            started: 0,
            completed,
        };
        assert_eq!(pages(0, 0).percent(), 0);
        assert_eq!(pages(5, 0).percent(), 0);
        assert_eq!(pages(1, 3).percent(), 33);
        assert_eq!(pages(2, 3).percent(), 67);
        assert_eq!(pages(1, 8).percent(), 13); // 12.5 rounds up
        assert_eq!(pages(3, 3).percent(), 100);
    }

    // Valid sequences never stop more pages than they queued.
    fn valid_sequence() -> impl Strategy<Value = Vec<MessageType>> {
        prop::collection::vec(any::<bool>(), 1..64).prop_map(|choices| {
            let (mut queued, mut completed) = (0u32, 0u32);
            let mut sequence = vec![MessageType::Init, MessageType::Stop];
            for spawn in choices {
                if spawn || completed == queued {
                    queued += 1;
                    sequence.push(MessageType::Spawn);
                    sequence.push(MessageType::Start);
                } else {
                    completed += 1;
                    sequence.push(MessageType::Stop);
                }
            }
            sequence
        })
    }

    proptest! {
        #[test]
        fn prop_completed_never_exceeds_queued(sequence in valid_sequence()) {
            let mut state = state();
            for message_type in sequence {
                feed(&mut state, message_type);
                let pages = state.pages();
                prop_assert!(pages.completed <= pages.queued);
                prop_assert!(pages.percent() <= 100);
                if state.is_finished() {
                    prop_assert_eq!(pages.completed, pages.queued);
                    break;
                }
            }
        }
    }
}
