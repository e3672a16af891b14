//! Caller callbacks for a query.
//!
//! Callers attach callbacks in one of three shapes, all normalised once at
//! submission into an [`EventSink`]:
//!
//! | Shape | Meaning |
//! |-------|---------|
//! | [`Callbacks::Done`] | one completion callback |
//! | [`Callbacks::DoneAll`] | several completion callbacks, run in order |
//! | [`Callbacks::Hooks`] | named hooks for `message`, `start`, `data`, `done`, `fail`, `progress` |
//!
//! # Example
//!
//! ```ignore
//! use importio_client::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_progress(|p| println!("{}%", p.percent))
//!     .on_done(|rows| println!("{} rows", rows.len()));
//! let handle = client.query(query, hooks)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value;

use crate::protocol::{Message, QueryResult};

use super::state::{Progress, QueryEvent};

// ============================================================================
// Types
// ============================================================================

/// Completion callback; receives every result in order.
pub type DoneCallback = Box<dyn Fn(&[QueryResult]) + Send + Sync>;

/// `errorType` passed to `fail` hooks when the query never reached the server.
pub const CLIENT_ERROR: &str = "CLIENT_ERROR";

type MessageHook = Box<dyn Fn(&Message) + Send + Sync>;
type StartHook = Box<dyn Fn() + Send + Sync>;
type DataHook = Box<dyn Fn(&[QueryResult]) + Send + Sync>;
type FailHook = Box<dyn Fn(&str, &Value) + Send + Sync>;
type ProgressHook = Box<dyn Fn(Progress) + Send + Sync>;

// ============================================================================
// Hooks
// ============================================================================

/// Named per-event hooks.
#[derive(Default)]
pub struct Hooks {
    message: Vec<MessageHook>,
    start: Vec<StartHook>,
    data: Vec<DataHook>,
    done: Vec<DoneCallback>,
    fail: Vec<FailHook>,
    progress: Vec<ProgressHook>,
}

impl Hooks {
    /// Creates an empty hook set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every raw message.
    #[must_use]
    pub fn on_message(mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.message.push(Box::new(f));
        self
    }

    /// Called once the query is published.
    #[must_use]
    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.start.push(Box::new(f));
        self
    }

    /// Called for every batch of results.
    #[must_use]
    pub fn on_data(mut self, f: impl Fn(&[QueryResult]) + Send + Sync + 'static) -> Self {
        self.data.push(Box::new(f));
        self
    }

    /// Called when the query finishes.
    #[must_use]
    pub fn on_done(mut self, f: impl Fn(&[QueryResult]) + Send + Sync + 'static) -> Self {
        self.done.push(Box::new(f));
        self
    }

    /// Called with `(errorType, data)` when the query is rejected.
    ///
    /// Local signing or publish failures arrive as
    /// `(`[`CLIENT_ERROR`]`, reason)`.
    #[must_use]
    pub fn on_fail(mut self, f: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.fail.push(Box::new(f));
        self
    }

    /// Called on every progress change.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress.push(Box::new(f));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("message", &self.message.len())
            .field("start", &self.start.len())
            .field("data", &self.data.len())
            .field("done", &self.done.len())
            .field("fail", &self.fail.len())
            .field("progress", &self.progress.len())
            .finish()
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Callbacks supplied with a query.
#[derive(Default)]
pub enum Callbacks {
    /// No callbacks; use the returned handle.
    #[default]
    None,
    /// A single completion callback.
    Done(DoneCallback),
    /// Several completion callbacks.
    DoneAll(Vec<DoneCallback>),
    /// Named hooks.
    Hooks(Hooks),
}

impl Callbacks {
    /// Wraps a single completion callback.
    #[must_use]
    pub fn done(f: impl Fn(&[QueryResult]) + Send + Sync + 'static) -> Self {
        Self::Done(Box::new(f))
    }

    /// Normalises into an event sink.
    #[must_use]
    pub(crate) fn into_sink(self) -> EventSink {
        let hooks = match self {
            Self::None => Hooks::default(),
            Self::Done(f) => Hooks {
                done: vec![f],
                ..Hooks::default()
            },
            Self::DoneAll(fs) => Hooks {
                done: fs,
                ..Hooks::default()
            },
            Self::Hooks(hooks) => hooks,
        };
        EventSink { hooks }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Done(_) => f.write_str("Done(..)"),
            Self::DoneAll(fs) => write!(f, "DoneAll({})", fs.len()),
            Self::Hooks(hooks) => f.debug_tuple("Hooks").field(hooks).finish(),
        }
    }
}

impl From<()> for Callbacks {
    #[inline]
    fn from((): ()) -> Self {
        Self::None
    }
}

impl From<Hooks> for Callbacks {
    #[inline]
    fn from(hooks: Hooks) -> Self {
        Self::Hooks(hooks)
    }
}

impl From<DoneCallback> for Callbacks {
    #[inline]
    fn from(f: DoneCallback) -> Self {
        Self::Done(f)
    }
}

impl From<Vec<DoneCallback>> for Callbacks {
    #[inline]
    fn from(fs: Vec<DoneCallback>) -> Self {
        Self::DoneAll(fs)
    }
}

// ============================================================================
// EventSink
// ============================================================================

/// Uniform dispatcher for query events.
pub(crate) struct EventSink {
    hooks: Hooks,
}

impl EventSink {
    /// Invokes every hook registered for `event`.
    pub(crate) fn dispatch(&self, event: &QueryEvent) {
        let hooks = &self.hooks;
        match event {
            QueryEvent::Start => hooks.start.iter().for_each(|f| f()),
            QueryEvent::Message(message) => hooks.message.iter().for_each(|f| f(message)),
            QueryEvent::Data(batch) => hooks.data.iter().for_each(|f| f(batch)),
            QueryEvent::Progress(progress) => hooks.progress.iter().for_each(|f| f(*progress)),
            QueryEvent::Failed { error_type, data, .. } => {
                hooks.fail.iter().for_each(|f| f(error_type, data));
            }
            QueryEvent::Rejected { reason } => {
                let data = Value::String(reason.clone());
                hooks.fail.iter().for_each(|f| f(CLIENT_ERROR, &data));
            }
            QueryEvent::Done(results) => hooks.done.iter().for_each(|f| f(results)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
