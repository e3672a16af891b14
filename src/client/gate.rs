//! Initialisation gate.
//!
//! Queues work submitted before the shared connection is ready and releases
//! it, in submission order, once the connection is both connected and
//! subscribed. The first call starts the connection; later calls never
//! start it again.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::transport::ConnectionLifecycle;

// ============================================================================
// Types
// ============================================================================

/// Deferred work run once the connection is ready.
pub(crate) type PendingStart = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct GateState {
    ready: bool,
    queue: VecDeque<PendingStart>,
}

struct GateInner {
    lifecycle: ConnectionLifecycle,
    state: Mutex<GateState>,
    released: Notify,
}

// ============================================================================
// InitializationGate
// ============================================================================

/// Runs deferred work once the connection is ready.
#[derive(Clone)]
pub struct InitializationGate {
    inner: Arc<GateInner>,
}

impl InitializationGate {
    pub(crate) fn new(lifecycle: ConnectionLifecycle) -> Self {
        Self {
            inner: Arc::new(GateInner {
                lifecycle,
                state: Mutex::new(GateState::default()),
                released: Notify::new(),
            }),
        }
    }

    /// Runs `work` now if the connection is ready, otherwise queues it and
    /// makes sure the connection is starting.
    pub(crate) fn ensure_ready(&self, work: Option<PendingStart>) {
        let work = {
            let mut state = self.inner.state.lock();
            if state.ready {
                work
            } else {
                if let Some(work) = work {
                    state.queue.push_back(work);
                }
                None
            }
        };

        match work {
            Some(work) => work(),
            None => self.start(),
        }
    }

    fn start(&self) {
        if self.is_ready() {
            return;
        }
        let gate: Weak<GateInner> = Arc::downgrade(&self.inner);
        let started = self.inner.lifecycle.start(Box::new(move || {
            if let Some(gate) = gate.upgrade() {
                gate.release();
            }
        }));
        if started {
            debug!("Connection start triggered");
        }
    }

    /// Returns `true` once queued work was released.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// Returns the amount of queued work.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Waits until the gate is released.
    pub async fn wait_ready(&self) {
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.is_ready() {
                return;
            }
            released.await;
        }
    }
}

impl fmt::Debug for InitializationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("InitializationGate")
            .field("ready", &state.ready)
            .field("pending", &state.queue.len())
            .finish()
    }
}

impl GateInner {
    /// Drains the queue exactly once.
    fn release(&self) {
        let queue = {
            let mut state = self.state.lock();
            if state.ready {
                return;
            }
            state.ready = true;
            std::mem::take(&mut state.queue)
        };

        info!(pending = queue.len(), "Connection ready, releasing queued queries");
        for work in queue {
            work();
        }
        self.released.notify_waiters();
    }
}

// ============================================================================
// Tests
// ============================================================================
