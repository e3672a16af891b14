//! Query execution.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `state` | Pure per-query state machine |
//! | `callbacks` | Caller callback shapes |
//! | `handle` | Caller-side handle |
//! | `task` | Tokio task driving one query |

// ============================================================================
// Submodules
// ============================================================================

pub mod callbacks;
pub mod handle;
pub mod state;

pub(crate) mod task;

// ============================================================================
// Re-exports
// ============================================================================

pub use callbacks::{CLIENT_ERROR, Callbacks, DoneCallback, Hooks};
pub use handle::QueryHandle;
pub use state::{Pages, Progress, QueryEvent, QueryPhase, QueryState};
