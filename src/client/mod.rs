//! Client context.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Context object owning connection, gate and registry |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`Configuration`] | Effective configuration |
//! | [`ConfigOverrides`] | Caller-supplied configuration |
//! | [`InitializationGate`] | Queues queries until the connection is ready |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Configuration defaults and merging.
pub mod config;

/// Core client implementation.
pub mod core;

/// Initialisation gate.
pub mod gate;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use config::{ConfigOverrides, Configuration, logging_callback};
pub use core::Client;
pub use gate::InitializationGate;
