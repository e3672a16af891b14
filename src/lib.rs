//! import.io query client - asynchronous crawl queries over one shared connection.
//!
//! Submit long-running crawl queries, multiplex them over a single Bayeux
//! publish/subscribe connection, follow per-page progress, stream partial
//! results and await completion.
//!
//! # Architecture
//!
//! ```text
//! Client::query ──► InitializationGate ──► query task ──► Transport::publish
//!                                              ▲
//! Transport ──► ConnectionLifecycle ──► QueryRegistry (route by requestId)
//! ```
//!
//! Key design principles:
//!
//! - One [`Client`] owns one connection; independent clients share nothing
//! - Queries queue until the connection is connected and subscribed
//! - Each query runs as its own task; its deadline and inbox share one `select!`
//! - A server-reported failure only rejects the query it targets
//!
//! # Quick Start
//!
//! ```no_run
//! use importio_client::{Auth, Client, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .auth(Auth::api_key("user-guid", "YXBpLWtleQ=="))
//!         .build()?;
//!
//!     let handle = client.query(
//!         json!({
//!             "connectorGuids": ["39df3fe4-c716-478b-9b80-bdbee43bfbde"],
//!             "input": { "webpage/url": "http://www.example.com" }
//!         }),
//!         (),
//!     )?;
//!
//!     let results = handle.wait().await?;
//!     println!("{} rows", results.len());
//!
//!     client.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Query signing and auth resolution |
//! | [`client`] | Client context and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Query id |
//! | [`protocol`] | Inbound messages and `/meta` notifications |
//! | [`query`] | Per-query state machine, callbacks and handle |
//! | [`registry`] | Live queries by request id |
//! | [`transport`] | Transport capability, lifecycle and Bayeux implementation |

// ============================================================================
// Modules
// ============================================================================

/// Query signing and auth resolution.
pub mod auth;

/// Client context and configuration.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Query identifiers.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// Query execution.
pub mod query;

/// Registry of live queries.
pub mod registry;

/// Publish/subscribe transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Auth types
pub use auth::{ApiKeyCredentials, Auth, Authenticator, SignedEnvelope};

// Client types
pub use client::{Client, ClientBuilder, ConfigOverrides, Configuration};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::QueryId;

// Protocol types
pub use protocol::{CloseReason, Message, MessageType, MetaEvent, MetaMessage, QueryResult};

// Query types
pub use query::{
    CLIENT_ERROR, Callbacks, DoneCallback, Hooks, Pages, Progress, QueryEvent, QueryHandle,
};

// Transport types
pub use transport::{BayeuxTransport, ConnectionCallback, ConnectionState, Transport};
