//! Error types for the import.io query client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use importio_client::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let handle = client.query(serde_json::json!({ "input": {} }), ())?;
//!     let results = handle.wait().await?;
//!     println!("{} rows", results.len());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Auth | [`Error::Auth`] |
//! | Query | [`Error::ServerReported`], [`Error::DuplicateQuery`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::QueryId;
use crate::protocol::MessageType;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    ///
    /// Returned when the publish/subscribe connection cannot be used.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Auth Errors
    // ========================================================================
    /// Query could not be authorised.
    ///
    /// Returned when local signing or delegated signing fails.
    #[error("Auth error: {message}")]
    Auth {
        /// Description of the auth failure.
        message: String,
    },

    // ========================================================================
    // Query Errors
    // ========================================================================
    /// The server reported an error for a query (`UNAUTH` or `ERROR`).
    #[error("Server reported {error_type}: {data}")]
    ServerReported {
        /// Message type that carried the error.
        message_type: MessageType,
        /// Server-side error classification.
        error_type: String,
        /// Additional error payload.
        data: Value,
    },

    /// A query with the same id is already registered.
    #[error("Query already registered: {query_id}")]
    DuplicateQuery {
        /// The conflicting query id.
        query_id: QueryId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<WsError>),

    /// HTTP error from the delegated signing endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an auth error.
    #[inline]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates a server-reported error.
    #[inline]
    pub fn server_reported(
        message_type: MessageType,
        error_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self::ServerReported {
            message_type,
            error_type: error_type.into(),
            data,
        }
    }

    /// Creates a duplicate query error.
    #[inline]
    pub fn duplicate_query(query_id: QueryId) -> Self {
        Self::DuplicateQuery { query_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the server rejected the query.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ServerReported { .. })
    }

    /// Returns `true` if the query could not be authorised.
    ///
    /// Covers local/delegated signing failures and server `UNAUTH` replies.
    #[inline]
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        match self {
            Self::Auth { .. } | Self::Http(_) => true,
            Self::ServerReported { message_type, .. } => *message_type == MessageType::Unauth,
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
