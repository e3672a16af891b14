//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use importio_client::{Auth, Client};
//!
//! # async fn example() -> importio_client::Result<()> {
//! let client = Client::builder()
//!     .https(true)
//!     .port(443)
//!     .timeout(Duration::from_secs(120))
//!     .auth(Auth::api_key("user-guid", "YXBpLWtleQ=="))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::protocol::MetaMessage;
use crate::transport::{BayeuxTransport, Transport};

use super::config::ConfigOverrides;
use super::core::Client;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Caller-supplied configuration.
    overrides: ConfigOverrides,
    /// Transport to use instead of [`BayeuxTransport`].
    transport: Option<Arc<dyn Transport>>,
    /// HTTP client for URL-delegated signing.
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Creates a builder with no overrides.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query server host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.overrides.host = Some(host.into());
        self
    }

    /// Sets the query server port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.overrides.port = Some(port);
        self
    }

    /// Enables or disables TLS.
    #[inline]
    #[must_use]
    pub fn https(mut self, https: bool) -> Self {
        self.overrides.https = Some(https);
        self
    }

    /// Logs connection notifications at `info` instead of `debug`.
    #[inline]
    #[must_use]
    pub fn logging(mut self, logging: bool) -> Self {
        self.overrides.logging = Some(logging);
        self
    }

    /// Sets the per-query deadline.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    /// Sets the callback receiving every `/meta` notification.
    #[inline]
    #[must_use]
    pub fn connection_callback(
        mut self,
        callback: impl Fn(&MetaMessage) + Send + Sync + 'static,
    ) -> Self {
        self.overrides.connection_callback = Some(Arc::new(callback));
        self
    }

    /// Sets how queries are authorised.
    #[inline]
    #[must_use]
    pub fn auth(mut self, auth: Auth) -> Self {
        self.overrides.auth = Some(auth);
        self
    }

    /// Replaces the default WebSocket transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the HTTP client used for URL-delegated signing.
    #[inline]
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Builds the client and starts connecting.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the host is empty or the timeout is zero
    /// - [`Error::Config`] if called outside a Tokio runtime
    /// - [`Error::Url`] if the endpoint cannot be formed
    pub fn build(self) -> Result<Client> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::config(
                "Client must be built inside a Tokio runtime.\n\
                 Example: call Client::builder().build() from a #[tokio::main] function",
            )
        })?;

        let config = self.overrides.merge();
        config.validate()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(BayeuxTransport::new()));
        let http = self.http.unwrap_or_default();

        Client::new(config, transport, http, runtime)
    }
}

impl From<ConfigOverrides> for ClientBuilder {
    fn from(overrides: ConfigOverrides) -> Self {
        Self {
            overrides,
            ..Self::default()
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("overrides", &self.overrides)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_http", &self.http.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = ClientBuilder::new();
        assert!(builder.overrides.host.is_none());
        assert!(builder.transport.is_none());
        assert!(builder.http.is_none());
    }

    #[test]
    fn test_setters_fill_overrides() {
        let builder = ClientBuilder::new()
            .host("localhost")
            .port(8080)
            .https(true)
            .logging(true)
            .timeout(Duration::from_secs(5))
            .auth(Auth::url("http://localhost/sign"))
            .connection_callback(|_| {});

        assert_eq!(builder.overrides.host.as_deref(), Some("localhost"));
        assert_eq!(builder.overrides.port, Some(8080));
        assert_eq!(builder.overrides.https, Some(true));
        assert_eq!(builder.overrides.logging, Some(true));
        assert_eq!(builder.overrides.timeout, Some(Duration::from_secs(5)));
        assert!(builder.overrides.auth.is_some());
        assert!(builder.overrides.connection_callback.is_some());
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = ClientBuilder::new().build().expect_err("no runtime");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_timeout() {
        let err = ClientBuilder::new()
            .timeout(Duration::ZERO)
            .build()
            .expect_err("zero timeout");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_empty_host() {
        let err = ClientBuilder::new().host("").build().expect_err("empty host");
        assert!(matches!(err, Error::Config { .. }));
    }
}
