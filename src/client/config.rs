//! Client configuration.
//!
//! [`Configuration`] is the effective configuration a [`Client`](super::Client)
//! runs with. [`ConfigOverrides`] carries caller-supplied values; merging
//! fills only the keys the caller left out.
//!
//! | Key | Default |
//! |-----|---------|
//! | `host` | `query.import.io` |
//! | `port` | `80` |
//! | `https` | `false` |
//! | `logging` | `false` |
//! | `timeout` | 60 s |
//! | `connection_callback` | logs every `/meta` notification |
//! | `auth` | none |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::protocol::MetaMessage;
use crate::transport::ConnectionCallback;

// ============================================================================
// Constants
// ============================================================================

/// Default query server host.
pub const DEFAULT_HOST: &str = "query.import.io";

/// Default query server port.
pub const DEFAULT_PORT: u16 = 80;

/// Default per-query deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Path of the publish/subscribe endpoint.
const COMET_PATH: &str = "/query/comet";

// ============================================================================
// Default Callback
// ============================================================================

/// Connection callback that logs every notification.
///
/// Logs at `info` when `logging` is set, otherwise at `debug`.
#[must_use]
pub fn logging_callback(logging: bool) -> ConnectionCallback {
    Arc::new(move |message: &MetaMessage| {
        if logging {
            info!(channel = message.channel, event = ?message.data, "Connection event");
        } else {
            debug!(channel = message.channel, event = ?message.data, "Connection event");
        }
    })
}

// ============================================================================
// Configuration
// ============================================================================

/// Effective client configuration.
#[derive(Clone)]
pub struct Configuration {
    /// Query server host.
    pub host: String,
    /// Query server port.
    pub port: u16,
    /// Use TLS.
    pub https: bool,
    /// Log connection notifications at `info`.
    pub logging: bool,
    /// Per-query deadline.
    pub timeout: Duration,
    /// Receives every `/meta` notification.
    pub connection_callback: ConnectionCallback,
    /// How queries are authorised.
    pub auth: Option<Auth>,
}

impl Configuration {
    /// Returns `http[s]://host:port/query/comet`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the host does not form a valid URL.
    pub fn endpoint(&self) -> Result<Url> {
        let scheme = if self.https { "https" } else { "http" };
        let url = Url::parse(&format!(
            "{scheme}://{}:{}{COMET_PATH}",
            self.host, self.port
        ))?;
        Ok(url)
    }

    /// Checks the values a client cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty host or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        ConfigOverrides::default().merge()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("https", &self.https)
            .field("logging", &self.logging)
            .field("timeout", &self.timeout)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConfigOverrides
// ============================================================================

/// Caller-supplied configuration; every key optional.
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    /// Query server host.
    pub host: Option<String>,
    /// Query server port.
    pub port: Option<u16>,
    /// Use TLS.
    pub https: Option<bool>,
    /// Log connection notifications at `info`.
    pub logging: Option<bool>,
    /// Per-query deadline.
    pub timeout: Option<Duration>,
    /// Receives every `/meta` notification.
    pub connection_callback: Option<ConnectionCallback>,
    /// How queries are authorised.
    pub auth: Option<Auth>,
}

impl ConfigOverrides {
    /// Fills absent keys with defaults.
    #[must_use]
    pub fn merge(self) -> Configuration {
        let logging = self.logging.unwrap_or(false);
        Configuration {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            https: self.https.unwrap_or(false),
            logging,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            connection_callback: self
                .connection_callback
                .unwrap_or_else(|| logging_callback(logging)),
            auth: self.auth,
        }
    }
}

impl fmt::Debug for ConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverrides")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("https", &self.https)
            .field("logging", &self.logging)
            .field("timeout", &self.timeout)
            .field("connection_callback", &self.connection_callback.is_some())
            .field("auth", &self.auth)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::protocol::MetaEvent;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.host, "query.import.io");
        assert_eq!(config.port, 80);
        assert!(!config.https);
        assert!(!config.logging);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_caller_values_win() {
        let config = ConfigOverrides {
            host: Some("localhost".into()),
            port: Some(8080),
            https: Some(true),
            timeout: Some(Duration::from_secs(5)),
            auth: Some(Auth::url("http://localhost/sign")),
            ..ConfigOverrides::default()
        }
        .merge();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8080);
        assert!(config.https);
        assert!(!config.logging);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(matches!(config.auth, Some(Auth::Url(_))));
    }

    #[test]
    fn test_custom_callback_kept() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let config = ConfigOverrides {
            connection_callback: Some(Arc::new(move |_: &MetaMessage| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..ConfigOverrides::default()
        }
        .merge();

        (config.connection_callback)(&MetaMessage::new(MetaEvent::Connected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_endpoint() {
        let config = Configuration::default();
        assert_eq!(
            config.endpoint().expect("endpoint").as_str(),
            "http://query.import.io/query/comet"
        );

        let tls = ConfigOverrides {
            https: Some(true),
            port: Some(8443),
            ..ConfigOverrides::default()
        }
        .merge();
        assert_eq!(
            tls.endpoint().expect("endpoint").as_str(),
            "https://query.import.io:8443/query/comet"
        );
    }

    #[test]
    fn test_validate() {
        assert!(Configuration::default().validate().is_ok());

        let empty_host = ConfigOverrides {
            host: Some("  ".into()),
            ..ConfigOverrides::default()
        }
        .merge();
        assert!(matches!(empty_host.validate(), Err(Error::Config { .. })));

        let zero_timeout = ConfigOverrides {
            timeout: Some(Duration::ZERO),
            ..ConfigOverrides::default()
        }
        .merge();
        assert!(matches!(zero_timeout.validate(), Err(Error::Config { .. })));
    }
}
