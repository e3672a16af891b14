//! Query authorisation.
//!
//! A query is authorised in one of four ways, chosen from the configured
//! [`Auth`] in this priority order:
//!
//! | Auth | Outbound channel | How |
//! |------|------------------|-----|
//! | [`Auth::ApiKey`] | `/service/signed_query` | signed locally with [`signer::sign`] |
//! | [`Auth::Delegate`] | `/service/signed_query` | an [`Authenticator`] returns the envelope |
//! | [`Auth::Url`] | `/service/signed_query` | raw query POSTed, JSON response is the envelope |
//! | none | `/service/query` | raw query, authorised by the transport session |

// ============================================================================
// Submodules
// ============================================================================

/// Local HMAC-SHA1 signing.
pub mod signer;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::QueryId;
use crate::protocol::ServiceChannel;

pub use signer::{DEFAULT_VALID_PERIOD_SECS, NIL_GUID, SignedEnvelope};

// ============================================================================
// Authenticator
// ============================================================================

/// Signs queries outside this crate.
///
/// Implement this to delegate signing to your own service or key store.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Produces a signed envelope for `query`.
    async fn sign(&self, query: &Value) -> Result<SignedEnvelope>;
}

/// Adapts an async closure into an [`Authenticator`].
pub struct FnAuthenticator<F>(F);

#[async_trait]
impl<F, Fut> Authenticator for FnAuthenticator<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SignedEnvelope>> + Send + 'static,
{
    async fn sign(&self, query: &Value) -> Result<SignedEnvelope> {
        (self.0)(query.clone()).await
    }
}

// ============================================================================
// ApiKeyCredentials
// ============================================================================

/// Credentials for local signing.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeyCredentials {
    /// User the query is signed for.
    pub user_guid: String,
    /// Base64-encoded API key.
    pub api_key: String,
    /// Organisation, if any.
    pub org_guid: Option<String>,
    /// Validity in seconds (default [`DEFAULT_VALID_PERIOD_SECS`]).
    pub valid_period_secs: Option<u64>,
}

impl ApiKeyCredentials {
    /// Creates credentials for a user.
    #[must_use]
    pub fn new(user_guid: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user_guid: user_guid.into(),
            api_key: api_key.into(),
            org_guid: None,
            valid_period_secs: None,
        }
    }

    /// Sets the organisation.
    #[inline]
    #[must_use]
    pub fn with_org(mut self, org_guid: impl Into<String>) -> Self {
        self.org_guid = Some(org_guid.into());
        self
    }

    /// Sets the validity period in seconds.
    #[inline]
    #[must_use]
    pub fn with_valid_period(mut self, secs: u64) -> Self {
        self.valid_period_secs = Some(secs);
        self
    }

    /// Signs `query` with these credentials.
    ///
    /// # Errors
    ///
    /// See [`signer::sign`].
    pub fn sign(&self, query: &Value) -> Result<SignedEnvelope> {
        signer::sign(
            query,
            &self.user_guid,
            self.org_guid.as_deref().unwrap_or(NIL_GUID),
            &self.api_key,
            self.valid_period_secs.unwrap_or(DEFAULT_VALID_PERIOD_SECS),
        )
    }
}

impl fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("user_guid", &self.user_guid)
            .field("org_guid", &self.org_guid)
            .field("valid_period_secs", &self.valid_period_secs)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Auth
// ============================================================================

/// How queries are authorised.
#[derive(Clone)]
pub enum Auth {
    /// Sign locally with an API key.
    ApiKey(ApiKeyCredentials),
    /// Delegate signing to custom code.
    Delegate(Arc<dyn Authenticator>),
    /// POST the raw query to this URL and use the JSON response as the envelope.
    Url(String),
}

impl Auth {
    /// Local signing with an API key.
    #[inline]
    #[must_use]
    pub fn api_key(user_guid: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::ApiKey(ApiKeyCredentials::new(user_guid, api_key))
    }

    /// Delegated signing through an [`Authenticator`].
    #[inline]
    #[must_use]
    pub fn delegate(authenticator: impl Authenticator + 'static) -> Self {
        Self::Delegate(Arc::new(authenticator))
    }

    /// Delegated signing through an async closure.
    #[inline]
    #[must_use]
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SignedEnvelope>> + Send + 'static,
    {
        Self::Delegate(Arc::new(FnAuthenticator(f)))
    }

    /// Delegated signing through an HTTP endpoint.
    #[inline]
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(credentials) => f.debug_tuple("ApiKey").field(credentials).finish(),
            Self::Delegate(_) => f.write_str("Delegate(..)"),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

// ============================================================================
// OutboundQuery
// ============================================================================

/// A query ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundQuery {
    /// Channel to publish on.
    pub channel: ServiceChannel,
    /// Payload without `requestId`.
    pub payload: Value,
}

impl OutboundQuery {
    /// Returns the payload with `requestId` attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the payload is not a JSON object.
    pub fn into_payload(self, id: QueryId) -> Result<Value> {
        let mut payload = self.payload;
        let object = payload
            .as_object_mut()
            .ok_or_else(|| Error::invalid_argument("query payload must be a JSON object"))?;
        object.insert("requestId".to_string(), Value::String(id.to_string()));
        Ok(payload)
    }
}

/// Resolves the configured auth into a publishable query.
///
/// # Errors
///
/// - [`Error::Auth`] if local or delegated signing fails
/// - [`Error::Http`] if the signing endpoint fails or returns a non-envelope
pub(crate) async fn resolve(
    auth: Option<&Auth>,
    query: &Value,
    http: &reqwest::Client,
) -> Result<OutboundQuery> {
    let envelope = match auth {
        Some(Auth::ApiKey(credentials)) => {
            debug!(user_guid = %credentials.user_guid, "Signing query locally");
            credentials.sign(query)?
        }
        Some(Auth::Delegate(authenticator)) => {
            debug!("Delegating query signing");
            authenticator.sign(query).await?
        }
        Some(Auth::Url(url)) => {
            debug!(%url, "Requesting signed query");
            http.post(url)
                .json(query)
                .send()
                .await?
                .error_for_status()?
                .json::<SignedEnvelope>()
                .await?
        }
        None => {
            return Ok(OutboundQuery {
                channel: ServiceChannel::Query,
                payload: query.clone(),
            });
        }
    };

    Ok(OutboundQuery {
        channel: ServiceChannel::SignedQuery,
        payload: serde_json::to_value(envelope)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
