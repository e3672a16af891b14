//! Local query signing.
//!
//! A signed query is an envelope carrying the serialized query, an expiry
//! and an HMAC-SHA1 digest over a canonical check string:
//!
//! ```text
//! queryJson ":" userGuid [":" orgGuid] ":" expiresAt
//! ```
//!
//! The `orgGuid` segment is omitted when it is the nil GUID. The HMAC key is
//! the base64-decoded API key and the digest is base64-encoded.

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Organisation GUID meaning "no organisation".
pub const NIL_GUID: &str = "00000000-0000-0000-0000-000000000000";

/// Default validity of a signed query, in seconds.
pub const DEFAULT_VALID_PERIOD_SECS: u64 = 300;

// ============================================================================
// Types
// ============================================================================

type HmacSha1 = Hmac<Sha1>;

// ============================================================================
// SignedEnvelope
// ============================================================================

/// A query signed for publication on `/service/signed_query`.
///
/// # Format
///
/// ```json
/// {
///   "queryJson": "{...}",
///   "expiresAt": 1700000300000,
///   "userGuid": "user-guid",
///   "orgGuid": "00000000-0000-0000-0000-000000000000",
///   "digest": "base64"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    /// The query serialized to JSON text.
    pub query_json: String,
    /// Expiry as epoch milliseconds.
    pub expires_at: u64,
    /// Signing user.
    pub user_guid: String,
    /// Signing organisation ([`NIL_GUID`] for none).
    pub org_guid: String,
    /// Base64 HMAC-SHA1 digest of the check string.
    pub digest: String,
}

// ============================================================================
// Signing
// ============================================================================

/// Signs `query` with the current wall-clock time.
///
/// # Errors
///
/// - [`Error::Auth`] if `api_key` is not valid base64
/// - [`Error::Json`] if the query cannot be serialized
pub fn sign(
    query: &Value,
    user_guid: &str,
    org_guid: &str,
    api_key: &str,
    extra_time_secs: u64,
) -> Result<SignedEnvelope> {
    sign_at(
        query,
        user_guid,
        org_guid,
        api_key,
        extra_time_secs,
        now_millis(),
    )
}

/// Signs `query` as if the clock read `now_ms`.
///
/// Deterministic for identical inputs.
///
/// # Errors
///
/// - [`Error::Auth`] if `api_key` is not valid base64
/// - [`Error::Json`] if the query cannot be serialized
pub fn sign_at(
    query: &Value,
    user_guid: &str,
    org_guid: &str,
    api_key: &str,
    extra_time_secs: u64,
    now_ms: u64,
) -> Result<SignedEnvelope> {
    // serde_json orders object keys, so this is canonical.
    let query_json = serde_json::to_string(query)?;
    let expires_at = now_ms.saturating_add(extra_time_secs.saturating_mul(1000));

    let check = check_string(&query_json, user_guid, org_guid, expires_at);

    let key = Base64Standard
        .decode(api_key)
        .map_err(|e| Error::auth(format!("API key is not valid base64: {e}")))?;
    let mut mac = HmacSha1::new_from_slice(&key)
        .map_err(|e| Error::auth(format!("Unusable API key: {e}")))?;
    mac.update(check.as_bytes());
    let digest = Base64Standard.encode(mac.finalize().into_bytes());

    Ok(SignedEnvelope {
        query_json,
        expires_at,
        user_guid: user_guid.to_string(),
        org_guid: org_guid.to_string(),
        digest,
    })
}

/// Builds the canonical string the digest is computed over.
#[must_use]
pub fn check_string(query_json: &str, user_guid: &str, org_guid: &str, expires_at: u64) -> String {
    if org_guid == NIL_GUID {
        format!("{query_json}:{user_guid}:{expires_at}")
    } else {
        format!("{query_json}:{user_guid}:{org_guid}:{expires_at}")
    }
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_test::assert_ok;

    const API_KEY: &str = "c2VjcmV0LWtleQ==";
    const NOW: u64 = 1_700_000_000_000;
    const ORG: &str = "11111111-2222-3333-4444-555555555555";

    fn sample_query() -> Value {
        json!({ "input": { "webpage/url": "http://example.com" }, "connectorGuid": "abc" })
    }

    #[test]
    fn test_known_digest_nil_org() {
        let envelope = assert_ok!(sign_at(
            &sample_query(),
            "user-guid",
            NIL_GUID,
            API_KEY,
            DEFAULT_VALID_PERIOD_SECS,
            NOW
        ));

        assert_eq!(
            envelope.query_json,
            r#"{"connectorGuid":"abc","input":{"webpage/url":"http://example.com"}}"#
        );
        assert_eq!(envelope.expires_at, 1_700_000_300_000);
        assert_eq!(envelope.org_guid, NIL_GUID);
        assert_eq!(envelope.digest, "PyTvFLf293wtrlFd0aBBUEH47DQ=");
    }

    #[test]
    fn test_known_digest_with_org() {
        let envelope = assert_ok!(sign_at(
            &sample_query(),
            "user-guid",
            ORG,
            API_KEY,
            DEFAULT_VALID_PERIOD_SECS,
            NOW
        ));
        assert_eq!(envelope.digest, "GKG0E7Zd5Jq9q9ZKyZNoRHDv9B4=");
    }

    #[test]
    fn test_deterministic() {
        let a = sign_at(&sample_query(), "u", NIL_GUID, API_KEY, 300, NOW).expect("sign");
        let b = sign_at(&sample_query(), "u", NIL_GUID, API_KEY, 300, NOW).expect("sign");
        assert_eq!(a, b);
    }

    #[test]
    fn test_org_changes_digest() {
        let nil = sign_at(&sample_query(), "u", NIL_GUID, API_KEY, 300, NOW).expect("sign");
        let org = sign_at(&sample_query(), "u", ORG, API_KEY, 300, NOW).expect("sign");
        assert_ne!(nil.digest, org.digest);
    }

    #[test]
    fn test_check_string_segments() {
        assert_eq!(check_string("{}", "u", NIL_GUID, 5), "{}:u:5");
        assert_eq!(check_string("{}", "u", "o", 5), "{}:u:o:5");
    }

    #[test]
    fn test_invalid_api_key() {
        let err = sign_at(&sample_query(), "u", NIL_GUID, "not base64!", 300, NOW)
            .expect_err("should reject key");
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_envelope_wire_names() {
        let envelope = sign_at(&sample_query(), "u", NIL_GUID, API_KEY, 300, NOW).expect("sign");
        let value = serde_json::to_value(&envelope).expect("serialize");
        for key in ["queryJson", "expiresAt", "userGuid", "orgGuid", "digest"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_sign_uses_clock() {
        let envelope = sign(&sample_query(), "u", NIL_GUID, API_KEY, 10).expect("sign");
        assert!(envelope.expires_at > NOW);
    }
}
