//! Inbound job messages.
//!
//! Every message published on the shared broadcast channel belongs to one
//! query and is routed to it by `requestId`.
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "MESSAGE",
//!   "requestId": "2b4c3bd9-5b4f-4b43-8f0e-0f7f55a8a1a4",
//!   "connectorGuid": "connector-guid",
//!   "connectorVersionGuid": "connector-version-guid",
//!   "data": { "results": [ { ... } ] }
//! }
//! ```
//!
//! `requestId` may also appear inside `data`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// MessageType
// ============================================================================

/// Kind of an inbound job message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Job warm-up; the next `STOP` is spurious.
    Init,
    /// A page started.
    Start,
    /// A page was queued.
    Spawn,
    /// A page completed.
    Stop,
    /// A batch of results.
    Message,
    /// The query was not authorised.
    Unauth,
    /// The job failed.
    Error,
    /// Any type this client does not know.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Returns `true` for types that end the query with a rejection.
    #[inline]
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Unauth | Self::Error)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A job message received on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Request id of the owning query.
    #[serde(
        default,
        deserialize_with = "request_id_from_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,

    /// Connector executing the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_guid: Option<String>,

    /// Connector version executing the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_version_guid: Option<String>,

    /// Type-specific payload.
    #[serde(default)]
    pub data: MessageData,
}

/// Payload of a [`Message`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    /// Request id, when carried in the payload instead of the envelope.
    #[serde(
        default,
        deserialize_with = "request_id_from_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,

    /// Raw result rows (`MESSAGE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,

    /// Error classification (`UNAUTH`/`ERROR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Error details (`UNAUTH`/`ERROR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    /// Creates a message of the given type for a request.
    #[must_use]
    pub fn new(message_type: MessageType, request_id: impl Into<String>) -> Self {
        Self {
            message_type,
            request_id: Some(request_id.into()),
            connector_guid: None,
            connector_version_guid: None,
            data: MessageData::default(),
        }
    }

    /// Returns the request id, looking at the envelope first and the payload second.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id
            .as_deref()
            .or(self.data.request_id.as_deref())
    }

    /// Wraps each raw result row with the connector that produced it.
    ///
    /// Order is preserved.
    #[must_use]
    pub fn tagged_results(&self) -> Vec<QueryResult> {
        self.data
            .results
            .iter()
            .flatten()
            .map(|row| QueryResult {
                data: row.clone(),
                connector_guid: self.connector_guid.clone(),
                connector_version_guid: self.connector_version_guid.clone(),
            })
            .collect()
    }

    /// Returns the error type, or `"UNKNOWN"` when the server sent none.
    #[inline]
    #[must_use]
    pub fn error_type(&self) -> &str {
        self.data.error_type.as_deref().unwrap_or("UNKNOWN")
    }

    /// Returns the error details, or `null`.
    #[inline]
    #[must_use]
    pub fn error_data(&self) -> Value {
        self.data.data.clone().unwrap_or(Value::Null)
    }
}

// ============================================================================
// QueryResult
// ============================================================================

/// One result row tagged with its connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// The raw row.
    pub data: Value,
    /// Connector that produced the row.
    pub connector_guid: Option<String>,
    /// Connector version that produced the row.
    pub connector_version_guid: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Accepts string or numeric request ids.
fn request_id_from_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(other) => Some(other.to_string()),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_message_parsing() {
        let json_str = r#"{
            "type": "MESSAGE",
            "requestId": "550e8400-e29b-41d4-a716-446655440000",
            "connectorGuid": "conn-1",
            "connectorVersionGuid": "ver-1",
            "data": { "results": [ {"title": "a"}, {"title": "b"} ] }
        }"#;

        let message: Message = serde_json::from_str(json_str).expect("parse message");
        assert_eq!(message.message_type, MessageType::Message);
        assert_eq!(
            message.request_id(),
            Some("550e8400-e29b-41d4-a716-446655440000")
        );

        let tagged = message.tagged_results();
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged[0].data, json!({"title": "a"}));
        assert_eq!(tagged[1].data, json!({"title": "b"}));
        assert_eq!(tagged[1].connector_guid.as_deref(), Some("conn-1"));
        assert_eq!(tagged[1].connector_version_guid.as_deref(), Some("ver-1"));
    }

    #[test]
    fn test_request_id_inside_data() {
        let message: Message =
            serde_json::from_value(json!({ "type": "SPAWN", "data": { "requestId": "abc" } }))
                .expect("parse");
        assert_eq!(message.request_id(), Some("abc"));
    }

    #[test]
    fn test_numeric_request_id() {
        let message: Message =
            serde_json::from_value(json!({ "type": "STOP", "requestId": 1386264617000u64 }))
                .expect("parse");
        assert_eq!(message.request_id(), Some("1386264617000"));
    }

    #[test]
    fn test_missing_request_id() {
        let message: Message =
            serde_json::from_value(json!({ "type": "INIT" })).expect("parse");
        assert_eq!(message.request_id(), None);
        assert!(message.tagged_results().is_empty());
    }

    #[test]
    fn test_unknown_type() {
        let message: Message =
            serde_json::from_value(json!({ "type": "HEARTBEAT", "requestId": "x" }))
                .expect("parse");
        assert_eq!(message.message_type, MessageType::Unknown);
    }

    #[test]
    fn test_error_fields() {
        let message: Message = serde_json::from_value(json!({
            "type": "UNAUTH",
            "requestId": "x",
            "data": { "errorType": "UnauthorizedException", "data": {"reason": "expired"} }
        }))
        .expect("parse");

        assert!(message.message_type.is_failure());
        assert_eq!(message.error_type(), "UnauthorizedException");
        assert_eq!(message.error_data(), json!({"reason": "expired"}));
    }

    #[test]
    fn test_error_defaults() {
        let message = Message::new(MessageType::Error, "x");
        assert_eq!(message.error_type(), "UNKNOWN");
        assert_eq!(message.error_data(), Value::Null);
    }
}
