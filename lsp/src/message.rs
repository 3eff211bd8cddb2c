//! JSON-RPC envelope, request identifiers, and inbound classification.
//!
//! Every frame on the wire decodes into a [`Message`]. [`Message::classify`]
//! sorts it into exactly one of three delivery classes ([`Incoming`]); a
//! message that fits none of them is a [`ProtocolError`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC and LSP error codes that get named handling.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const CONTENT_MODIFIED: i64 = -32801;
    pub const SERVER_CANCELLED: i64 = -32802;
}

/// A request identifier: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    /// An integer id above `i64::MAX`. Only peers produce these.
    UInt(u64),
    Str(String),
}

impl RequestId {
    /// Canonical lookup key. Uses the JSON encoding so `1` and `"1"` never collide.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::UInt(n) => n.to_string(),
            Self::Str(s) => format!("{s:?}"),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::UInt(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// What a response carries: its `result` or its `error`.
pub type Outcome = Result<Value, ResponseError>;

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}

/// The wire envelope.
///
/// `params` and `result` distinguish "absent" (`None`) from an explicit
/// JSON `null` (`Some(Value::Null)`): a `shutdown` response is
/// `"result": null` and must still count as a successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub params: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Maps a present field (including `null`) to `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    fn empty() -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id),
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn response(id: RequestId, outcome: Outcome) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            id: Some(id),
            result,
            error,
            ..Self::empty()
        }
    }

    /// Sort this message into its delivery class.
    ///
    /// An empty `method` string is treated as absent. A response with
    /// neither `result` nor `error` is accepted as a `null` result; when
    /// both are present the error wins.
    pub fn classify(self) -> Result<Incoming, ProtocolError> {
        let method = self.method.filter(|m| !m.is_empty());
        match (self.id, method) {
            (Some(id), Some(method)) => Ok(Incoming::Request {
                id,
                method,
                params: self.params,
            }),
            (None, Some(method)) => Ok(Incoming::Notification {
                method,
                params: self.params,
            }),
            (Some(id), None) => {
                let outcome = match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Ok(Incoming::Response { id, outcome })
            }
            (None, None) => Err(ProtocolError::Unclassifiable),
        }
    }
}

/// A decoded message, sorted by delivery semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Peer-initiated request; exactly one response must be written.
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    /// Peer-initiated notification; never answered.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Reply to one of our requests.
    Response { id: RequestId, outcome: Outcome },
}

/// A well-formed frame that no delivery class accepts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message has neither a method nor a non-null id")]
    Unclassifiable,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn request_with_id_and_method() {
        let msg = parse(serde_json::json!({
            "jsonrpc": "2.0", "id": 7, "method": "workspace/configuration", "params": {}
        }));
        match msg.classify().unwrap() {
            Incoming::Request { id, method, .. } => {
                assert_eq!(id, RequestId::Int(7));
                assert_eq!(method, "workspace/configuration");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn null_id_with_method_is_notification() {
        let msg = parse(serde_json::json!({
            "jsonrpc": "2.0", "id": null, "method": "window/logMessage"
        }));
        assert!(matches!(
            msg.classify().unwrap(),
            Incoming::Notification { .. }
        ));
    }

    #[test]
    fn absent_id_with_method_is_notification() {
        let msg = parse(serde_json::json!({"jsonrpc": "2.0", "method": "exit"}));
        assert!(matches!(
            msg.classify().unwrap(),
            Incoming::Notification { params: None, .. }
        ));
    }

    #[test]
    fn id_without_method_is_response() {
        let msg = parse(serde_json::json!({"jsonrpc": "2.0", "id": "abc", "result": {"x": 1}}));
        match msg.classify().unwrap() {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, RequestId::from("abc"));
                assert_eq!(outcome.unwrap()["x"], 1);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn null_result_is_success() {
        let msg = parse(serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": null}));
        assert_eq!(msg.result, Some(Value::Null));
        match msg.classify().unwrap() {
            Incoming::Response { outcome, .. } => assert_eq!(outcome, Ok(Value::Null)),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn error_wins_over_result() {
        let msg = parse(serde_json::json!({
            "jsonrpc": "2.0", "id": 3, "result": 1,
            "error": {"code": -32801, "message": "content modified"}
        }));
        match msg.classify().unwrap() {
            Incoming::Response { outcome, .. } => {
                assert_eq!(outcome.unwrap_err().code, error_codes::CONTENT_MODIFIED);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn neither_id_nor_method_is_protocol_error() {
        let msg = parse(serde_json::json!({"jsonrpc": "2.0", "result": 1}));
        assert_eq!(msg.classify(), Err(ProtocolError::Unclassifiable));

        let msg = parse(serde_json::json!({"jsonrpc": "2.0", "id": null, "method": ""}));
        assert_eq!(msg.classify(), Err(ProtocolError::Unclassifiable));
    }

    #[test]
    fn canonical_keys_distinguish_int_and_string() {
        assert_eq!(RequestId::Int(1).canonical_key(), "1");
        assert_eq!(RequestId::from("1").canonical_key(), "\"1\"");
        assert_ne!(
            RequestId::Int(1).canonical_key(),
            RequestId::from("1").canonical_key()
        );
    }

    #[test]
    fn id_above_i64_range_is_accepted() {
        let msg = parse(serde_json::json!({
            "jsonrpc": "2.0", "id": u64::MAX, "method": "workspace/configuration"
        }));
        let Incoming::Request { id, .. } = msg.classify().unwrap() else {
            panic!("expected request");
        };
        assert_eq!(id, RequestId::UInt(u64::MAX));
        assert_eq!(id.canonical_key(), u64::MAX.to_string());

        let reply = serde_json::to_value(Message::response(id, Ok(Value::Null))).unwrap();
        assert_eq!(reply["id"], u64::MAX);
    }

    #[test]
    fn request_serialization_omits_absent_fields() {
        let msg = Message::request(RequestId::Int(1), "shutdown", None);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "shutdown");
        assert!(json.get("params").is_none(), "params must be omitted");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn notification_has_no_id() {
        let msg = Message::notification("initialized", Some(serde_json::json!({})));
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("id").is_none());
        assert!(json["params"].is_object());
    }

    #[test]
    fn success_response_keeps_null_result() {
        let msg = Message::response(RequestId::Int(4), Ok(Value::Null));
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("result").is_some());
        assert!(json["result"].is_null());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn method_not_found_message_names_method() {
        let err = ResponseError::method_not_found("foo/bar");
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "method not found: foo/bar");
    }
}
