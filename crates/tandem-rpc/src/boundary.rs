//! Error boundary between a local handler failure and its wire form.
//!
//! Handler failures are `anyhow::Error`s. They cross the connection as an
//! [`ErrorPayload`] (`{message, stack?, ...fields}`) and come back out on the
//! calling side as a [`RemoteError`]. Only the message and the extra fields
//! survive the trip; the concrete error type does not.

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transmissible representation of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A failure reported by the peer, reconstructed on this side.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub stack: Option<String>,
    pub fields: Map<String, Value>,
}

impl RemoteError {
    /// A contextual field attached by the peer (for example `path`).
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl From<ErrorPayload> for RemoteError {
    fn from(payload: ErrorPayload) -> Self {
        Self {
            message: payload.message,
            stack: payload.stack,
            fields: payload.fields,
        }
    }
}

impl From<RemoteError> for ErrorPayload {
    fn from(err: RemoteError) -> Self {
        Self {
            message: err.message,
            stack: err.stack,
            fields: err.fields,
        }
    }
}

/// Encodes handler failures for the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorBoundary {
    include_stack_trace: bool,
}

impl ErrorBoundary {
    pub fn new(include_stack_trace: bool) -> Self {
        Self {
            include_stack_trace,
        }
    }

    /// Encode a failure. The stack is only attached when enabled.
    ///
    /// A failure that itself came from a peer (a nested remote call) keeps
    /// its fields, so context such as `path` survives a relay.
    pub fn encode(&self, err: &anyhow::Error) -> ErrorPayload {
        let relayed = err.downcast_ref::<RemoteError>().or_else(|| {
            match err.downcast_ref::<RpcError>() {
                Some(RpcError::Remote(remote)) => Some(remote),
                _ => None,
            }
        });

        let mut payload = ErrorPayload::new(err.to_string());
        match relayed {
            Some(remote) => {
                payload.fields = remote.fields.clone();
                payload.stack = remote.stack.clone();
            }
            None => {
                if let Some(path) = err.downcast_ref::<RpcError>().and_then(RpcError::path) {
                    payload.fields.insert("path".to_string(), Value::from(path));
                }
            }
        }

        payload.stack = if self.include_stack_trace {
            payload.stack.or_else(|| Some(format!("{:?}", err)))
        } else {
            None
        };
        payload
    }

    /// Decode a failure received from the peer.
    pub fn decode(payload: ErrorPayload) -> RemoteError {
        payload.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_omits_stack_by_default() {
        let err = anyhow::anyhow!("disk on fire");
        let payload = ErrorBoundary::default().encode(&err);
        assert_eq!(payload.message, "disk on fire");
        assert!(payload.stack.is_none());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, json!({"message": "disk on fire"}));
    }

    #[test]
    fn test_encode_includes_stack_when_enabled() {
        let err = anyhow::anyhow!("inner").context("outer");
        let payload = ErrorBoundary::new(true).encode(&err);
        assert_eq!(payload.message, "outer");
        let stack = payload.stack.expect("stack should be attached");
        assert!(stack.contains("inner"));
    }

    #[test]
    fn test_decode_keeps_message_and_fields() {
        let wire = json!({"message": "nope", "path": "a.b", "code": 3});
        let payload: ErrorPayload = serde_json::from_value(wire).unwrap();
        let remote = ErrorBoundary::decode(payload);
        assert_eq!(remote.to_string(), "nope");
        assert_eq!(remote.field("path"), Some(&json!("a.b")));
        assert_eq!(remote.field("code"), Some(&json!(3)));
        assert!(remote.stack.is_none());
    }

    #[test]
    fn test_relayed_remote_error_keeps_fields() {
        let remote = RemoteError::from(ErrorPayload::new("far away").with_field("path", "x.y"));
        let err = anyhow::Error::new(RpcError::Remote(remote));
        let payload = ErrorBoundary::default().encode(&err);
        assert_eq!(payload.message, "far away");
        assert_eq!(payload.fields.get("path"), Some(&json!("x.y")));
    }

    #[test]
    fn test_rpc_error_path_becomes_field() {
        let err = anyhow::Error::new(RpcError::NoSuchNode {
            connection: "c1".into(),
            path: "math".into(),
        });
        let payload = ErrorBoundary::default().encode(&err);
        assert_eq!(payload.fields.get("path"), Some(&json!("math")));
    }
}
