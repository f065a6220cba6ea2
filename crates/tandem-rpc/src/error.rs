//! Error types for Tandem RPC.
//!
//! `RpcError` is what callers see when a remote call or a discovery request
//! settles with a failure. `ProtocolViolation` covers anomalies caused by the
//! peer that are reported and ignored rather than returned to any caller.

use crate::boundary::RemoteError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Tandem RPC operations.
///
/// Cloneable so a single discovery outcome can be handed to every waiter of a
/// shared request. Foreign errors are captured by message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    // Connection errors
    #[error("socket {connection} disconnected, call rejected")]
    Disconnected { connection: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection closed before a reply arrived")]
    ConnectionClosed,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Remote call {fn_path} timed out after {after:?}")]
    Timeout { fn_path: String, after: Duration },

    // Discovery errors
    #[error("Node is not defined on the socket {connection}")]
    NoSuchNode { connection: String, path: String },

    #[error("No remote function at {path}")]
    NotAFunction { path: String },

    // Failure reported by the peer's handler
    #[error("{0}")]
    Remote(RemoteError),

    // Local tree construction
    #[error("Cannot insert at {path}: conflicts with an existing function")]
    TreeConflict { path: String },

    // Serialization and framing
    #[error("JSON error: {message}")]
    Json { message: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Result type alias for Tandem RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        RpcError::Remote(err)
    }
}

impl RpcError {
    /// Convert to a JSON-RPC style error code.
    ///
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32603: Internal error
    /// - -32000: Connectivity error
    /// - -32001: Remote handler failure
    /// - -32002: Node not found
    /// - -32003: Timeout
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            RpcError::Disconnected { .. }
            | RpcError::ConnectionFailed { .. }
            | RpcError::ConnectionClosed
            | RpcError::Transport { .. }
            | RpcError::Io { .. } => -32000,

            RpcError::Remote(_) => -32001,

            RpcError::NoSuchNode { .. } => -32002,

            RpcError::Timeout { .. } => -32003,

            RpcError::NotAFunction { .. } => -32601,

            RpcError::Json { .. } | RpcError::FrameTooLarge { .. } => -32700,

            RpcError::TreeConflict { .. } => -32603,
        }
    }

    /// The discovery path this error refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            RpcError::NoSuchNode { path, .. }
            | RpcError::NotAFunction { path }
            | RpcError::TreeConflict { path } => Some(path),
            RpcError::Remote(remote) => remote.field("path").and_then(|v| v.as_str()),
            _ => None,
        }
    }

    /// Check if a retry after reconnection could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Disconnected { .. } | RpcError::Timeout { .. } | RpcError::Transport { .. }
        )
    }
}

/// Protocol anomalies caused by the peer.
///
/// These never fail a call of ours and never abort the connection; they are
/// logged and handed to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("Deferred Id {id} was resolved/rejected more than once, or was never issued")]
    UnknownInvocation { id: u64 },

    #[error("Reply for invocation {id} arrived after the call was abandoned")]
    LateReply { id: u64 },

    #[error("Received node {path:?} that was never requested")]
    UnrequestedNode { path: String },

    #[error("Received noSuchNode {path:?} for a node that was never requested")]
    UnrequestedNoSuchNode { path: String },

    #[error("Peer refused a message: {reason}")]
    RejectedByPeer { reason: String },
}
