//! Centralized configuration for Tandem RPC.
//!
//! `RpcConfig` holds per-connection options chosen by the embedder.
//! `ProtocolConfig` holds wire-level constants shared by both endpoints.

use std::time::Duration;

/// Wire-level protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Largest frame accepted by the framed stream transport.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    /// Reason sent in `rpcError` when a call carries no usable id.
    pub const MISSING_ID_REASON: &'static str =
        "Id is a required property for a call data payload";
    /// Separator between segments of a function path.
    pub const PATH_SEPARATOR: char = '.';
    /// Identity shown in messages before the connection identity is known.
    pub const UNKNOWN_CONNECTION: &'static str = "<unidentified>";
}

/// Which side of the connection this endpoint is.
///
/// The acceptor knows its connection identity as soon as it is constructed.
/// The initiator learns it on its first successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Initiator,
    Acceptor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Acceptor => "acceptor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initiator" | "client" => Some(Role::Initiator),
            "acceptor" | "server" => Some(Role::Acceptor),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-connection options.
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    /// Attach a stack trace to encoded handler failures. Keep off in production.
    pub include_stack_trace: bool,
    /// Side of the connection.
    pub role: Role,
    /// Abandon outgoing calls that get no reply within this window.
    /// `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl RpcConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn with_stack_traces(mut self, enable: bool) -> Self {
        self.include_stack_trace = enable;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}
