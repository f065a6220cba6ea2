//! Observation hooks for embedders.
//!
//! Every hook is synchronous, defaults to a no-op, and is called after the
//! connection state has been updated, so a hook may freely call back into the
//! peer. Hooks never influence the protocol.

use crate::boundary::ErrorPayload;
use crate::error::ProtocolViolation;
use crate::protocol::{Invocation, Message};

pub trait RpcObserver: Send + Sync + 'static {
    /// The first call of a burst went out. `count` is always 1.
    fn on_batch_start(&self, _count: u64) {}

    /// The last outstanding call of a burst settled. `count` is the number of
    /// calls completed in the burst.
    fn on_batch_end(&self, _count: u64) {}

    /// An outgoing call was sent.
    fn on_calling(&self, _invocation: &Invocation) {}

    /// A call from the peer was dispatched and answered with `reply`.
    fn on_dispatched(&self, _invocation: &Invocation, _reply: &Message) {}

    /// An outgoing call settled; `completed` counts settlements in this burst.
    fn on_response(&self, _completed: u64) {}

    /// A local handler failed while serving the peer.
    fn on_handler_error(&self, _fn_path: &str, _error: &ErrorPayload) {}

    /// The peer broke the protocol in a way that was ignored.
    fn on_protocol_violation(&self, _violation: &ProtocolViolation) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RpcObserver for NoopObserver {}
