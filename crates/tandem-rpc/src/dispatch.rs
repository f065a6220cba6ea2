//! Serving calls from the peer against the local function tree.

use crate::boundary::ErrorPayload;
use crate::config::ProtocolConfig;
use crate::function::Outcome;
use crate::peer::PeerInner;
use crate::protocol::{CallPayload, Invocation, Message};
use futures::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Handle one inbound `call`.
///
/// Immediate outcomes are answered before this returns; deferred ones are
/// answered from a spawned task once they settle. A panicking handler is
/// answered with a `reject` like any other failure.
pub(crate) fn handle_call(inner: &Arc<PeerInner>, call: CallPayload) {
    let Some(invocation) = call.into_invocation() else {
        warn!("Refusing call without a numeric id from {}", inner.lifecycle.label());
        if let Err(e) = inner.emit(&Message::rpc_error(ProtocolConfig::MISSING_ID_REASON)) {
            warn!("Failed to send rpcError: {}", e);
        }
        return;
    };

    debug!("invocation {} of {} with {:?}", invocation.id, invocation.fn_path, invocation.args);

    let Some(function) = inner.local.get_leaf(&invocation.fn_path).cloned() else {
        let message = format!("no function exposed at {}", invocation.fn_path);
        debug!("{}", message);
        let error = ErrorPayload::new(message).with_field("path", invocation.fn_path.clone());
        send_reply(inner, &invocation, Message::reject(invocation.id, error));
        return;
    };

    let invoked = panic::catch_unwind(AssertUnwindSafe(|| function.invoke(invocation.args.clone())));
    match invoked.unwrap_or_else(|payload| Err(panicked(payload))) {
        Ok(Outcome::Ready(value)) => {
            send_reply(inner, &invocation, Message::resolve(invocation.id, value));
        }
        Ok(Outcome::Pending(pending)) => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let settled = AssertUnwindSafe(pending)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panicked(payload)));
                let reply = match settled {
                    Ok(value) => Message::resolve(invocation.id, value),
                    Err(err) => handler_failed(&inner, &invocation, &err),
                };
                send_reply(&inner, &invocation, reply);
            });
        }
        Err(err) => {
            let reply = handler_failed(inner, &invocation, &err);
            send_reply(inner, &invocation, reply);
        }
    }
}

/// A handler panic becomes an ordinary failure of that one invocation.
fn panicked(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("handler panicked: {}", detail)
}

/// Encode a handler failure and surface it as an operational error.
fn handler_failed(inner: &PeerInner, invocation: &Invocation, err: &anyhow::Error) -> Message {
    let payload = inner.boundary.encode(err);
    error!(
        "RPC method invocation {} from {} failed: {:#}",
        invocation.fn_path,
        inner.lifecycle.label(),
        err
    );
    inner.observer.on_handler_error(&invocation.fn_path, &payload);
    Message::reject(invocation.id, payload)
}

fn send_reply(inner: &PeerInner, invocation: &Invocation, reply: Message) {
    if let Err(e) = inner.emit(&reply) {
        warn!("Failed to send {} for invocation {}: {}", reply.kind(), invocation.id, e);
    }
    inner.observer.on_dispatched(invocation, &reply);
}
