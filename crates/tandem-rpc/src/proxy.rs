//! Calling functions exposed by the peer.
//!
//! A [`RemoteFunction`] is a stand-in for one function on the other side.
//! Calling it registers a deferred under a fresh invocation id, sends the
//! `call`, and waits for the `resolve`/`reject` carrying the same id.

use crate::error::{Result, RpcError};
use crate::peer::PeerInner;
use crate::protocol::{Invocation, Message};
use crate::registry::Completion;
use crate::tree::Tree;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::debug;

/// Callable stand-in for a function exposed by the peer.
///
/// Holds only a weak reference to its connection; calling it after the
/// connection is gone fails with [`RpcError::ConnectionClosed`].
#[derive(Clone)]
pub struct RemoteFunction {
    path: String,
    arity: Option<usize>,
    peer: Weak<PeerInner>,
}

/// Proxy tree mirroring a subtree discovered on the peer.
pub type RemoteTree = Tree<RemoteFunction>;

impl RemoteFunction {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Argument count the peer declared for this function, if any.
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let inner = self.peer.upgrade().ok_or(RpcError::ConnectionClosed)?;
        invoke(inner, self.path.clone(), args).await
    }
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("path", &self.path)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Tree<RemoteFunction> {
    /// The proxy at a path relative to this tree.
    pub fn function(&self, path: &str) -> Result<&RemoteFunction> {
        self.get_leaf(path).ok_or_else(|| RpcError::NotAFunction {
            path: path.to_string(),
        })
    }

    /// Call the proxy at a path relative to this tree.
    pub async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value> {
        self.function(path)?.call(args).await
    }
}

pub(crate) fn prepare_remote_call(
    inner: &Arc<PeerInner>,
    fn_path: String,
    arity: Option<usize>,
) -> RemoteFunction {
    RemoteFunction {
        path: fn_path,
        arity,
        peer: Arc::downgrade(inner),
    }
}

/// Perform one remote call.
///
/// While the connection is reconnecting the call is refused outright: nothing
/// is registered and nothing is sent.
pub(crate) async fn invoke(
    inner: Arc<PeerInner>,
    fn_path: String,
    args: Vec<Value>,
) -> Result<Value> {
    if inner.lifecycle.is_reconnecting() {
        debug!("Refusing call to {} while {} reconnects", fn_path, inner.lifecycle.label());
        return Err(RpcError::Disconnected {
            connection: inner.lifecycle.label(),
        });
    }

    let (deferred, settled) = oneshot::channel();
    let registration = inner.state().registry.register(deferred);
    let invocation = Invocation {
        id: registration.id,
        fn_path,
        args,
    };

    debug!(
        "calling {} on {}, invocation counter {}",
        invocation.fn_path,
        inner.lifecycle.label(),
        invocation.id
    );
    inner.observer.on_calling(&invocation);
    if registration.batch_started {
        inner.observer.on_batch_start(1);
    }

    let Invocation { id, fn_path, .. } = invocation.clone();
    if let Err(err) = inner.emit(&Message::call(invocation)) {
        let completion = inner.state().registry.abandon(id);
        if let Some(completion) = completion {
            notify_completion(&inner, completion);
        }
        return Err(err);
    }

    let settled = match inner.config.call_timeout {
        None => settled.await,
        Some(limit) => match tokio::time::timeout(limit, settled).await {
            Ok(settled) => settled,
            Err(_) => {
                debug!("Abandoning invocation {} of {} after {:?}", id, fn_path, limit);
                let completion = inner.state().registry.abandon(id);
                if let Some(completion) = completion {
                    notify_completion(&inner, completion);
                }
                return Err(RpcError::Timeout { fn_path, after: limit });
            }
        },
    };

    settled.unwrap_or(Err(RpcError::ConnectionClosed))
}

/// Settle the deferred for a `resolve` or `reject` from the peer.
pub(crate) fn handle_reply(inner: &PeerInner, id: u64, outcome: Result<Value>) {
    let settled = inner.state().registry.settle(id, outcome);
    match settled {
        Ok(completion) => notify_completion(inner, completion),
        Err(violation) => inner.report(violation),
    }
}

fn notify_completion(inner: &PeerInner, completion: Completion) {
    inner.observer.on_response(completion.completed);
    if completion.batch_ended {
        inner.observer.on_batch_end(completion.completed);
    }
}
