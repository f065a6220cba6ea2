//! Discovery of the peer's function tree.
//!
//! ```text
//! fetch_node("math")                      peer
//!   wait for readiness
//!   fetchNode {path: "math"}  ------->    resolve "math" locally
//!                             <-------    node {path: "math", tree: {add: 2}}
//!   build proxies: {add -> RemoteFunction("math.add")}
//! ```
//!
//! Requests are cached per path. Concurrent callers share the in-flight
//! request and later callers get the resolved tree without another exchange.
//! Failed requests are evicted so they can be retried.

use crate::error::{ProtocolViolation, Result, RpcError};
use crate::lifecycle::InitWaiter;
use crate::peer::PeerInner;
use crate::protocol::{LeafMarker, Message, NodePayload};
use crate::proxy::{self, RemoteTree};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type NodeResult = Result<Arc<RemoteTree>>;
type NodeFuture = Shared<BoxFuture<'static, NodeResult>>;

struct NodeEntry {
    future: NodeFuture,
    /// Present until the request settles.
    reply: Option<oneshot::Sender<NodeResult>>,
    /// The `fetchNode` message went out.
    requested: bool,
}

/// Discovery requests of one connection, keyed by path.
#[derive(Default)]
pub(crate) struct NodeCache {
    entries: HashMap<String, NodeEntry>,
}

impl NodeCache {
    fn get(&self, path: &str) -> Option<NodeFuture> {
        self.entries.get(path).map(|entry| entry.future.clone())
    }

    fn insert(&mut self, path: String, future: NodeFuture, reply: oneshot::Sender<NodeResult>) {
        self.entries.insert(
            path,
            NodeEntry {
                future,
                reply: Some(reply),
                requested: false,
            },
        );
    }

    fn mark_requested(&mut self, path: &str) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.requested = true;
        }
    }

    /// Take the reply handle of a request that is on the wire.
    ///
    /// Successful requests stay cached; failed ones are evicted.
    fn settle(&mut self, path: &str, success: bool) -> Option<oneshot::Sender<NodeResult>> {
        let entry = self.entries.get_mut(path)?;
        if !entry.requested {
            return None;
        }
        let reply = entry.reply.take()?;
        if !success {
            self.entries.remove(path);
        }
        Some(reply)
    }

    fn evict(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Evict every unsettled request and hand back their reply handles.
    fn drain_unsettled(&mut self) -> Vec<oneshot::Sender<NodeResult>> {
        let unsettled: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.reply.is_some())
            .map(|(path, _)| path.clone())
            .collect();
        unsettled
            .into_iter()
            .filter_map(|path| self.entries.remove(&path).and_then(|entry| entry.reply))
            .collect()
    }

    #[cfg(test)]
    fn is_resolved(&self, path: &str) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| entry.reply.is_none())
    }
}

/// Discover the peer's subtree at `path`.
pub(crate) async fn fetch_node(inner: &Arc<PeerInner>, path: &str) -> NodeResult {
    let future = {
        let mut state = inner.state();
        match state.nodes.get(path) {
            Some(future) => {
                debug!("fetchNode {:?} joins an existing request", path);
                future
            }
            None => {
                debug!("fetchNode {:?}", path);
                let (reply, settled) = oneshot::channel();
                let future = request_node(
                    Arc::downgrade(inner),
                    inner.lifecycle.initialized(),
                    path.to_string(),
                    settled,
                )
                .boxed()
                .shared();
                state.nodes.insert(path.to_string(), future.clone(), reply);
                future
            }
        }
    };
    future.await
}

async fn request_node(
    peer: Weak<PeerInner>,
    initialized: InitWaiter,
    path: String,
    settled: oneshot::Receiver<NodeResult>,
) -> NodeResult {
    if let Err(err) = initialized.wait().await {
        if let Some(inner) = peer.upgrade() {
            inner.state().nodes.evict(&path);
        }
        return Err(err);
    }

    {
        let inner = peer.upgrade().ok_or(RpcError::ConnectionClosed)?;
        inner.state().nodes.mark_requested(&path);
        if let Err(err) = inner.emit(&Message::fetch_node(path.clone())) {
            inner.state().nodes.evict(&path);
            return Err(err);
        }
    }

    settled.await.unwrap_or(Err(RpcError::ConnectionClosed))
}

/// Answer the peer's `fetchNode` from the local tree.
pub(crate) fn handle_fetch_node(inner: &PeerInner, path: String) {
    let reply = match inner.local.get(&path) {
        Some(subtree) => {
            let shape = subtree.map_leaves(&path, &mut |_, function| LeafMarker {
                arity: function.arity(),
            });
            debug!(
                "{} requested node {:?}, sending {} leaves",
                inner.lifecycle.label(),
                path,
                shape.leaf_paths().len()
            );
            Message::node(path, shape)
        }
        None => {
            debug!("node {:?} requested by {} not found", path, inner.lifecycle.label());
            Message::no_such_node(path)
        }
    };
    if let Err(e) = inner.emit(&reply) {
        warn!("Failed to answer fetchNode: {}", e);
    }
}

/// Turn an announced shape into proxies and settle the matching request.
pub(crate) fn handle_node(inner: &Arc<PeerInner>, announced: NodePayload) {
    let NodePayload { path, tree } = announced;
    let reply = inner.state().nodes.settle(&path, true);
    let Some(reply) = reply else {
        inner.report(ProtocolViolation::UnrequestedNode { path });
        return;
    };

    let remote = tree.map_leaves(&path, &mut |full_path, marker| {
        proxy::prepare_remote_call(inner, full_path.to_string(), marker.arity)
    });
    let _ = reply.send(Ok(Arc::new(remote)));
}

/// Fail the matching request: the peer has nothing at `path`.
pub(crate) fn handle_no_such_node(inner: &PeerInner, path: String) {
    let reply = inner.state().nodes.settle(&path, false);
    let Some(reply) = reply else {
        inner.report(ProtocolViolation::UnrequestedNoSuchNode { path });
        return;
    };
    let _ = reply.send(Err(RpcError::NoSuchNode {
        connection: inner.lifecycle.label(),
        path,
    }));
}

/// Fail every discovery request that has not settled yet.
pub(crate) fn fail_pending(inner: &PeerInner, err: RpcError) {
    let replies = inner.state().nodes.drain_unsettled();
    if !replies.is_empty() {
        debug!("Failing {} pending discovery requests: {}", replies.len(), err);
    }
    for reply in replies {
        let _ = reply.send(Err(err.clone()));
    }
}
