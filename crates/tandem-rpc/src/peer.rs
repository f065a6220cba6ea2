//! Per-connection RPC context.
//!
//! An [`RpcPeer`] owns everything one connection needs: the local function
//! tree, the deferred registry and batch counters, the discovery cache and the
//! lifecycle flags. Nothing is shared between peers.
//!
//! Inbound traffic enters through [`RpcPeer::handle_event`], one event at a
//! time, normally driven by [`RpcPeer::run`]. Mutable state sits behind a
//! mutex scoped to this connection, and observer hooks are always invoked
//! after that lock is released.

use crate::boundary::ErrorBoundary;
use crate::config::{Role, RpcConfig};
use crate::discovery::{self, NodeCache};
use crate::dispatch;
use crate::error::{ProtocolViolation, Result, RpcError};
use crate::function::FunctionTree;
use crate::lifecycle::{ConnectionId, Lifecycle};
use crate::observer::{NoopObserver, RpcObserver};
use crate::protocol::Message;
use crate::proxy::{self, RemoteFunction, RemoteTree};
use crate::registry::DeferredRegistry;
use crate::transport::{Transport, TransportEvent};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Mutable protocol state of one connection.
#[derive(Default)]
pub(crate) struct PeerState {
    pub(crate) registry: DeferredRegistry,
    pub(crate) nodes: NodeCache,
}

pub(crate) struct PeerInner {
    pub(crate) config: RpcConfig,
    pub(crate) boundary: ErrorBoundary,
    pub(crate) local: Arc<FunctionTree>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) observer: Arc<dyn RpcObserver>,
    pub(crate) lifecycle: Lifecycle,
    state: Mutex<PeerState>,
}

impl PeerInner {
    /// Lock the connection state. Never hold the guard across an await or
    /// while calling the observer.
    pub(crate) fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, message: &Message) -> Result<()> {
        debug!("{} -> {}", self.lifecycle.label(), message.kind());
        self.transport.emit(message)
    }

    pub(crate) fn report(&self, violation: ProtocolViolation) {
        warn!("Protocol violation on {}: {}", self.lifecycle.label(), violation);
        self.observer.on_protocol_violation(&violation);
    }
}

/// One endpoint of a bidirectional RPC connection.
///
/// Cloning is cheap and every clone drives the same connection.
///
/// # Example
///
/// ```rust,ignore
/// use tandem_rpc::{FunctionTree, LocalFunction, RpcPeer, ChannelTransport};
///
/// let tree = FunctionTree::node().with(
///     "math",
///     FunctionTree::node().with("add", LocalFunction::new(|args| {
///         Ok(args.iter().filter_map(|v| v.as_i64()).sum::<i64>().into())
///     })),
/// );
/// let (transport, outbound) = ChannelTransport::new();
/// let peer = RpcPeer::builder(tree).acceptor("srv-1").build(transport);
/// ```
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

impl RpcPeer {
    pub fn builder(tree: FunctionTree) -> RpcPeerBuilder {
        RpcPeerBuilder::new(tree)
    }

    /// Build a callable stand-in for the peer's function at `fn_path`.
    pub fn prepare_remote_call(&self, fn_path: impl Into<String>) -> RemoteFunction {
        proxy::prepare_remote_call(&self.inner, fn_path.into(), None)
    }

    /// Call the peer's function at `fn_path` without discovering it first.
    pub async fn call(&self, fn_path: impl Into<String>, args: Vec<Value>) -> Result<Value> {
        proxy::invoke(Arc::clone(&self.inner), fn_path.into(), args).await
    }

    /// Discover the peer's subtree at `path` (the whole tree for `""`).
    ///
    /// Concurrent requests for one path share a single exchange, and a
    /// resolved tree is served from cache afterwards.
    pub async fn fetch_node(&self, path: &str) -> Result<Arc<RemoteTree>> {
        discovery::fetch_node(&self.inner, path).await
    }

    /// Feed one transport event into the connection.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connect(id) | TransportEvent::Reconnect(id) => {
                self.inner.lifecycle.on_connect(id);
            }
            TransportEvent::Disconnect { reason } => {
                debug!("{} disconnect: {}", self.inner.lifecycle.label(), reason);
                self.inner.lifecycle.on_disconnect();
            }
            TransportEvent::ConnectError { reason } => {
                if self.inner.lifecycle.on_connect_error(&reason) {
                    discovery::fail_pending(&self.inner, RpcError::ConnectionFailed { reason });
                }
            }
            TransportEvent::Message(message) => self.handle_message(message),
        }
    }

    fn handle_message(&self, message: Message) {
        debug!("{} <- {}", self.inner.lifecycle.label(), message.kind());
        match message {
            Message::Call(call) => dispatch::handle_call(&self.inner, call),
            Message::Resolve(reply) => proxy::handle_reply(&self.inner, reply.id, Ok(reply.value)),
            Message::Reject(reply) => {
                let error = ErrorBoundary::decode(reply.error);
                proxy::handle_reply(&self.inner, reply.id, Err(RpcError::Remote(error)));
            }
            Message::FetchNode(request) => discovery::handle_fetch_node(&self.inner, request.path),
            Message::Node(announced) => discovery::handle_node(&self.inner, announced),
            Message::NoSuchNode(missing) => discovery::handle_no_such_node(&self.inner, missing.path),
            Message::RpcError(refusal) => self.inner.report(ProtocolViolation::RejectedByPeer {
                reason: refusal.reason,
            }),
        }
    }

    /// Drive the connection from a stream of transport events until it ends.
    pub async fn run<S>(&self, mut events: S)
    where
        S: Stream<Item = TransportEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
        debug!("Event stream for {} ended", self.inner.lifecycle.label());
    }

    /// Wait until the connection identity is known.
    pub async fn initialized(&self) -> Result<ConnectionId> {
        self.inner.lifecycle.initialized().wait().await
    }

    /// Whether the connection identity is known.
    pub fn is_initialized(&self) -> bool {
        self.inner.lifecycle.is_initialized()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.lifecycle.is_reconnecting()
    }

    pub fn identity(&self) -> Option<ConnectionId> {
        self.inner.lifecycle.identity()
    }

    pub fn role(&self) -> Role {
        self.inner.lifecycle.role()
    }

    /// Calls sent to the peer and not yet settled.
    pub fn outstanding_calls(&self) -> usize {
        self.inner.state().registry.outstanding()
    }

    pub fn local_tree(&self) -> &FunctionTree {
        &self.inner.local
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("identity", &self.inner.lifecycle.label())
            .field("role", &self.inner.lifecycle.role())
            .field("reconnecting", &self.inner.lifecycle.is_reconnecting())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring an [`RpcPeer`].
///
/// # Example
///
/// ```rust,ignore
/// let peer = RpcPeer::builder(tree)
///     .role(Role::Initiator)
///     .include_stack_trace(cfg!(debug_assertions))
///     .call_timeout(Duration::from_secs(30))
///     .observer(MyObserver::default())
///     .build(transport);
/// ```
pub struct RpcPeerBuilder {
    tree: FunctionTree,
    config: RpcConfig,
    identity: Option<ConnectionId>,
    observer: Arc<dyn RpcObserver>,
}

impl RpcPeerBuilder {
    pub fn new(tree: FunctionTree) -> Self {
        Self {
            tree,
            config: RpcConfig::default(),
            identity: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Replace all options at once.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: `Role::Initiator`
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Act as the accepting side with a known connection identity.
    pub fn acceptor(mut self, identity: impl Into<ConnectionId>) -> Self {
        self.config.role = Role::Acceptor;
        self.identity = Some(identity.into());
        self
    }

    /// Default: `false`
    pub fn include_stack_trace(mut self, enable: bool) -> Self {
        self.config.include_stack_trace = enable;
        self
    }

    /// Default: no timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    pub fn observer(mut self, observer: impl RpcObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn build(self, transport: impl Transport) -> RpcPeer {
        if self.config.role == Role::Initiator && self.identity.is_some() {
            debug!("Ignoring preset identity for initiator; it is learned on connect");
        }
        let lifecycle = Lifecycle::new(self.config.role, self.identity);
        RpcPeer {
            inner: Arc::new(PeerInner {
                boundary: ErrorBoundary::new(self.config.include_stack_trace),
                config: self.config,
                local: Arc::new(self.tree),
                transport: Arc::new(transport),
                observer: self.observer,
                lifecycle,
                state: Mutex::new(PeerState::default()),
            }),
        }
    }
}
