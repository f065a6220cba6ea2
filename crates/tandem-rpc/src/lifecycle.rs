//! Connection lifecycle: reconnecting flag and readiness signal.
//!
//! ```text
//! disconnected -> connecting -> connected -> (disconnected | connected) ...
//! ```
//!
//! The readiness signal settles exactly once: on the first connect, or on a
//! hard connection error if that comes first. Later reconnects only clear the
//! reconnecting flag.

use crate::config::{ProtocolConfig, Role};
use crate::error::{Result, RpcError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

/// Identity of one connection as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone)]
enum InitState {
    Pending,
    Ready(ConnectionId),
    Failed(RpcError),
}

pub(crate) struct Lifecycle {
    role: Role,
    reconnecting: AtomicBool,
    identity: RwLock<Option<ConnectionId>>,
    init: watch::Sender<InitState>,
}

impl Lifecycle {
    /// The acceptor is ready at construction; the initiator waits for its
    /// first connect.
    pub fn new(role: Role, identity: Option<ConnectionId>) -> Self {
        let (identity, state) = match role {
            Role::Acceptor => {
                let id = identity.unwrap_or_else(ConnectionId::generate);
                (Some(id.clone()), InitState::Ready(id))
            }
            Role::Initiator => (None, InitState::Pending),
        };
        let (init, _) = watch::channel(state);
        Self {
            role,
            reconnecting: AtomicBool::new(false),
            identity: RwLock::new(identity),
            init,
        }
    }

    /// Handle `connect` and `reconnect`. Returns true if this settled the
    /// readiness signal.
    pub fn on_connect(&self, id: ConnectionId) -> bool {
        self.reconnecting.store(false, Ordering::SeqCst);
        if let Ok(mut identity) = self.identity.write() {
            *identity = Some(id.clone());
        }
        let initialized = self.init.send_if_modified(|state| match state {
            InitState::Pending => {
                *state = InitState::Ready(id.clone());
                true
            }
            _ => false,
        });
        if initialized {
            info!("{} connection {} initialized", self.role, id);
        } else {
            debug!("{} connection {} (re)connected", self.role, id);
        }
        initialized
    }

    pub fn on_disconnect(&self) {
        self.reconnecting.store(true, Ordering::SeqCst);
        info!("{} connection {} disconnected", self.role, self.label());
    }

    /// Handle a hard connection error. Returns true if the connection had
    /// never initialized, in which case readiness has now failed for good.
    pub fn on_connect_error(&self, reason: &str) -> bool {
        let failed = self.init.send_if_modified(|state| match state {
            InitState::Pending => {
                *state = InitState::Failed(RpcError::ConnectionFailed {
                    reason: reason.to_string(),
                });
                true
            }
            _ => false,
        });
        debug!("{} connect error ({}): {}", self.role, self.label(), reason);
        failed
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.init.borrow(), InitState::Ready(_))
    }

    pub fn identity(&self) -> Option<ConnectionId> {
        self.identity.read().ok().and_then(|id| id.clone())
    }

    /// Identity for messages and logs.
    pub fn label(&self) -> String {
        self.identity()
            .map(|id| id.to_string())
            .unwrap_or_else(|| ProtocolConfig::UNKNOWN_CONNECTION.to_string())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// A waiter that does not keep the lifecycle alive.
    pub fn initialized(&self) -> InitWaiter {
        InitWaiter(self.init.subscribe())
    }
}

/// Waits for the readiness signal to settle.
pub(crate) struct InitWaiter(watch::Receiver<InitState>);

impl InitWaiter {
    pub async fn wait(mut self) -> Result<ConnectionId> {
        let state = self
            .0
            .wait_for(|state| !matches!(state, InitState::Pending))
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;
        match &*state {
            InitState::Ready(id) => Ok(id.clone()),
            InitState::Failed(err) => Err(err.clone()),
            InitState::Pending => Err(RpcError::ConnectionClosed),
        }
    }
}
