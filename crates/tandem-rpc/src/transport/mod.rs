//! Transport boundary.
//!
//! A transport only has to deliver [`Message`]s to the peer ([`Transport::emit`])
//! and feed what it observes back as [`TransportEvent`]s, in order, to
//! [`RpcPeer::handle_event`](crate::RpcPeer::handle_event) or
//! [`RpcPeer::run`](crate::RpcPeer::run). Connection establishment and
//! reconnection timing stay with the transport.
//!
//! Two transports ship with the crate:
//!
//! - [`ChannelTransport`]: in-process, backed by an unbounded tokio channel
//! - [`framed::FramedTransport`]: length-prefixed JSON over any async byte stream

pub mod framed;

use crate::error::{Result, RpcError};
use crate::lifecycle::ConnectionId;
use crate::protocol::Message;
use tokio::sync::mpsc;

/// Outbound half of a connection.
pub trait Transport: Send + Sync + 'static {
    /// Queue a message for delivery to the peer. Must not block.
    fn emit(&self, message: &Message) -> Result<()>;
}

/// Everything a transport reports about one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect(ConnectionId),
    Reconnect(ConnectionId),
    Disconnect { reason: String },
    /// The transport could not (re)establish the connection.
    ConnectError { reason: String },
    Message(Message),
}

/// In-process transport: emitted messages land on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    /// Create a transport and the receiver that sees everything it emits.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn emit(&self, message: &Message) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| RpcError::Transport {
                message: "channel receiver dropped".to_string(),
            })
    }
}
