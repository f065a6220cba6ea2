//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tandem_rpc::{
    ChannelTransport, ErrorPayload, Invocation, Message, ProtocolViolation, RpcObserver, RpcPeer,
    RpcPeerBuilder, TransportEvent,
};
use tokio::sync::mpsc;

/// Install a log subscriber once. Set `RUST_LOG=tandem_rpc=debug` to see protocol traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Observer that records every hook as a line of text.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Batch and response hooks only, in order.
    pub fn batch_events(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("batch_") || e.starts_with("response"))
            .collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("violation"))
            .collect()
    }
}

impl RpcObserver for Recorder {
    fn on_batch_start(&self, count: u64) {
        self.push(format!("batch_start {}", count));
    }

    fn on_batch_end(&self, count: u64) {
        self.push(format!("batch_end {}", count));
    }

    fn on_calling(&self, invocation: &Invocation) {
        self.push(format!("calling {} {}", invocation.id, invocation.fn_path));
    }

    fn on_dispatched(&self, invocation: &Invocation, reply: &Message) {
        self.push(format!("dispatched {} {}", invocation.id, reply.kind()));
    }

    fn on_response(&self, completed: u64) {
        self.push(format!("response {}", completed));
    }

    fn on_handler_error(&self, fn_path: &str, error: &ErrorPayload) {
        self.push(format!("handler_error {}: {}", fn_path, error.message));
    }

    fn on_protocol_violation(&self, violation: &ProtocolViolation) {
        self.push(format!("violation {}", violation));
    }
}

/// A peer whose outgoing messages are captured for inspection.
pub fn wire(builder: RpcPeerBuilder) -> (RpcPeer, mpsc::UnboundedReceiver<Message>) {
    let (transport, outbound) = ChannelTransport::new();
    (builder.build(transport), outbound)
}

/// Next outgoing `call`, validated.
pub async fn next_call(outbound: &mut mpsc::UnboundedReceiver<Message>) -> Invocation {
    match outbound.recv().await {
        Some(Message::Call(call)) => call.into_invocation().expect("call should carry a valid id"),
        other => panic!("Expected Call, got {:?}", other),
    }
}

pub fn deliver(peer: &RpcPeer, message: Message) {
    peer.handle_event(TransportEvent::Message(message));
}

/// Two peers wired back to back over in-process channels.
///
/// The server is the acceptor `srv-1`; the client has connected as `cli-1`.
pub struct Pair {
    pub client: RpcPeer,
    pub server: RpcPeer,
}

pub fn pair(client: RpcPeerBuilder, server: RpcPeerBuilder) -> Pair {
    let (client, client_out) = wire(client);
    let (server, server_out) = wire(server.acceptor("srv-1"));

    tokio::spawn(pump(client_out, server.clone()));
    tokio::spawn(pump(server_out, client.clone()));
    client.handle_event(TransportEvent::Connect("cli-1".into()));

    Pair { client, server }
}

async fn pump(mut outbound: mpsc::UnboundedReceiver<Message>, to: RpcPeer) {
    while let Some(message) = outbound.recv().await {
        to.handle_event(TransportEvent::Message(message));
    }
}
