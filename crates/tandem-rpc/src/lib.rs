//! Tandem RPC - Bidirectional RPC over a single message connection.
//!
//! Both endpoints of a connection expose a tree of named functions and may
//! call each other's functions at any time. Each side discovers the other's
//! tree on demand and gets back a tree of proxies that forward calls over the
//! connection and return the peer's result.
//!
//! The crate does not open connections. A [`Transport`] delivers outgoing
//! [`Message`]s, and whatever the transport observes is fed back in as
//! [`TransportEvent`]s. [`ChannelTransport`] works in-process, and
//! [`transport::framed`] speaks length-prefixed JSON over any async byte stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tandem_rpc::{transport::framed, FunctionTree, LocalFunction, RpcPeer};
//!
//! #[tokio::main]
//! async fn main() -> tandem_rpc::Result<()> {
//!     let (near, far) = tokio::io::duplex(64 * 1024);
//!
//!     let math = FunctionTree::node().with(
//!         "add",
//!         LocalFunction::new(|args| {
//!             let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
//!             Ok(json!(sum))
//!         })
//!         .with_arity(2),
//!     );
//!     let (transport, events) = framed::attach(far, "srv-1".into());
//!     let server = RpcPeer::builder(FunctionTree::node().with("math", math))
//!         .acceptor("srv-1")
//!         .build(transport);
//!     tokio::spawn(async move { server.run(events).await });
//!
//!     let (transport, events) = framed::attach(near, "cli-1".into());
//!     let client = RpcPeer::builder(FunctionTree::node()).build(transport);
//!     let driver = client.clone();
//!     tokio::spawn(async move { driver.run(events).await });
//!
//!     let remote = client.fetch_node("math").await?;
//!     assert_eq!(remote.call("add", vec![json!(2), json!(3)]).await?, json!(5));
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod config;
pub mod error;
pub mod function;
pub mod lifecycle;
pub mod observer;
pub mod peer;
pub mod protocol;
pub mod proxy;
pub mod transport;
pub mod tree;

mod discovery;
mod dispatch;
mod registry;

// Re-export commonly used types
pub use boundary::{ErrorBoundary, ErrorPayload, RemoteError};
pub use config::{ProtocolConfig, Role, RpcConfig};
pub use error::{ProtocolViolation, Result, RpcError};
pub use function::{FunctionTree, LocalFunction, Outcome};
pub use lifecycle::ConnectionId;
pub use observer::{NoopObserver, RpcObserver};
pub use peer::{RpcPeer, RpcPeerBuilder};
pub use protocol::{Invocation, LeafMarker, Message, Shape};
pub use proxy::{RemoteFunction, RemoteTree};
pub use transport::{ChannelTransport, Transport, TransportEvent};
pub use tree::Tree;
