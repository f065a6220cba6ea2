//! Wire messages and framing.
//!
//! Every message is a self-describing JSON object:
//!
//! ```text
//! {"type": "call",       "payload": {"id": 1, "fnPath": "math.add", "args": [2, 3]}}
//! {"type": "resolve",    "payload": {"id": 1, "value": 5}}
//! {"type": "reject",     "payload": {"id": 1, "error": {"message": "..."}}}
//! {"type": "fetchNode",  "payload": {"path": "math"}}
//! {"type": "node",       "payload": {"path": "math", "tree": {"add": 2}}}
//! {"type": "noSuchNode", "payload": {"path": "math"}}
//! {"type": "rpcError",   "payload": {"reason": "..."}}
//! ```
//!
//! Stream transports carry messages in length-prefixed frames:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::boundary::ErrorPayload;
use crate::config::ProtocolConfig;
use crate::error::{Result, RpcError};
use crate::tree::Tree;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Leaf of an announced shape: callables are not transmissible, so only the
/// declared argument count (if any) crosses the wire.
///
/// Any leaf value that is not a non-negative integer reads as "no declared
/// arity", so peers may announce leaves with whatever marker they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LeafMarker {
    pub arity: Option<usize>,
}

impl<'de> Deserialize<'de> for LeafMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let marker = Value::deserialize(deserializer)?;
        Ok(LeafMarker {
            arity: marker.as_u64().and_then(|n| usize::try_from(n).ok()),
        })
    }
}

/// Announced shape of a function tree.
pub type Shape = Tree<LeafMarker>;

/// One outgoing remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub id: u64,
    pub fn_path: String,
    pub args: Vec<Value>,
}

/// Payload of an inbound or outbound `call`.
///
/// The id is kept raw so a malformed id can be detected and refused instead of
/// failing the whole message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    #[serde(default, alias = "Id")]
    pub id: Value,
    #[serde(default)]
    pub fn_path: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallPayload {
    /// Validate the id. Only positive integers are accepted.
    pub fn into_invocation(self) -> Option<Invocation> {
        let id = self.id.as_u64().filter(|id| *id > 0)?;
        Some(Invocation {
            id,
            fn_path: self.fn_path,
            args: self.args,
        })
    }
}

impl From<Invocation> for CallPayload {
    fn from(invocation: Invocation) -> Self {
        Self {
            id: Value::from(invocation.id),
            fn_path: invocation.fn_path,
            args: invocation.args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvePayload {
    #[serde(alias = "Id")]
    pub id: u64,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectPayload {
    #[serde(alias = "Id")]
    pub id: u64,
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPayload {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    #[serde(default)]
    pub path: String,
    pub tree: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    pub reason: String,
}

/// Every message exchanged between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Message {
    Call(CallPayload),
    Resolve(ResolvePayload),
    Reject(RejectPayload),
    FetchNode(PathPayload),
    Node(NodePayload),
    NoSuchNode(PathPayload),
    RpcError(RpcErrorPayload),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call(_) => "call",
            Message::Resolve(_) => "resolve",
            Message::Reject(_) => "reject",
            Message::FetchNode(_) => "fetchNode",
            Message::Node(_) => "node",
            Message::NoSuchNode(_) => "noSuchNode",
            Message::RpcError(_) => "rpcError",
        }
    }

    pub fn call(invocation: Invocation) -> Self {
        Message::Call(invocation.into())
    }

    pub fn resolve(id: u64, value: Value) -> Self {
        Message::Resolve(ResolvePayload { id, value })
    }

    pub fn reject(id: u64, error: ErrorPayload) -> Self {
        Message::Reject(RejectPayload { id, error })
    }

    pub fn fetch_node(path: impl Into<String>) -> Self {
        Message::FetchNode(PathPayload { path: path.into() })
    }

    pub fn node(path: impl Into<String>, tree: Shape) -> Self {
        Message::Node(NodePayload {
            path: path.into(),
            tree,
        })
    }

    pub fn no_such_node(path: impl Into<String>) -> Self {
        Message::NoSuchNode(PathPayload { path: path.into() })
    }

    pub fn rpc_error(reason: impl Into<String>) -> Self {
        Message::RpcError(RpcErrorPayload {
            reason: reason.into(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Read one frame. A stream that ends before a new length prefix is a clean
/// close and yields `None`; one that ends inside a payload is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    check_frame_size(len)?;

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one frame and flush it. Oversized frames are refused before anything
/// is written.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    check_frame_size(frame.len())?;
    writer.write_u32(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

fn check_frame_size(size: usize) -> Result<()> {
    if size > ProtocolConfig::MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge {
            size,
            max: ProtocolConfig::MAX_FRAME_SIZE,
        });
    }
    Ok(())
}
