//! Length-prefixed JSON transport over an async byte stream.
//!
//! Attaching a stream yields a transport for outgoing messages and a stream of
//! events for the peer's intake loop. Writes go through a background task so
//! `emit` never blocks.
//!
//! ```text
//! events:  Connect(id), Message, Message, ..., Disconnect
//! ```
//!
//! There is no reconnection here: once the byte stream ends the event stream
//! reports `Disconnect` and finishes.

use super::{Transport, TransportEvent};
use crate::error::{Result, RpcError};
use crate::lifecycle::ConnectionId;
use crate::protocol::{read_frame, write_frame, Message};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound half of a framed connection.
#[derive(Debug, Clone)]
pub struct FramedTransport {
    frames: mpsc::UnboundedSender<Vec<u8>>,
}

impl Transport for FramedTransport {
    fn emit(&self, message: &Message) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.frames.send(bytes).map_err(|_| RpcError::Transport {
            message: "stream writer closed".to_string(),
        })
    }
}

/// Attach a byte stream. Must be called from within a tokio runtime.
pub fn attach<S>(
    stream: S,
    identity: ConnectionId,
) -> (FramedTransport, BoxStream<'static, TransportEvent>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (frames, frames_rx) = mpsc::unbounded_channel();
    let transport = FramedTransport { frames };

    tokio::spawn(write_loop(writer, frames_rx, identity.clone()));

    let events = stream::once(async move { TransportEvent::Connect(identity) })
        .chain(read_loop(reader, transport.clone()))
        .boxed();

    (transport, events)
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    identity: ConnectionId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("Framed writer for {} ended: {}", identity, e);
            break;
        }
    }
}

fn read_loop<R>(reader: R, replies: FramedTransport) -> impl futures::Stream<Item = TransportEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(reader), move |reader| {
        let replies = replies.clone();
        async move {
            let mut reader = reader?;
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => match Message::from_bytes(&frame) {
                        Ok(message) => return Some((TransportEvent::Message(message), Some(reader))),
                        Err(e) => {
                            warn!("Dropping malformed frame: {}", e);
                            let reason = format!("Parse error: {}", e);
                            if let Err(e) = replies.emit(&Message::rpc_error(reason)) {
                                debug!("Could not report malformed frame: {}", e);
                            }
                        }
                    },
                    Ok(None) => {
                        let reason = "peer closed the stream".to_string();
                        return Some((TransportEvent::Disconnect { reason }, None));
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        return Some((TransportEvent::Disconnect { reason }, None));
                    }
                }
            }
        }
    })
}
