//! TCP transport for worker connections
//!
//! One persistent connection per worker, one JSON message per line. Each
//! connection gets a reader loop that forwards framed lines to the engine and
//! a writer task that drains the node's outbound queue. The listener stops
//! accepting once the engine is gone.

use std::net::SocketAddr;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use surge_core::{Outbound, SurgeError, SurgeResult};

use crate::codec::{Frame, LineCodec, MAX_LINE_LENGTH};
use crate::engine::EngineEvent;

/// Listener accepting worker connections
pub struct NodeListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_line_length: usize,
}

impl NodeListener {
    /// Bind the worker-facing address
    pub async fn bind(addr: SocketAddr) -> SurgeResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SurgeError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(NodeListener {
            listener,
            local_addr,
            max_line_length: MAX_LINE_LENGTH,
        })
    }

    /// Longest accepted protocol line, in bytes
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the engine goes away
    pub async fn serve(self, events: mpsc::Sender<EngineEvent>) {
        info!(addr = %self.local_addr, "listening for worker nodes");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            events.clone(),
                            self.max_line_length,
                        ));
                    }
                    Err(e) => {
                        warn!("accept error: {}", e);
                    }
                },
                _ = events.closed() => {
                    warn!(addr = %self.local_addr, "engine stopped, no longer accepting nodes");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::Sender<EngineEvent>,
    max_line_length: usize,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write_half, outbound_rx, peer));

    let (reply_tx, reply_rx) = oneshot::channel();
    let connected = EngineEvent::Connected {
        sink: Box::new(outbound_tx),
        reply: reply_tx,
    };
    if events.send(connected).await.is_err() {
        return;
    }
    let Ok(node) = reply_rx.await else {
        return;
    };
    debug!(node = %node, peer = %peer, "connection bound to node");

    let mut frames = FramedRead::new(read_half, LineCodec::new(max_line_length));
    while let Some(frame) = frames.next().await {
        let event = match frame {
            Ok(Frame::Line(line)) if line.is_empty() => continue,
            Ok(Frame::Line(line)) => EngineEvent::Message { node, line },
            Ok(Frame::Oversized) => EngineEvent::Oversized { node },
            Err(e) => {
                debug!(node = %node, "read error: {}", e);
                break;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }

    let _ = events.send(EngineEvent::Disconnected { node }).await;
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    peer: SocketAddr,
) {
    while let Some(message) = outbound.recv().await {
        let mut line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(peer = %peer, "failed to encode message: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            // Dropping the receiver makes further sends fail, which the
            // engine treats as a disconnect
            debug!(peer = %peer, "write error: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
