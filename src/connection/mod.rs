// src/connection/mod.rs

//! Per-connection frame loop. One task per accepted socket, reading frames,
//! dispatching them, and writing back whatever reply dispatch produces —
//! the same loop serves both the client channel and the cluster channel,
//! since a `Message` carries its own opcode and dispatch already routes on
//! it.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::core::cluster::state::NodeState;
use crate::core::dispatch::dispatch;
use crate::core::protocol::{FrameCodec, Message, WireFrame};

/// Drives one accepted socket until it errs, its peer closes, or shutdown
/// fires. `label` is purely for logging ("client" vs "cluster").
pub async fn run(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    node: Arc<Mutex<NodeState>>,
    label: &'static str,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(%peer, error = %e, "failed to set TCP_NODELAY");
    }

    let mut framed = Framed::new(stream, FrameCodec);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!(%peer, channel = label, "connection closing on shutdown");
                return;
            }
            frame = framed.next() => {
                let Some(frame) = frame else {
                    debug!(%peer, channel = label, "peer closed connection");
                    return;
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(%peer, channel = label, error = %e, "protocol error, closing connection");
                        return;
                    }
                };

                let message = match Message::try_from(frame) {
                    Ok(message) => message,
                    Err(e) if e.is_transport_failure() => {
                        warn!(%peer, channel = label, error = %e, "transport-level protocol error, closing connection");
                        return;
                    }
                    Err(e) => {
                        let reply: WireFrame = Message::ErrorResponse { text: e.message() }.into();
                        let _ = framed.send(reply).await;
                        continue;
                    }
                };

                if let Some(reply) = dispatch(&node, message).await {
                    if let Err(e) = framed.send(reply.into()).await {
                        warn!(%peer, channel = label, error = %e, "failed to write reply, closing connection");
                        return;
                    }
                }
            }
        }
    }
}
