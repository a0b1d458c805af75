use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ripple_backbone::Backbone;
use ripple_types::ChatEvent;

use crate::broadcaster::FanOutBroadcaster;
use crate::registry::ConnectionRegistry;

/// Outbound payloads buffered per connection. A client that cannot drain
/// this many is dropped by the registry instead of growing memory without
/// bound.
const OUTBOUND_QUEUE: usize = 256;

/// Handle one WebSocket connection for its whole lifecycle:
/// Connecting → Open (registered, relaying frames) → Closing (unregister,
/// release the outbound queue) → Closed.
///
/// Inbound frames are validated, then published verbatim to the backbone;
/// nothing is delivered to local connections directly. There is no
/// application-level ack — transport delivery is the only confirmation.
pub async fn handle_socket<B: Backbone>(
    socket: WebSocket,
    broadcaster: FanOutBroadcaster<B>,
    registry: ConnectionRegistry,
) {
    let (mut sink, mut stream) = socket.split();
    debug!("session connecting");

    let (tx, mut rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    let token = registry.register(tx).await;
    info!("connection {} open", token);

    // The single serialized send path for this connection: drain the
    // outbound queue into the socket until either side goes away.
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let text = String::from_utf8_lossy(&payload).into_owned();
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    match ChatEvent::parse(&text) {
                        Ok(event) => {
                            let raw = Bytes::from(text.as_bytes().to_vec());
                            if let Err(e) = broadcaster.relay_inbound(raw).await {
                                warn!(
                                    "connection {}: dropping {} frame from {}: {}",
                                    token, event.kind, event.sender, e
                                );
                            }
                        }
                        Err(e) => {
                            // dropped, never forwarded
                            let snippet = text.get(..text.len().min(200)).unwrap_or(&text);
                            warn!(
                                "connection {}: malformed frame: {} -- raw: {}",
                                token, e, snippet
                            );
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either side finishing — read error, client close, or a dropped
    // outbound queue — tears the whole session down.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    debug!("connection {} closing", token);
    registry.unregister(token).await;
    info!("connection {} closed", token);
}
