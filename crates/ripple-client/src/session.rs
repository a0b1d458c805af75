use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use ripple_types::ChatEvent;

use crate::reconciler::{ChatMessage, StreamReconciler};

/// The session's transport failed or the gateway went away.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// One live client session against a gateway.
///
/// Connecting commits the join (a `join` event is published immediately);
/// [`close`](ClientSession::close) sends a best-effort `leave`. Outgoing
/// messages are not appended locally — they land in history when the
/// gateway echoes them back, which is also the only confirmation the
/// backbone relayed them at all.
pub struct ClientSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    reconciler: StreamReconciler,
    display_name: String,
    joined_at: DateTime<Utc>,
}

impl ClientSession {
    pub async fn connect(url: &str, display_name: &str) -> Result<Self, SessionError> {
        let (ws, _) = connect_async(url).await?;
        debug!("{} connected to {}", display_name, url);

        let mut session = Self {
            ws,
            reconciler: StreamReconciler::new(display_name),
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
        };
        let join = ChatEvent::join(display_name);
        session.send_event(join).await?;
        Ok(session)
    }

    pub async fn send_event(&mut self, event: ChatEvent) -> Result<(), SessionError> {
        self.ws.send(Message::text(event.to_json())).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, body: &str) -> Result<(), SessionError> {
        let event = ChatEvent::text(&self.display_name, body);
        self.send_event(event).await
    }

    pub async fn send_typing(&mut self) -> Result<(), SessionError> {
        let event = ChatEvent::typing(&self.display_name);
        self.send_event(event).await
    }

    pub async fn send_audio(&mut self, url: &str) -> Result<(), SessionError> {
        let event = ChatEvent::audio(&self.display_name, url);
        self.send_event(event).await
    }

    pub async fn send_file(
        &mut self,
        url: &str,
        name: Option<&str>,
        mime: Option<&str>,
    ) -> Result<(), SessionError> {
        let event = ChatEvent::file(&self.display_name, url, name, mime);
        self.send_event(event).await
    }

    /// Wait for the next state change: an inbound frame folded in, or a
    /// typing indicator expiring. Returns false once the gateway closes the
    /// stream.
    pub async fn next_update(&mut self) -> Result<bool, SessionError> {
        loop {
            let deadline = self.reconciler.presence().next_typing_deadline();
            tokio::select! {
                frame = self.ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.reconciler.handle_frame(&text);
                            return Ok(true);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.reconciler.handle_frame(text),
                                Err(_) => warn!("dropping non-utf8 binary frame"),
                            }
                            return Ok(true);
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(false),
                        Some(Ok(_)) => continue, // ping/pong
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
                _ = async { tokio::time::sleep_until(deadline.unwrap()).await },
                        if deadline.is_some() => {
                    self.reconciler.expire_typing();
                    return Ok(true);
                }
            }
        }
    }

    /// Best-effort leave, then close the socket. Failures are swallowed:
    /// teardown must succeed even when the gateway is already gone.
    pub async fn close(mut self) {
        let leave = ChatEvent::leave(&self.display_name);
        if let Err(e) = self.send_event(leave).await {
            debug!("leave not delivered: {}", e);
        }
        let _ = self.ws.close(None).await;
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    pub fn history(&self) -> &[ChatMessage] {
        self.reconciler.history()
    }

    pub fn online_names(&self) -> &[String] {
        self.reconciler.online_names()
    }

    pub fn is_typing(&self, name: &str) -> bool {
        self.reconciler.is_typing(name)
    }

    pub fn reconciler(&self) -> &StreamReconciler {
        &self.reconciler
    }
}
