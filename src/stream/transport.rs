//! Socket transport seam
//!
//! The connection manager only sees `StreamTransport`/`StreamConnection`, so
//! reconnect behaviour can be driven by an in-memory transport in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// One inbound unit from an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Text(String),
    /// Transport-level failure; the connection is unusable afterwards
    Error(String),
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn StreamConnection>>;
}

#[async_trait]
pub trait StreamConnection: Send {
    /// Next frame, or `None` once the peer closed the stream.
    async fn recv(&mut self) -> Option<StreamFrame>;

    /// Best-effort close handshake.
    async fn close(&mut self);
}

// =============================================================================
// WEBSOCKET
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn StreamConnection>> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(4 * 1024 * 1024),
            max_frame_size: Some(1024 * 1024),
            accept_unmasked_frames: false,
            ..Default::default()
        };

        let (stream, response) = connect_async_with_config(url, Some(ws_config), false)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        debug!(status = %response.status(), "websocket handshake complete");

        Ok(Box::new(WsConnection { stream }))
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn recv(&mut self) -> Option<StreamFrame> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(StreamFrame::Text(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(StreamFrame::Text(text)),
                    Err(e) => {
                        warn!(error = %e, "dropping non-utf8 binary frame");
                    }
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        return Some(StreamFrame::Error(format!("pong failed: {}", e)));
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "stream closed by server");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(StreamFrame::Error(e.to_string())),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "close handshake failed");
        }
    }
}
