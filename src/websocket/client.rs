//! WebSocket transport for the public stream
//!
//! [`FeedConnector`] / [`FeedConnection`] abstract the socket so ingestion
//! can run against a scripted transport; [`WebSocketConnector`] is the
//! tungstenite implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{Result, TraderError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frame surfaced to ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Transport-level pong
    Pong,
}

/// One open connection
#[async_trait]
pub trait FeedConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next frame; `None` once the peer has closed the stream
    async fn recv(&mut self) -> Option<Result<Frame>>;

    async fn close(&mut self);
}

/// Opens connections to a stream endpoint
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedConnection>>;
}

/// tungstenite-backed connector
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl FeedConnector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedConnection>> {
        info!(url = %endpoint, "Connecting to Bybit WebSocket");

        let (stream, response) = connect_async(endpoint).await.map_err(|e| {
            TraderError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketClient { stream }))
    }
}

/// A live tungstenite connection
pub struct WebSocketClient {
    stream: WsStream,
}

#[async_trait]
impl FeedConnection for WebSocketClient {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TraderError::WebSocketMessage(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(Frame::Text(String::from_utf8_lossy(&data).to_string())))
                }
                Ok(Message::Ping(data)) => {
                    debug!("Received ping, sending pong");
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(TraderError::WebSocketMessage(e.to_string())));
                    }
                }
                Ok(Message::Pong(_)) => return Some(Ok(Frame::Pong)),
                Ok(Message::Close(frame)) => {
                    warn!(frame = ?frame, "Received close frame");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(TraderError::WebSocketMessage(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
