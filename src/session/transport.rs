//! Message transport for live sessions
//!
//! The session actor only sees `Transport`; the WebSocket implementation
//! is one `Connector` among others (tests use an in-memory one).

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::wire::{ClientMessage, ServerMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>>;
}

/// An open, ordered, bidirectional message channel
#[async_trait]
pub trait Transport: Send {
    /// Send one message
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Receive the next message; `None` once the peer has closed
    ///
    /// Must be cancel-safe: the session polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<ServerMessage>>;

    /// Close the transport; safe to call on a closed transport
    async fn close(&mut self) -> Result<()>;
}

/// WebSocket connector
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        tracing::debug!(host = url.host_str().unwrap_or_default(), "opening websocket");

        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;

        tracing::debug!(status = %response.status(), "websocket connected");

        let (sink, stream) = stream.split();
        Ok(Box::new(WsTransport {
            sink,
            stream,
            closed: false,
        }))
    }
}

/// WebSocket transport; text and binary frames both carry JSON
pub struct WsTransport {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closed: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("websocket already closed".to_string()));
        }

        let json = message.to_json()?;
        tracing::trace!(kind = message.kind(), bytes = json.len(), "sending message");
        self.sink.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        if self.closed {
            return None;
        }

        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.closed = true;
                    return None;
                }
            };

            match message {
                Message::Text(text) => return Some(ServerMessage::parse(text.as_bytes())),
                Message::Binary(bytes) => return Some(ServerMessage::parse(&bytes)),
                Message::Close(frame) => {
                    tracing::info!(frame = ?frame, "server closed websocket");
                    self.closed = true;
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.sink.close().await {
            Ok(())
            | Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
