//! Injectable duplex transport
//!
//! The connection manager is written against these traits so its reconnect
//! and dispatch logic is testable without real sockets. [`WsTransport`] is
//! the production WebSocket implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::protocol::WireMessage;
use crate::{Error, Result};

/// The two halves of an established connection
pub type DuplexPair = (Box<dyn MessageSink>, Box<dyn MessageStream>);

/// Write half of an established duplex channel
#[async_trait]
pub trait MessageSink: Send {
    /// Send one message, blocking on transport back-pressure
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the peer is gone.
    async fn send(&mut self, msg: WireMessage) -> Result<()>;

    /// Close the channel cleanly
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the close handshake fails.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an established duplex channel
#[async_trait]
pub trait MessageStream: Send {
    /// Next inbound message. `None` means the peer closed cleanly.
    async fn next_message(&mut self) -> Option<Result<WireMessage>>;
}

/// Factory for duplex connections to the backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one connect attempt within the deadline
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] on timeout or handshake failure.
    async fn connect(&self, url: &str, timeout: Duration) -> Result<DuplexPair>;
}

/// WebSocket transport over tokio-tungstenite
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str, timeout: Duration) -> Result<DuplexPair> {
        let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| Error::Connection(format!("connect timed out after {timeout:?}")))?
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsStream { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, msg: WireMessage) -> Result<()> {
        let msg = match msg {
            WireMessage::Binary(data) => Message::Binary(data),
            WireMessage::Text(text) => Message::Text(text),
        };
        self.sink
            .send(msg)
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

struct WsStream {
    stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl MessageStream for WsStream {
    async fn next_message(&mut self) -> Option<Result<WireMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(WireMessage::Binary(data))),
                Ok(Message::Text(text)) => return Some(Ok(WireMessage::Text(text))),
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(Error::Connection(e.to_string()))),
            }
        }
    }
}
