//! Client-side transport abstraction.
//!
//! The controller drives a `Transport` it obtained from a `Connector`; the
//! production pair speaks WebSocket via tokio-tungstenite, tests hand the
//! controller a channel-backed fake.

use crate::error::{SignalError, SignalResult};
use crate::message::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[async_trait::async_trait]
pub trait Transport: Send {
    async fn send(&mut self, msg: ClientMessage) -> SignalResult<()>;

    /// Next server frame; `None` once the transport has closed.
    async fn recv(&mut self) -> Option<SignalResult<ServerMessage>>;
}

#[async_trait::async_trait]
pub trait Connector: Send {
    type Transport: Transport;

    async fn connect(&mut self) -> SignalResult<Self::Transport>;
}

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, msg: ClientMessage) -> SignalResult<()> {
        let json = serde_json::to_string(&msg)?;
        self.ws
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| SignalError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SignalResult<ServerMessage>> {
        loop {
            match self.ws.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(SignalError::from));
                }
                Ok(WsMessage::Close(_)) => return None,
                // Pings are answered by the stream itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(SignalError::WebSocket(e.to_string()))),
            }
        }
    }
}

/// Dials the relay's WebSocket endpoint.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&mut self) -> SignalResult<Self::Transport> {
        let (ws, _response) = connect_async(&self.url)
            .await
            .map_err(|e| SignalError::TransportLost(e.to_string()))?;
        Ok(WsTransport { ws })
    }
}
