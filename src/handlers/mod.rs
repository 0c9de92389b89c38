mod connection;
pub mod relay;

pub use connection::ConnectionHandler;

use crate::context::AppContext;
use crate::message::ClientMessage;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::Instrument;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

pub type WebSocketStreamType = WebSocketStream<TcpStream>;

/// Runs one connection for its whole lifetime: frames in, replies and
/// routed messages out, teardown on close. Inbound handling is sequential
/// per connection; connections run in parallel tasks.
pub async fn handle_websocket(ws_stream: WebSocketStreamType, addr: SocketAddr, ctx: AppContext) {
    let connection_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("connection", addr = %addr, connection_id = %connection_id);
    run_connection(ws_stream, connection_id, addr, ctx)
        .instrument(span)
        .await
}

async fn run_connection(
    ws_stream: WebSocketStreamType,
    connection_id: String,
    addr: SocketAddr,
    ctx: AppContext,
) {
    tracing::info!("New connection");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut handler = ConnectionHandler::new(connection_id, tx, addr.to_string());

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                let Some(inbound) = inbound else { break };
                match inbound {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if !relay::handle_message(&mut handler, &ctx, msg).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Unparseable frame");
                                handler.send_error("bad-message", "frame is not a recognized message");
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Connection closed by client");
                        break;
                    }
                    Ok(WsMessage::Ping(data)) => {
                        let _ = ws_sender.send(WsMessage::Pong(data)).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            Some(server_msg) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&server_msg) {
                    if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Flush replies queued during the final handler run (e.g. the error
    // frame that caused the close) before tearing down.
    while let Ok(server_msg) = rx.try_recv() {
        if let Ok(json) = serde_json::to_string(&server_msg) {
            if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    }
    let _ = ws_sender.close().await;

    relay::handle_disconnect(&handler, &ctx).await;
    tracing::info!("Connection task finished");
}
