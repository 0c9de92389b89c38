//! Horizontal fan-out bridge.
//!
//! When a resolved target connection is not held by this process, the relay
//! publishes the message on a shared Redis channel. Every instance
//! subscribes; an instance discards its own envelopes (loop prevention) and
//! otherwise attempts local delivery, dropping silently on a miss because
//! the Directory already told the owning process everything authoritative.
//!
//! Ordering: Redis pub/sub delivers per-channel in publish order and each
//! local connection drains a FIFO mpsc, so messages to one target keep
//! their send order. No ordering is promised across different targets.

use crate::context::Clients;
use crate::error::SignalResult;
use crate::message::ServerMessage;
use crate::metrics;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const FANOUT_CHANNEL: &str = "switchboard:fanout";

/// Wraps a routed message in transit on the shared bus. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating process id; used to discard echoes of our own publishes.
    pub origin: String,
    /// Target connection id on whichever instance holds it.
    pub target: String,
    pub message: ServerMessage,
    pub published_at_ms: u64,
}

impl Envelope {
    pub fn new(origin: &str, target: &str, message: ServerMessage) -> Self {
        Self {
            origin: origin.to_string(),
            target: target.to_string(),
            message,
            published_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

#[async_trait::async_trait]
pub trait FanoutBridge: Send + Sync {
    /// Fire-and-forget publish toward whichever instance holds the target.
    async fn publish(&self, target_connection_id: &str, message: ServerMessage)
        -> SignalResult<()>;
}

pub struct RedisBridge {
    conn: ConnectionManager,
    instance_id: String,
    channel: String,
}

impl RedisBridge {
    pub async fn connect(url: &str, instance_id: &str) -> SignalResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            instance_id: instance_id.to_string(),
            channel: FANOUT_CHANNEL.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl FanoutBridge for RedisBridge {
    async fn publish(
        &self,
        target_connection_id: &str,
        message: ServerMessage,
    ) -> SignalResult<()> {
        let envelope = Envelope::new(&self.instance_id, target_connection_id, message);
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(&self.channel, payload).await?;
        metrics::FANOUT_PUBLISHED_TOTAL.inc();
        tracing::debug!(
            target = %target_connection_id,
            origin = %self.instance_id,
            "Published fan-out envelope"
        );
        Ok(())
    }
}

/// Decides whether a received envelope should be delivered locally and, if
/// so, hands it to the held connection. Returns true when a local sender
/// accepted the message.
pub async fn handle_envelope(clients: &Clients, instance_id: &str, envelope: Envelope) -> bool {
    if envelope.origin == instance_id {
        // Our own publish echoed back; the local path already ran.
        return false;
    }
    let guard = clients.read().await;
    match guard.get(&envelope.target) {
        Some(tx) => tx.send(envelope.message).is_ok(),
        None => {
            tracing::debug!(
                target = %envelope.target,
                origin = %envelope.origin,
                "Fan-out target not held here, dropping"
            );
            false
        }
    }
}

/// Subscribe loop; one task per process, running for the process lifetime.
pub async fn run_subscriber(
    url: String,
    instance_id: String,
    clients: Clients,
) -> SignalResult<()> {
    let client = redis::Client::open(url.as_str())?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(FANOUT_CHANNEL).await?;
    tracing::info!(channel = FANOUT_CHANNEL, instance_id = %instance_id, "Fan-out subscriber running");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable fan-out payload");
                continue;
            }
        };
        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => {
                handle_envelope(&clients, &instance_id, envelope).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed fan-out envelope");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    fn clients_with(connection_id: &str) -> (Clients, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = HashMap::new();
        map.insert(connection_id.to_string(), tx);
        (Arc::new(RwLock::new(map)), rx)
    }

    #[tokio::test]
    async fn own_origin_envelopes_are_discarded() {
        let (clients, mut rx) = clients_with("conn-1");
        let envelope = Envelope::new(
            "instance-a",
            "conn-1",
            ServerMessage::Hangup {
                from_address: "111-222".to_string(),
            },
        );
        assert!(!handle_envelope(&clients, "instance-a", envelope).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn foreign_envelopes_reach_held_connections() {
        let (clients, mut rx) = clients_with("conn-1");
        let envelope = Envelope::new(
            "instance-b",
            "conn-1",
            ServerMessage::Hangup {
                from_address: "111-222".to_string(),
            },
        );
        assert!(handle_envelope(&clients, "instance-a", envelope).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::Hangup {
                from_address: "111-222".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unheld_targets_drop_silently() {
        let (clients, _rx) = clients_with("conn-1");
        let envelope = Envelope::new(
            "instance-b",
            "conn-9",
            ServerMessage::Hangup {
                from_address: "111-222".to_string(),
            },
        );
        assert!(!handle_envelope(&clients, "instance-a", envelope).await);
    }
}
