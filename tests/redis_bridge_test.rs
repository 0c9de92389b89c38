//! Fan-out bridge integration tests over a real Redis pub/sub channel.
//!
//! Need a reachable Redis (default redis://127.0.0.1:6379, override with
//! REDIS_URL); ignored by default:
//!
//!   cargo test --test redis_bridge_test -- --ignored

use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use switchboard::bridge::{self, FanoutBridge, RedisBridge};
use switchboard::context::Clients;
use switchboard::message::ServerMessage;

fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn clients_with(connection_id: &str) -> (Clients, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut map = HashMap::new();
    map.insert(connection_id.to_string(), tx);
    (Arc::new(RwLock::new(map)), rx)
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn publish_reaches_a_subscriber_on_another_instance() {
    let url = redis_url();
    let (clients, mut rx) = clients_with("conn-on-b");

    // Instance B subscribes; give the subscription a moment to register
    // before instance A publishes.
    let subscriber = tokio::spawn(bridge::run_subscriber(
        url.clone(),
        "instance-b".to_string(),
        clients,
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let bridge_a = RedisBridge::connect(&url, "instance-a")
        .await
        .expect("Failed to connect RedisBridge");
    bridge_a
        .publish(
            "conn-on-b",
            ServerMessage::Hangup {
                from_address: "111-222".to_string(),
            },
        )
        .await
        .expect("publish failed");

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for fan-out delivery")
        .expect("subscriber channel closed");
    assert_eq!(
        received,
        ServerMessage::Hangup {
            from_address: "111-222".to_string()
        }
    );

    subscriber.abort();
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn own_instance_never_hears_its_echo() {
    let url = redis_url();
    let (clients, mut rx) = clients_with("conn-local");

    let subscriber = tokio::spawn(bridge::run_subscriber(
        url.clone(),
        "instance-a".to_string(),
        clients,
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Same instance id on both ends: the echo must be discarded.
    let bridge_a = RedisBridge::connect(&url, "instance-a")
        .await
        .expect("Failed to connect RedisBridge");
    bridge_a
        .publish(
            "conn-local",
            ServerMessage::CallFailed {
                reason: "not found".to_string(),
            },
        )
        .await
        .expect("publish failed");

    let outcome = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(outcome.is_err(), "own-origin envelope must not be delivered");

    subscriber.abort();
}
