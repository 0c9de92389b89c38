//! Redis-backed directory integration tests.
//!
//! These need a reachable Redis (default redis://127.0.0.1:6379, override
//! with REDIS_URL) and are ignored by default:
//!
//!   cargo test --test redis_directory_test -- --ignored

use redis::Commands;
use serial_test::serial;
use std::env;
use std::time::Duration;
use uuid::Uuid;

use switchboard::directory::{Directory, RedisDirectory};

fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn setup() -> (RedisDirectory, redis::Connection, String) {
    let url = redis_url();
    let directory = RedisDirectory::connect(
        &url,
        Duration::from_secs(60),
        Duration::from_millis(500),
        25,
    )
    .await
    .expect("Failed to connect RedisDirectory");

    let client = redis::Client::open(url.as_str()).expect("Failed to create Redis client");
    let conn = client
        .get_connection()
        .expect("Failed to get Redis connection");

    // Unique id per run keeps parallel CI jobs off each other's keys.
    let connection_id = format!("test-conn-{}", Uuid::new_v4());
    (directory, conn, connection_id)
}

fn cleanup(conn: &mut redis::Connection, connection_id: &str, address: Option<&str>) {
    if let Some(address) = address {
        let _: i64 = conn.del(format!("address:{address}")).unwrap_or(0);
    }
    let _: i64 = conn.del(format!("connection:{connection_id}")).unwrap_or(0);
    let _: i64 = conn.del(format!("activity:{connection_id}")).unwrap_or(0);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn assign_installs_both_indices_with_ttl() {
    let (directory, mut conn, connection_id) = setup().await;

    let extension = directory.assign(&connection_id).await.expect("assign failed");

    let stored: Option<String> = conn
        .get(format!("address:{extension}"))
        .expect("GET address key failed");
    assert_eq!(stored.as_deref(), Some(connection_id.as_str()));

    let reverse: Option<String> = conn
        .get(format!("connection:{connection_id}"))
        .expect("GET connection key failed");
    assert_eq!(reverse.as_deref(), Some(extension.as_str()));

    let ttl: i64 = conn
        .ttl(format!("address:{extension}"))
        .expect("TTL command failed");
    assert!(ttl > 0 && ttl <= 60, "address key must carry the entry TTL");

    cleanup(&mut conn, &connection_id, Some(extension.as_str()));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn resolve_round_trips_and_misses_cleanly() {
    let (directory, mut conn, connection_id) = setup().await;

    let extension = directory.assign(&connection_id).await.expect("assign failed");

    let resolved = directory.resolve(&extension).await.expect("resolve failed");
    assert_eq!(resolved.as_deref(), Some(connection_id.as_str()));

    let reverse = directory
        .resolve_reverse(&connection_id)
        .await
        .expect("resolve_reverse failed");
    assert_eq!(reverse.as_ref(), Some(&extension));

    directory.release(&connection_id).await.expect("release failed");
    assert_eq!(directory.resolve(&extension).await.expect("resolve failed"), None);
    assert_eq!(
        directory
            .resolve_reverse(&connection_id)
            .await
            .expect("resolve_reverse failed"),
        None
    );

    cleanup(&mut conn, &connection_id, Some(extension.as_str()));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn reassignment_frees_the_previous_address() {
    let (directory, mut conn, connection_id) = setup().await;

    let first = directory.assign(&connection_id).await.expect("first assign failed");
    let second = directory.assign(&connection_id).await.expect("second assign failed");
    assert_ne!(first, second, "a reassignment draws a fresh extension");

    assert_eq!(directory.resolve(&first).await.expect("resolve failed"), None);
    assert_eq!(
        directory.resolve(&second).await.expect("resolve failed").as_deref(),
        Some(connection_id.as_str())
    );

    cleanup(&mut conn, &connection_id, Some(second.as_str()));
    cleanup(&mut conn, &connection_id, Some(first.as_str()));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn release_is_idempotent() {
    let (directory, mut conn, connection_id) = setup().await;

    let extension = directory.assign(&connection_id).await.expect("assign failed");
    directory.release(&connection_id).await.expect("first release failed");
    directory.release(&connection_id).await.expect("second release failed");

    cleanup(&mut conn, &connection_id, Some(extension.as_str()));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn touch_refreshes_the_entry_ttl() {
    let (directory, mut conn, connection_id) = setup().await;

    let extension = directory.assign(&connection_id).await.expect("assign failed");

    // Shrink the TTL behind the directory's back, then touch.
    let _: bool = conn
        .expire(format!("address:{extension}"), 5)
        .expect("EXPIRE failed");
    directory.touch(&connection_id).await.expect("touch failed");

    let ttl: i64 = conn
        .ttl(format!("address:{extension}"))
        .expect("TTL command failed");
    assert!(ttl > 5, "touch must restore the full entry TTL, got {ttl}");

    cleanup(&mut conn, &connection_id, Some(extension.as_str()));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis"]
async fn ping_reaches_the_store() {
    let (directory, _conn, _connection_id) = setup().await;
    directory.ping().await.expect("ping failed");
}
