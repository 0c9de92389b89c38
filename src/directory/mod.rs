//! Extension directory: the bijection between short dialable addresses and
//! live connection identifiers.
//!
//! The backing store is selected once at startup: an in-process table for
//! single-instance deployments or Redis for multi-instance ones. Routing
//! logic never branches on deployment mode; it talks to the `Directory`
//! trait only.

mod memory;
mod redis;

pub use memory::MemoryDirectory;
pub use redis::RedisDirectory;

use crate::error::SignalResult;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A short human-dialable address, `DDD-DDD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extension(String);

impl Extension {
    pub fn parse(s: &str) -> Option<Extension> {
        if crate::gate::is_valid_address(s) {
            Some(Extension(s.to_string()))
        } else {
            None
        }
    }

    /// Draws three random digit pairs and formats them `DDD-DDD`.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Extension {
        let digits: String = (0..3).map(|_| format!("{:02}", rng.gen_range(0..100u8))).collect();
        Extension(format!("{}-{}", &digits[..3], &digits[3..]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bidirectional extension <-> connection mapping with liveness timestamps.
///
/// Both index directions are installed and removed together; at any instant
/// the two indices are mutual inverses for committed entries.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Generates a fresh extension for the connection, retrying on
    /// collision up to the configured cap. Fails with
    /// `AddressSpaceExhausted` when the cap is spent. Re-assigning an
    /// already-addressed connection replaces its previous extension.
    async fn assign(&self, connection_id: &str) -> SignalResult<Extension>;

    async fn resolve(&self, extension: &Extension) -> SignalResult<Option<String>>;

    async fn resolve_reverse(&self, connection_id: &str) -> SignalResult<Option<Extension>>;

    /// Refreshes the TTL on both index entries.
    async fn touch(&self, connection_id: &str) -> SignalResult<()>;

    /// Removes both entries. Idempotent.
    async fn release(&self, connection_id: &str) -> SignalResult<()>;

    /// Evicts entries idle for longer than `max_idle`; returns the count
    /// removed. Safe to run concurrently with every other operation.
    async fn sweep(&self, max_idle: Duration) -> SignalResult<usize>;

    /// Store liveness probe for the health endpoint.
    async fn ping(&self) -> SignalResult<()>;
}
