//! Per-connection, per-message-kind token buckets.
//!
//! Buckets are created lazily at full capacity on the first message of a
//! kind and garbage-collected after an idle period. Refill, check and
//! consume happen under the bucket's shard lock, so two concurrent senders
//! can never both spend the last token.

use crate::message::MessageKind;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// `(max_tokens, refill_per_second)` for one message kind.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub max_tokens: f64,
    pub refill_per_sec: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<(String, MessageKind), Bucket>,
    configs: HashMap<MessageKind, BucketConfig>,
    idle_after: Duration,
}

impl RateLimiter {
    pub fn new(configs: HashMap<MessageKind, BucketConfig>, idle_after: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            configs,
            idle_after,
        }
    }

    /// Refills proportionally to elapsed time, then consumes one token if
    /// available. A denied request leaves no penalty state.
    pub fn allow(&self, connection_id: &str, kind: MessageKind) -> bool {
        self.allow_at(connection_id, kind, Instant::now())
    }

    fn allow_at(&self, connection_id: &str, kind: MessageKind, now: Instant) -> bool {
        let Some(cfg) = self.configs.get(&kind) else {
            // Unconfigured kinds are unmetered.
            return true;
        };
        let mut entry = self
            .buckets
            .entry((connection_id.to_string(), kind))
            .or_insert_with(|| Bucket {
                tokens: cfg.max_tokens,
                last_refill: now,
            });
        let bucket = entry.value_mut();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * cfg.refill_per_sec).min(cfg.max_tokens);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drops all buckets belonging to a closed connection.
    pub fn release(&self, connection_id: &str) {
        self.buckets.retain(|(id, _), _| id != connection_id);
    }

    /// Removes buckets untouched for longer than the idle threshold.
    /// Returns the number purged. Safe to run concurrently with `allow`.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let idle_after = self.idle_after;
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_refill) < idle_after);
        before - self.buckets.len()
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
