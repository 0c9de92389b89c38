//! Redis-backed directory for multi-instance deployments.
//!
//! Key schema (all TTL-bounded):
//!   address:{ext}    -> connection id
//!   connection:{id}  -> extension
//!   activity:{id}    -> unix timestamp of last activity
//!
//! Claims go through `SET NX` on the address key, making Redis the
//! arbiter of extension uniqueness across every instance. Every round trip
//! is wrapped in a bounded timeout so a slow store cannot stall routing; a
//! timeout surfaces as `StoreTimeout` and the caller treats it as a miss.

use super::{Directory, Extension};
use crate::error::{SignalError, SignalResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ADDRESS_PREFIX: &str = "address:";
const CONNECTION_PREFIX: &str = "connection:";
const ACTIVITY_PREFIX: &str = "activity:";

pub struct RedisDirectory {
    conn: ConnectionManager,
    entry_ttl: Duration,
    op_timeout: Duration,
    max_attempts: u32,
}

impl RedisDirectory {
    pub async fn connect(
        url: &str,
        entry_ttl: Duration,
        op_timeout: Duration,
        max_attempts: u32,
    ) -> SignalResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            entry_ttl,
            op_timeout,
            max_attempts,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> SignalResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SignalError::StoreTimeout(self.op_timeout)),
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.entry_ttl.as_secs().max(1)
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Directory for RedisDirectory {
    async fn assign(&self, connection_id: &str) -> SignalResult<Extension> {
        let ttl = self.ttl_secs();
        for _ in 0..self.max_attempts {
            let candidate = Extension::generate(&mut rand::thread_rng());
            let address_key = format!("{ADDRESS_PREFIX}{candidate}");
            let mut conn = self.conn.clone();

            // NX makes Redis the single claim point for the address.
            let claimed: Option<String> = self
                .bounded(
                    redis::cmd("SET")
                        .arg(&address_key)
                        .arg(connection_id)
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl)
                        .query_async(&mut conn),
                )
                .await?;
            if claimed.is_none() {
                continue;
            }

            // Drop any previous address this connection held.
            let previous: Option<String> = self
                .bounded(conn.get(format!("{CONNECTION_PREFIX}{connection_id}")))
                .await?;
            if let Some(old) = previous {
                let _: i64 = self.bounded(conn.del(format!("{ADDRESS_PREFIX}{old}"))).await?;
            }

            let _: () = self
                .bounded(conn.set_ex(
                    format!("{CONNECTION_PREFIX}{connection_id}"),
                    candidate.as_str(),
                    ttl,
                ))
                .await?;
            let _: () = self
                .bounded(conn.set_ex(
                    format!("{ACTIVITY_PREFIX}{connection_id}"),
                    Self::now_unix(),
                    ttl,
                ))
                .await?;
            return Ok(candidate);
        }
        Err(SignalError::AddressSpaceExhausted {
            attempts: self.max_attempts,
        })
    }

    async fn resolve(&self, extension: &Extension) -> SignalResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(conn.get(format!("{ADDRESS_PREFIX}{extension}"))).await
    }

    async fn resolve_reverse(&self, connection_id: &str) -> SignalResult<Option<Extension>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .bounded(conn.get(format!("{CONNECTION_PREFIX}{connection_id}")))
            .await?;
        Ok(raw.as_deref().and_then(Extension::parse))
    }

    async fn touch(&self, connection_id: &str) -> SignalResult<()> {
        let ttl = self.ttl_secs() as i64;
        let mut conn = self.conn.clone();
        let extension: Option<String> = self
            .bounded(conn.get(format!("{CONNECTION_PREFIX}{connection_id}")))
            .await?;
        let Some(extension) = extension else {
            return Ok(());
        };
        let _: bool = self
            .bounded(conn.expire(format!("{ADDRESS_PREFIX}{extension}"), ttl))
            .await?;
        let _: bool = self
            .bounded(conn.expire(format!("{CONNECTION_PREFIX}{connection_id}"), ttl))
            .await?;
        let _: () = self
            .bounded(conn.set_ex(
                format!("{ACTIVITY_PREFIX}{connection_id}"),
                Self::now_unix(),
                self.ttl_secs(),
            ))
            .await?;
        Ok(())
    }

    async fn release(&self, connection_id: &str) -> SignalResult<()> {
        let mut conn = self.conn.clone();
        let extension: Option<String> = self
            .bounded(conn.get(format!("{CONNECTION_PREFIX}{connection_id}")))
            .await?;
        if let Some(extension) = extension {
            let _: i64 = self
                .bounded(conn.del(format!("{ADDRESS_PREFIX}{extension}")))
                .await?;
        }
        let _: i64 = self
            .bounded(conn.del(format!("{CONNECTION_PREFIX}{connection_id}")))
            .await?;
        let _: i64 = self
            .bounded(conn.del(format!("{ACTIVITY_PREFIX}{connection_id}")))
            .await?;
        Ok(())
    }

    async fn sweep(&self, _max_idle: Duration) -> SignalResult<usize> {
        // Every key carries the directory TTL and `touch` refreshes it, so
        // Redis expires idle entries itself. Nothing to do here.
        Ok(0)
    }

    async fn ping(&self) -> SignalResult<()> {
        let mut conn = self.conn.clone();
        let _: () = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}
