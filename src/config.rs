use crate::limiter::BucketConfig;
use crate::message::MessageKind;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HEALTH_PORT: u16 = 8081;

// Directory liveness
const DEFAULT_DIRECTORY_TTL_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;
const DEFAULT_ASSIGN_MAX_ATTEMPTS: u32 = 25;

// Rate limiting. Call setup is cheap for a legitimate user and expensive for
// the callee (it rings); routing hints burst naturally during negotiation.
const DEFAULT_CALL_SETUP_BUCKET: BucketConfig = BucketConfig {
    max_tokens: 10.0,
    refill_per_sec: 5.0,
};
const DEFAULT_HINT_BUCKET: BucketConfig = BucketConfig {
    max_tokens: 100.0,
    refill_per_sec: 50.0,
};
const DEFAULT_BUCKET_IDLE_SECS: u64 = 600;
const DEFAULT_BUCKET_PURGE_INTERVAL_SECS: u64 = 120;

// Client reconnection / batching
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
const DEFAULT_BACKOFF_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_BACKOFF_JITTER: f64 = 0.25;
const DEFAULT_HINT_BATCH_SIZE: usize = 8;
const DEFAULT_HINT_BATCH_DELAY_MS: u64 = 50;

pub const MAX_WEBSOCKET_FRAME_SIZE: usize = 128 * 1024; // comfortably above any real SDP

// ============================================================================
// Configuration Structures
// ============================================================================

/// Per-kind token bucket table plus bucket lifecycle knobs.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub call_initiate: BucketConfig,
    pub call_accept: BucketConfig,
    pub routing_hint: BucketConfig,
    pub hangup: BucketConfig,
    pub reject: BucketConfig,
    pub bucket_idle_secs: u64,
    pub purge_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn bucket_table(&self) -> HashMap<MessageKind, BucketConfig> {
        HashMap::from([
            (MessageKind::CallInitiate, self.call_initiate),
            (MessageKind::CallAccept, self.call_accept),
            (MessageKind::RoutingHint, self.routing_hint),
            (MessageKind::Hangup, self.hangup),
            (MessageKind::Reject, self.reject),
        ])
    }
}

/// Defaults for the bundled client session controller.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_max_attempts: u32,
    pub backoff_jitter: f64,
    pub hint_batch_size: usize,
    pub hint_batch_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            backoff_max_attempts: DEFAULT_BACKOFF_MAX_ATTEMPTS,
            backoff_jitter: DEFAULT_BACKOFF_JITTER,
            hint_batch_size: DEFAULT_HINT_BATCH_SIZE,
            hint_batch_delay: Duration::from_millis(DEFAULT_HINT_BATCH_DELAY_MS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub health_port: u16,
    /// Empty or unset selects the in-process directory and disables the
    /// fan-out bridge (single-instance deployment).
    pub redis_url: Option<String>,
    /// Shared secret consumed by the authorization gate; unset admits guests.
    pub auth_token: Option<String>,
    pub directory_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub store_timeout_ms: u64,
    pub assign_max_attempts: u32,
    pub limits: RateLimitConfig,
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            health_port: DEFAULT_HEALTH_PORT,
            redis_url: None,
            auth_token: None,
            directory_ttl_secs: DEFAULT_DIRECTORY_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            assign_max_attempts: DEFAULT_ASSIGN_MAX_ATTEMPTS,
            limits: RateLimitConfig {
                call_initiate: DEFAULT_CALL_SETUP_BUCKET,
                call_accept: DEFAULT_CALL_SETUP_BUCKET,
                routing_hint: DEFAULT_HINT_BUCKET,
                hangup: DEFAULT_CALL_SETUP_BUCKET,
                reject: DEFAULT_CALL_SETUP_BUCKET,
                bucket_idle_secs: DEFAULT_BUCKET_IDLE_SECS,
                purge_interval_secs: DEFAULT_BUCKET_PURGE_INTERVAL_SECS,
            },
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        config.port = env_parse("SWITCHBOARD_PORT", config.port)?;
        config.health_port = env_parse("SWITCHBOARD_HEALTH_PORT", config.health_port)?;
        config.redis_url = env_nonempty("REDIS_URL");
        config.auth_token = env_nonempty("SWITCHBOARD_AUTH_TOKEN");
        config.directory_ttl_secs =
            env_parse("SWITCHBOARD_DIRECTORY_TTL_SECS", config.directory_ttl_secs)?;
        config.sweep_interval_secs =
            env_parse("SWITCHBOARD_SWEEP_INTERVAL_SECS", config.sweep_interval_secs)?;
        config.store_timeout_ms =
            env_parse("SWITCHBOARD_STORE_TIMEOUT_MS", config.store_timeout_ms)?;
        config.assign_max_attempts =
            env_parse("SWITCHBOARD_ASSIGN_MAX_ATTEMPTS", config.assign_max_attempts)?;

        config.limits.call_initiate.max_tokens =
            env_parse("SWITCHBOARD_CALL_BUCKET_MAX", config.limits.call_initiate.max_tokens)?;
        config.limits.call_initiate.refill_per_sec = env_parse(
            "SWITCHBOARD_CALL_BUCKET_REFILL",
            config.limits.call_initiate.refill_per_sec,
        )?;
        config.limits.routing_hint.max_tokens =
            env_parse("SWITCHBOARD_HINT_BUCKET_MAX", config.limits.routing_hint.max_tokens)?;
        config.limits.routing_hint.refill_per_sec = env_parse(
            "SWITCHBOARD_HINT_BUCKET_REFILL",
            config.limits.routing_hint.refill_per_sec,
        )?;

        config.client.backoff_base = env_parse_ms("SWITCHBOARD_BACKOFF_BASE_MS", config.client.backoff_base)?;
        config.client.backoff_cap = env_parse_ms("SWITCHBOARD_BACKOFF_CAP_MS", config.client.backoff_cap)?;
        config.client.backoff_max_attempts = env_parse(
            "SWITCHBOARD_BACKOFF_MAX_ATTEMPTS",
            config.client.backoff_max_attempts,
        )?;
        config.client.backoff_jitter =
            env_parse("SWITCHBOARD_BACKOFF_JITTER", config.client.backoff_jitter)?;
        config.client.hint_batch_size =
            env_parse("SWITCHBOARD_HINT_BATCH_SIZE", config.client.hint_batch_size)?;
        config.client.hint_batch_delay =
            env_parse_ms("SWITCHBOARD_HINT_BATCH_DELAY_MS", config.client.hint_batch_delay)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == self.health_port {
            anyhow::bail!("SWITCHBOARD_PORT and SWITCHBOARD_HEALTH_PORT must differ");
        }
        if self.directory_ttl_secs == 0 {
            anyhow::bail!("SWITCHBOARD_DIRECTORY_TTL_SECS must be positive");
        }
        if self.assign_max_attempts == 0 {
            anyhow::bail!("SWITCHBOARD_ASSIGN_MAX_ATTEMPTS must be positive");
        }
        if self.store_timeout_ms == 0 {
            anyhow::bail!("SWITCHBOARD_STORE_TIMEOUT_MS must be positive");
        }
        if !(0.0..=1.0).contains(&self.client.backoff_jitter) {
            anyhow::bail!("SWITCHBOARD_BACKOFF_JITTER must be within 0.0..=1.0");
        }
        if self.client.hint_batch_size == 0 {
            anyhow::bail!("SWITCHBOARD_HINT_BATCH_SIZE must be positive");
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn directory_ttl(&self) -> Duration {
        Duration::from_secs(self.directory_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        _ => Ok(default),
    }
}

fn env_parse_ms(name: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_millis(env_parse(
        name,
        default.as_millis() as u64,
    )?))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn bucket_table_covers_every_kind() {
        let table = Config::default().limits.bucket_table();
        assert_eq!(table.len(), 5);
        assert!(table[&MessageKind::RoutingHint].max_tokens > table[&MessageKind::CallInitiate].max_tokens);
    }

    #[test]
    fn out_of_range_jitter_rejected() {
        let mut config = Config::default();
        config.client.backoff_jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn colliding_ports_rejected() {
        let config = Config {
            health_port: DEFAULT_PORT,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
