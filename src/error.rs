use crate::gate::RejectReason;
use std::time::Duration;
use thiserror::Error;

pub type SignalResult<T> = Result<T, SignalError>;

/// Error taxonomy for the signaling core.
///
/// Only `AddressSpaceExhausted` is fatal to a connection; everything else is
/// recoverable by the sender (retry after refill, re-dial, reconnect). The
/// server process itself never terminates on any of these.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("address space exhausted after {attempts} attempts")]
    AddressSpaceExhausted { attempts: u32 },

    #[error("target not found")]
    TargetNotFound,

    #[error("rate limit exceeded for {kind}")]
    RateLimitExceeded { kind: &'static str },

    #[error("validation failed: {0}")]
    Validation(#[from] RejectReason),

    #[error("store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SignalError {
    /// Short machine-readable code carried in `error` frames.
    pub fn wire_code(&self) -> &'static str {
        match self {
            SignalError::AddressSpaceExhausted { .. } => "address-space-exhausted",
            SignalError::TargetNotFound | SignalError::StoreTimeout(_) => "not-found",
            SignalError::RateLimitExceeded { .. } => "rate-limited",
            SignalError::Validation(_) => "invalid-message",
            SignalError::TransportLost(_) => "transport-lost",
            SignalError::ReconnectExhausted { .. } => "reconnect-exhausted",
            SignalError::Unauthorized(_) => "unauthorized",
            _ => "internal",
        }
    }

    /// Fatal errors close the connection after the error frame is sent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SignalError::AddressSpaceExhausted { .. } | SignalError::Unauthorized(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_timeout_routes_as_not_found() {
        let err = SignalError::StoreTimeout(Duration::from_millis(250));
        assert_eq!(err.wire_code(), "not-found");
        assert!(!err.is_fatal());
    }

    #[test]
    fn exhaustion_is_fatal() {
        let err = SignalError::AddressSpaceExhausted { attempts: 25 };
        assert!(err.is_fatal());
    }
}
