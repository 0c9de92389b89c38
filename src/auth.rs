//! Authorization gate collaborator.
//!
//! Token issuance lives outside this system; the relay only asks "is this
//! connection authorized, and under what identity" before any directory
//! interaction happens.

use crate::error::{SignalError, SignalResult};

/// The identity under which a connection operates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `None` marks an anonymous guest.
    pub subject: Option<String>,
}

impl Identity {
    pub fn guest() -> Self {
        Self { subject: None }
    }

    pub fn is_guest(&self) -> bool {
        self.subject.is_none()
    }
}

#[async_trait::async_trait]
pub trait AuthGate: Send + Sync {
    async fn authorize(&self, token: Option<&str>) -> SignalResult<Identity>;
}

/// Admits every connection as a guest.
pub struct GuestGate;

#[async_trait::async_trait]
impl AuthGate for GuestGate {
    async fn authorize(&self, _token: Option<&str>) -> SignalResult<Identity> {
        Ok(Identity::guest())
    }
}

/// Requires a shared secret; the token doubles as the subject.
pub struct StaticTokenGate {
    expected: String,
}

impl StaticTokenGate {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

#[async_trait::async_trait]
impl AuthGate for StaticTokenGate {
    async fn authorize(&self, token: Option<&str>) -> SignalResult<Identity> {
        match token {
            Some(t) if t == self.expected => Ok(Identity {
                subject: Some(t.to_string()),
            }),
            _ => Err(SignalError::Unauthorized(
                "connect token missing or invalid".to_string(),
            )),
        }
    }
}
