//! Observability sink.
//!
//! Handlers report structured events through this trait; the sink never
//! influences control flow. The default implementation writes tracing
//! records and bumps prometheus counters.

use crate::gate::RejectReason;
use crate::message::MessageKind;
use crate::metrics;

#[derive(Debug)]
pub enum SignalEvent<'a> {
    Connected {
        connection_id: &'a str,
        address: &'a str,
    },
    Disconnected {
        connection_id: &'a str,
    },
    CallInitiated {
        from: &'a str,
        to: &'a str,
    },
    RateLimitDenied {
        connection_id: &'a str,
        kind: MessageKind,
    },
    ValidationRejected {
        connection_id: &'a str,
        reason: &'a RejectReason,
    },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: SignalEvent<'_>);
}

/// Default sink: tracing + prometheus.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: SignalEvent<'_>) {
        match event {
            SignalEvent::Connected {
                connection_id,
                address,
            } => {
                metrics::CONNECTIONS_TOTAL.inc();
                tracing::info!(connection_id = %connection_id, address = %address, "Connection addressed");
            }
            SignalEvent::Disconnected { connection_id } => {
                tracing::info!(connection_id = %connection_id, "Connection closed");
            }
            SignalEvent::CallInitiated { from, to } => {
                metrics::CALLS_INITIATED_TOTAL.inc();
                tracing::info!(from = %from, to = %to, "Call initiated");
            }
            SignalEvent::RateLimitDenied {
                connection_id,
                kind,
            } => {
                metrics::RATE_LIMIT_DENIED_TOTAL.inc();
                tracing::warn!(connection_id = %connection_id, kind = %kind, "Rate limit denied");
            }
            SignalEvent::ValidationRejected {
                connection_id,
                reason,
            } => {
                metrics::VALIDATION_REJECTED_TOTAL.inc();
                tracing::warn!(connection_id = %connection_id, reason = %reason, "Validation rejected");
            }
        }
    }
}
