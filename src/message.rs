use serde::{Deserialize, Serialize};

/// A session description produced by the browser RTC stack.
///
/// The `sdp` body is opaque, machine-generated and line-oriented; it is
/// routed verbatim and never sanitized (see `gate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// "offer" or "answer".
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// Messages a peer sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake: request an extension. Credentials are opaque to the relay
    /// and handed to the configured authorization gate.
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    CallInitiate {
        target_address: String,
        offer: SessionDescription,
    },
    CallAccept {
        caller_address: String,
        answer: SessionDescription,
    },
    RoutingHint {
        target_address: String,
        hint: String,
    },
    Hangup {
        target_address: String,
    },
    Reject {
        caller_address: String,
    },
}

/// Messages the relay pushes to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    AddressAssigned {
        address: String,
    },
    IncomingCall {
        caller_address: String,
        offer: SessionDescription,
    },
    CallAnswered {
        callee_address: String,
        answer: SessionDescription,
    },
    RoutingHint {
        from_address: String,
        hint: String,
    },
    Hangup {
        from_address: String,
    },
    CallFailed {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Rate-limit classes. `connect` and transport close are unmetered; every
/// call-scoped message draws from its own bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    CallInitiate,
    CallAccept,
    RoutingHint,
    Hangup,
    Reject,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::CallInitiate => "call-initiate",
            MessageKind::CallAccept => "call-accept",
            MessageKind::RoutingHint => "routing-hint",
            MessageKind::Hangup => "hangup",
            MessageKind::Reject => "reject",
        }
    }

    /// Best-effort messages are dropped silently on rejection; call-setup
    /// messages surface an error frame to the sender.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, MessageKind::RoutingHint)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClientMessage {
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            ClientMessage::Connect { .. } => None,
            ClientMessage::CallInitiate { .. } => Some(MessageKind::CallInitiate),
            ClientMessage::CallAccept { .. } => Some(MessageKind::CallAccept),
            ClientMessage::RoutingHint { .. } => Some(MessageKind::RoutingHint),
            ClientMessage::Hangup { .. } => Some(MessageKind::Hangup),
            ClientMessage::Reject { .. } => Some(MessageKind::Reject),
        }
    }
}
