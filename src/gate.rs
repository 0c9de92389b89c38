//! Validation and sanitization gate.
//!
//! Runs before any routing decision. Structural validation checks the shape
//! of each message; sanitization strips hostile content from free-text
//! fields. Opaque machine-generated payloads (SDP bodies, ICE candidate
//! strings) pass through untouched: rewriting their line-based structure
//! would break the call.

use crate::message::{ClientMessage, SessionDescription};
use thiserror::Error;

/// Maximum length accepted for any free-text field (tokens, addresses).
pub const MAX_TEXT_LEN: usize = 256;

/// Maximum length accepted for an SDP body or candidate string. Generous:
/// real browser SDP runs a few KB.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// SDP bodies always open with a version line.
const SDP_PREAMBLE: &str = "v=0";

/// Typed rejection reasons. A rejected message never reaches the relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("address must match DDD-DDD")]
    MalformedAddress,
    #[error("session description type must be \"offer\" or \"answer\"")]
    BadDescriptionType,
    #[error("session description body is missing or malformed")]
    BadDescriptionBody,
    #[error("candidate string is empty")]
    EmptyHint,
    #[error("field exceeds maximum length")]
    Oversized,
}

/// Structural validation for one inbound message.
pub fn validate(msg: &ClientMessage) -> Result<(), RejectReason> {
    match msg {
        ClientMessage::Connect { token } => {
            if let Some(token) = token {
                if token.len() > MAX_TEXT_LEN {
                    return Err(RejectReason::Oversized);
                }
            }
            Ok(())
        }
        ClientMessage::CallInitiate {
            target_address,
            offer,
        } => {
            check_address(target_address)?;
            check_description(offer, "offer")
        }
        ClientMessage::CallAccept {
            caller_address,
            answer,
        } => {
            check_address(caller_address)?;
            check_description(answer, "answer")
        }
        ClientMessage::RoutingHint {
            target_address,
            hint,
        } => {
            check_address(target_address)?;
            if hint.is_empty() {
                return Err(RejectReason::EmptyHint);
            }
            if hint.len() > MAX_PAYLOAD_LEN {
                return Err(RejectReason::Oversized);
            }
            Ok(())
        }
        ClientMessage::Hangup { target_address } => check_address(target_address),
        ClientMessage::Reject { caller_address } => check_address(caller_address),
    }
}

/// `DDD-DDD`: six ASCII digits with a hyphen after the third.
pub fn is_valid_address(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 7
        && bytes[3] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 3 || b.is_ascii_digit())
}

fn check_address(s: &str) -> Result<(), RejectReason> {
    if is_valid_address(s) {
        Ok(())
    } else {
        Err(RejectReason::MalformedAddress)
    }
}

fn check_description(desc: &SessionDescription, expected: &str) -> Result<(), RejectReason> {
    if desc.kind != expected {
        return Err(RejectReason::BadDescriptionType);
    }
    if desc.sdp.is_empty() || !desc.sdp.starts_with(SDP_PREAMBLE) {
        return Err(RejectReason::BadDescriptionBody);
    }
    if desc.sdp.len() > MAX_PAYLOAD_LEN {
        return Err(RejectReason::Oversized);
    }
    Ok(())
}

/// Strips control characters and script-injection markers from a free-text
/// field and caps its length. Never applied to SDP or candidate payloads.
pub fn sanitize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_TEXT_LEN));
    for c in input.chars() {
        if out.len() >= MAX_TEXT_LEN {
            break;
        }
        if c.is_control() {
            continue;
        }
        if matches!(c, '<' | '>' | '"' | '\'' | '`') {
            continue;
        }
        out.push(c);
    }
    // Defuse scheme-based injection in anything later rendered as a link.
    let lowered = out.to_lowercase();
    if lowered.contains("javascript:") || lowered.contains("data:text/html") {
        return String::new();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(sdp: &str) -> SessionDescription {
        SessionDescription {
            kind: "offer".to_string(),
            sdp: sdp.to_string(),
        }
    }

    #[test]
    fn address_shape() {
        assert!(is_valid_address("123-456"));
        assert!(is_valid_address("000-000"));
        assert!(!is_valid_address("123456"));
        assert!(!is_valid_address("12-3456"));
        assert!(!is_valid_address("123-45a"));
        assert!(!is_valid_address("123-4567"));
        assert!(!is_valid_address(""));
    }

    #[test]
    fn offer_requires_sdp_preamble() {
        let msg = ClientMessage::CallInitiate {
            target_address: "123-456".to_string(),
            offer: offer("o=- 0 0 IN IP4 0.0.0.0"),
        };
        assert_eq!(validate(&msg), Err(RejectReason::BadDescriptionBody));

        let msg = ClientMessage::CallInitiate {
            target_address: "123-456".to_string(),
            offer: offer("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\n"),
        };
        assert_eq!(validate(&msg), Ok(()));
    }

    #[test]
    fn answer_type_tag_must_match() {
        let msg = ClientMessage::CallAccept {
            caller_address: "123-456".to_string(),
            answer: offer("v=0\r\n"),
        };
        assert_eq!(validate(&msg), Err(RejectReason::BadDescriptionType));
    }

    #[test]
    fn empty_hint_is_rejected() {
        let msg = ClientMessage::RoutingHint {
            target_address: "123-456".to_string(),
            hint: String::new(),
        };
        assert_eq!(validate(&msg), Err(RejectReason::EmptyHint));
    }

    #[test]
    fn sanitize_strips_markup_and_control() {
        assert_eq!(sanitize_text("<script>alert(1)</script>"), "scriptalert(1)/script");
        assert_eq!(sanitize_text("abc\u{0}\u{7}def"), "abcdef");
        assert_eq!(sanitize_text("JavaScript:void(0)"), "");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(MAX_TEXT_LEN * 2);
        assert_eq!(sanitize_text(&long).len(), MAX_TEXT_LEN);
    }
}
