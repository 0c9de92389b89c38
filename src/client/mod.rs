//! Peer-side session controller.
//!
//! The server relays; this module is what a native client embeds to talk
//! to it: dial by extension, exchange offer/answer, batch routing hints,
//! and survive transport loss with capped backoff.

pub mod backoff;
pub mod batcher;
pub mod session;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use batcher::{BatcherConfig, HintBatcher};
pub use session::{
    CallSession, CallState, SessionConfig, SessionController, SessionEvent, SessionHandle,
};
pub use transport::{Connector, Transport, WsConnector, WsTransport};
