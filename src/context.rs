use crate::auth::AuthGate;
use crate::bridge::FanoutBridge;
use crate::config::Config;
use crate::directory::Directory;
use crate::events::EventSink;
use crate::limiter::RateLimiter;
use crate::message::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Locally-held connections: connection id -> outbound sender.
/// A connection's mpsc is FIFO, which is what preserves per-target ordering.
pub type Clients = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<ServerMessage>>>>;

/// Shared dependencies handed to every connection task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub directory: Arc<dyn Directory>,
    pub limiter: Arc<RateLimiter>,
    pub clients: Clients,
    /// Absent in single-instance deployments; routing then stays local.
    pub bridge: Option<Arc<dyn FanoutBridge>>,
    pub auth: Arc<dyn AuthGate>,
    pub events: Arc<dyn EventSink>,
    /// Unique id of this server process, stamped on fan-out envelopes.
    pub instance_id: String,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        directory: Arc<dyn Directory>,
        limiter: Arc<RateLimiter>,
        clients: Clients,
        bridge: Option<Arc<dyn FanoutBridge>>,
        auth: Arc<dyn AuthGate>,
        events: Arc<dyn EventSink>,
        instance_id: String,
    ) -> Self {
        Self {
            config,
            directory,
            limiter,
            clients,
            bridge,
            auth,
            events,
            instance_id,
        }
    }
}
