use crate::auth::Identity;
use crate::directory::Extension;
use crate::message::ServerMessage;
use tokio::sync::mpsc;

/// Per-connection state as the relay sees it: Unaddressed until `connect`
/// succeeds, Addressed afterwards. Everything the relay sends back travels
/// through the outbound mpsc, the same FIFO the fan-out path uses, so one
/// connection's frames always keep their order.
pub struct ConnectionHandler {
    connection_id: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
    extension: Option<Extension>,
    identity: Option<Identity>,
    peer: String,
}

impl ConnectionHandler {
    pub fn new(
        connection_id: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
        peer: String,
    ) -> Self {
        Self {
            connection_id,
            tx,
            extension: None,
            identity: None,
            peer,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn extension(&self) -> Option<&Extension> {
        self.extension.as_ref()
    }

    pub fn set_extension(&mut self, extension: Extension) {
        self.extension = Some(extension);
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub fn is_addressed(&self) -> bool {
        self.extension.is_some()
    }

    pub fn tx(&self) -> &mpsc::UnboundedSender<ServerMessage> {
        &self.tx
    }

    /// Fire-and-forget reply to this connection.
    pub fn send(&self, msg: ServerMessage) {
        if self.tx.send(msg).is_err() {
            tracing::debug!(peer = %self.peer, "Reply dropped, connection channel closed");
        }
    }

    pub fn send_error(&self, code: &str, message: &str) {
        self.send(ServerMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        });
    }
}
