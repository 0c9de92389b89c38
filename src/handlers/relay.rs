//! The protocol state machine.
//!
//! A connection moves Unaddressed -> Addressed once, on `connect`; after
//! that every call-scoped message is stateless routing. The relay holds no
//! per-call state: call state lives only at the two clients.
//!
//! Every inbound handler touches the directory entry first, then runs the
//! validation gate and the rate limiter before any routing decision.

use super::connection::ConnectionHandler;
use crate::context::AppContext;
use crate::directory::Extension;
use crate::error::SignalError;
use crate::events::SignalEvent;
use crate::gate;
use crate::message::{ClientMessage, ServerMessage, SessionDescription};

/// Reason handed back to a caller when the target address resolves to
/// nothing live.
pub const REASON_NOT_FOUND: &str = "not found";
/// Reason delivered to a caller whose call the callee declined.
pub const REASON_REJECTED: &str = "rejected";

/// Handles one inbound message. Returns false when the connection must be
/// closed (fatal error or rejected handshake).
pub async fn handle_message(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    msg: ClientMessage,
) -> bool {
    // Liveness refresh before any other action.
    if let Err(e) = ctx.directory.touch(handler.connection_id()).await {
        tracing::warn!(error = %e, connection_id = %handler.connection_id(), "Directory touch failed");
    }

    let kind = msg.kind();

    if let Err(reason) = gate::validate(&msg) {
        ctx.events.record(SignalEvent::ValidationRejected {
            connection_id: handler.connection_id(),
            reason: &reason,
        });
        let silent = kind.map(|k| k.is_best_effort()).unwrap_or(false);
        if !silent {
            handler.send_error(
                SignalError::Validation(reason.clone()).wire_code(),
                &reason.to_string(),
            );
        }
        return true;
    }

    if let Some(kind) = kind {
        if !ctx.limiter.allow(handler.connection_id(), kind) {
            ctx.events.record(SignalEvent::RateLimitDenied {
                connection_id: handler.connection_id(),
                kind,
            });
            // Denied hints vanish quietly; denied call setup surfaces so
            // the user sees the failure instead of a ghost call.
            if !kind.is_best_effort() {
                let err = SignalError::RateLimitExceeded { kind: kind.as_str() };
                handler.send_error(err.wire_code(), &err.to_string());
            }
            return true;
        }
    }

    match msg {
        ClientMessage::Connect { token } => handle_connect(handler, ctx, token).await,
        ClientMessage::CallInitiate {
            target_address,
            offer,
        } => handle_call_initiate(handler, ctx, target_address, offer).await,
        ClientMessage::CallAccept {
            caller_address,
            answer,
        } => handle_call_accept(handler, ctx, caller_address, answer).await,
        ClientMessage::RoutingHint {
            target_address,
            hint,
        } => handle_routing_hint(handler, ctx, target_address, hint).await,
        ClientMessage::Hangup { target_address } => {
            handle_hangup(handler, ctx, target_address).await
        }
        ClientMessage::Reject { caller_address } => {
            handle_reject(handler, ctx, caller_address).await
        }
    }
}

async fn handle_connect(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    token: Option<String>,
) -> bool {
    if handler.is_addressed() {
        handler.send_error("already-connected", "this connection already holds an extension");
        return true;
    }

    // Authorization runs before any directory interaction.
    let token = token.map(|t| gate::sanitize_text(&t));
    let identity = match ctx.auth.authorize(token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            handler.send_error(e.wire_code(), "connection not authorized");
            return false;
        }
    };

    let extension = match ctx.directory.assign(handler.connection_id()).await {
        Ok(extension) => extension,
        Err(e) => {
            tracing::error!(connection_id = %handler.connection_id(), error = %e, "Extension assignment failed");
            handler.send_error(e.wire_code(), "could not assign extension");
            // Exhaustion closes the connection; a store hiccup leaves it
            // open for another connect attempt.
            return !e.is_fatal();
        }
    };

    handler.set_identity(identity);
    handler.set_extension(extension.clone());
    ctx.clients
        .write()
        .await
        .insert(handler.connection_id().to_string(), handler.tx().clone());

    ctx.events.record(SignalEvent::Connected {
        connection_id: handler.connection_id(),
        address: extension.as_str(),
    });
    handler.send(ServerMessage::AddressAssigned {
        address: extension.to_string(),
    });
    true
}

async fn handle_call_initiate(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    target_address: String,
    offer: SessionDescription,
) -> bool {
    let Some(self_address) = require_addressed(handler) else {
        return true;
    };

    match resolve(ctx, &target_address).await {
        Some(target_connection) => {
            ctx.events.record(SignalEvent::CallInitiated {
                from: self_address.as_str(),
                to: &target_address,
            });
            deliver(
                ctx,
                &target_connection,
                ServerMessage::IncomingCall {
                    caller_address: self_address.to_string(),
                    offer,
                },
            )
            .await;
        }
        None => {
            handler.send(ServerMessage::CallFailed {
                reason: REASON_NOT_FOUND.to_string(),
            });
        }
    }
    true
}

async fn handle_call_accept(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    caller_address: String,
    answer: SessionDescription,
) -> bool {
    let Some(self_address) = require_addressed(handler) else {
        return true;
    };

    match resolve(ctx, &caller_address).await {
        Some(caller_connection) => {
            deliver(
                ctx,
                &caller_connection,
                ServerMessage::CallAnswered {
                    callee_address: self_address.to_string(),
                    answer,
                },
            )
            .await;
        }
        None => {
            handler.send_error(
                SignalError::TargetNotFound.wire_code(),
                "caller is no longer connected",
            );
        }
    }
    true
}

async fn handle_routing_hint(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    target_address: String,
    hint: String,
) -> bool {
    let Some(self_address) = require_addressed(handler) else {
        return true;
    };

    // Hints are best-effort: a vanished target is not an error.
    if let Some(target_connection) = resolve(ctx, &target_address).await {
        deliver(
            ctx,
            &target_connection,
            ServerMessage::RoutingHint {
                from_address: self_address.to_string(),
                hint,
            },
        )
        .await;
    }
    true
}

async fn handle_hangup(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    target_address: String,
) -> bool {
    let Some(self_address) = require_addressed(handler) else {
        return true;
    };

    if let Some(target_connection) = resolve(ctx, &target_address).await {
        deliver(
            ctx,
            &target_connection,
            ServerMessage::Hangup {
                from_address: self_address.to_string(),
            },
        )
        .await;
    }
    true
}

async fn handle_reject(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    caller_address: String,
) -> bool {
    let Some(_) = require_addressed(handler) else {
        return true;
    };

    if let Some(caller_connection) = resolve(ctx, &caller_address).await {
        deliver(
            ctx,
            &caller_connection,
            ServerMessage::CallFailed {
                reason: REASON_REJECTED.to_string(),
            },
        )
        .await;
    }
    true
}

/// Teardown on transport close. Idempotent.
pub async fn handle_disconnect(handler: &ConnectionHandler, ctx: &AppContext) {
    if let Err(e) = ctx.directory.release(handler.connection_id()).await {
        tracing::warn!(error = %e, connection_id = %handler.connection_id(), "Directory release failed");
    }
    ctx.clients.write().await.remove(handler.connection_id());
    ctx.limiter.release(handler.connection_id());
    ctx.events.record(SignalEvent::Disconnected {
        connection_id: handler.connection_id(),
    });
}

fn require_addressed(handler: &ConnectionHandler) -> Option<Extension> {
    match handler.extension() {
        Some(ext) => Some(ext.clone()),
        None => {
            handler.send_error("not-connected", "send connect before call messages");
            None
        }
    }
}

/// Resolves an address, treating store timeouts as misses. The timeout is
/// logged on its own so operators can tell a slow store from a dead target.
async fn resolve(ctx: &AppContext, address: &str) -> Option<String> {
    let extension = Extension::parse(address)?;
    match ctx.directory.resolve(&extension).await {
        Ok(found) => found,
        Err(SignalError::StoreTimeout(t)) => {
            tracing::warn!(address = %address, timeout = ?t, "Store timeout during resolve, treating as miss");
            None
        }
        Err(e) => {
            tracing::error!(address = %address, error = %e, "Resolve failed, treating as miss");
            None
        }
    }
}

/// Local delivery when this process holds the target, fan-out otherwise.
async fn deliver(ctx: &AppContext, target_connection: &str, msg: ServerMessage) {
    let local_tx = {
        let guard = ctx.clients.read().await;
        guard.get(target_connection).cloned()
    };

    if let Some(tx) = local_tx {
        if tx.send(msg).is_err() {
            tracing::debug!(target = %target_connection, "Local delivery raced a disconnect, dropping");
        }
        return;
    }

    match &ctx.bridge {
        Some(bridge) => {
            if let Err(e) = bridge.publish(target_connection, msg).await {
                tracing::warn!(target = %target_connection, error = %e, "Fan-out publish failed");
            }
        }
        None => {
            tracing::debug!(target = %target_connection, "Target not held and no bridge configured, dropping");
        }
    }
}
