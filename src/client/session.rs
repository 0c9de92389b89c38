//! Client session controller.
//!
//! Owns the local call state machine (Idle / Calling / Ringing /
//! Connected), coalesces routing hints before sending, and drives
//! reconnection with capped exponential backoff. Explicit shutdown cancels
//! any pending retry timer deterministically; a successful reconnect never
//! silently resumes a call, it resets local state and reports
//! `SessionEvent::Reconnected` so the application can re-probe the peer.

use super::backoff::{Backoff, BackoffConfig};
use super::batcher::{BatcherConfig, HintBatcher};
use super::transport::{Connector, Transport};
use crate::config::ClientConfig;
use crate::error::{SignalError, SignalResult};
use crate::gate;
use crate::message::{ClientMessage, ServerMessage, SessionDescription};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    Connected,
}

/// Ephemeral per-call state. Created on initiate or incoming ring,
/// destroyed on hangup, rejection, failure or reset.
#[derive(Debug)]
pub struct CallSession {
    state: CallState,
    remote: Option<String>,
    connected_at: Option<Instant>,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            remote: None,
            connected_at: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    /// Idle -> Calling.
    pub fn initiate(&mut self, remote: &str) -> Result<(), CallState> {
        if self.state != CallState::Idle {
            return Err(self.state);
        }
        self.state = CallState::Calling;
        self.remote = Some(remote.to_string());
        Ok(())
    }

    /// Idle -> Ringing.
    pub fn ring(&mut self, remote: &str) -> Result<(), CallState> {
        if self.state != CallState::Idle {
            return Err(self.state);
        }
        self.state = CallState::Ringing;
        self.remote = Some(remote.to_string());
        Ok(())
    }

    /// Calling | Ringing -> Connected. Starts duration accounting.
    pub fn establish(&mut self) -> Result<(), CallState> {
        if !matches!(self.state, CallState::Calling | CallState::Ringing) {
            return Err(self.state);
        }
        self.state = CallState::Connected;
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    /// Back to Idle from anywhere; yields the call duration if one was
    /// connected.
    pub fn reset(&mut self) -> Option<Duration> {
        let duration = self.connected_at.take().map(|t| t.elapsed());
        self.state = CallState::Idle;
        self.remote = None;
        duration
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands the application sends to the controller.
#[derive(Debug)]
pub enum SessionCommand {
    Call {
        target: String,
        offer: SessionDescription,
    },
    Accept {
        caller: String,
        answer: SessionDescription,
    },
    Hint(String),
    Hangup,
    Reject {
        caller: String,
    },
    Shutdown,
}

/// Everything the controller reports back to the application.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    AddressAssigned {
        address: String,
    },
    IncomingCall {
        caller: String,
        offer: SessionDescription,
    },
    CallAnswered {
        callee: String,
        answer: SessionDescription,
    },
    HintReceived {
        from: String,
        hint: String,
    },
    RemoteHangup {
        from: String,
        duration: Option<Duration>,
    },
    CallFailed {
        reason: String,
    },
    CallEnded {
        duration: Option<Duration>,
    },
    ServerError {
        code: String,
        message: String,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Transport restored. Call state was NOT resumed; re-probe the peer.
    Reconnected,
    /// Retry budget spent. `forced_hangup` carries the duration of the call
    /// that was torn down locally, if one was connected.
    Terminated {
        attempts: u32,
        forced_hangup: Option<Duration>,
    },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub backoff: BackoffConfig,
    pub batcher: BatcherConfig,
    /// Opaque credential forwarded in the connect handshake.
    pub token: Option<String>,
}

/// The backoff and batching knobs live in `ClientConfig` so they are
/// env-tunable alongside everything else; this is the one place they are
/// translated into the controller's own config types.
impl From<&ClientConfig> for SessionConfig {
    fn from(client: &ClientConfig) -> Self {
        Self {
            backoff: BackoffConfig {
                base: client.backoff_base,
                cap: client.backoff_cap,
                max_attempts: client.backoff_max_attempts,
                jitter: client.backoff_jitter,
            },
            batcher: BatcherConfig {
                max_batch: client.hint_batch_size,
                max_delay: client.hint_batch_delay,
            },
            token: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Application-facing side of the controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn call(&self, target: &str, offer: SessionDescription) -> SignalResult<()> {
        if !gate::is_valid_address(target) {
            return Err(SignalError::Validation(
                crate::gate::RejectReason::MalformedAddress,
            ));
        }
        self.command(SessionCommand::Call {
            target: target.to_string(),
            offer,
        })
    }

    pub fn accept(&self, caller: &str, answer: SessionDescription) -> SignalResult<()> {
        if !gate::is_valid_address(caller) {
            return Err(SignalError::Validation(
                crate::gate::RejectReason::MalformedAddress,
            ));
        }
        self.command(SessionCommand::Accept {
            caller: caller.to_string(),
            answer,
        })
    }

    pub fn hint(&self, candidate: &str) -> SignalResult<()> {
        self.command(SessionCommand::Hint(candidate.to_string()))
    }

    pub fn hangup(&self) -> SignalResult<()> {
        self.command(SessionCommand::Hangup)
    }

    pub fn reject(&self, caller: &str) -> SignalResult<()> {
        self.command(SessionCommand::Reject {
            caller: caller.to_string(),
        })
    }

    pub fn shutdown(&self) -> SignalResult<()> {
        self.command(SessionCommand::Shutdown)
    }

    fn command(&self, cmd: SessionCommand) -> SignalResult<()> {
        self.commands
            .send(cmd)
            .map_err(|_| SignalError::TransportLost("session controller stopped".to_string()))
    }
}

pub struct SessionController<C: Connector> {
    connector: C,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    session: CallSession,
    batcher: HintBatcher,
    backoff: Backoff,
    address: Option<String>,
    ever_connected: bool,
}

enum Step {
    Inbound(Option<SignalResult<ServerMessage>>),
    Command(Option<SessionCommand>),
    FlushDue,
}

/// Why the inner connected loop ended.
enum LoopEnd {
    TransportLost,
    Shutdown,
}

impl<C: Connector> SessionController<C> {
    pub fn new(
        connector: C,
        config: SessionConfig,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.backoff.clone());
        let batcher = HintBatcher::new(config.batcher.clone());
        let controller = Self {
            connector,
            config,
            commands: cmd_rx,
            events: event_tx,
            session: CallSession::new(),
            batcher,
            backoff,
            address: None,
            ever_connected: false,
        };
        (controller, SessionHandle { commands: cmd_tx }, event_rx)
    }

    /// Runs until shutdown or retry-budget exhaustion.
    pub async fn run(mut self) {
        loop {
            match self.connector.connect().await {
                Ok(mut transport) => {
                    let resumed_after_failure = self.ever_connected || self.backoff.attempts() > 0;
                    self.backoff.reset();
                    self.ever_connected = true;
                    self.address = None;
                    // A restored transport does not imply the remote peer
                    // survived; drop any call state and let the app re-probe.
                    if let Some(duration) = self.session.reset() {
                        self.emit(SessionEvent::CallEnded {
                            duration: Some(duration),
                        });
                    }
                    self.batcher.drain();
                    if resumed_after_failure {
                        self.emit(SessionEvent::Reconnected);
                    }

                    let handshake = ClientMessage::Connect {
                        token: self.config.token.clone(),
                    };
                    if transport.send(handshake).await.is_err() {
                        // Fall through to the backoff path below.
                    } else if matches!(self.connected_loop(&mut transport).await, LoopEnd::Shutdown)
                    {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Connect attempt failed");
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempts();
                tracing::warn!(
                    error = %SignalError::ReconnectExhausted { attempts },
                    "Giving up on the server"
                );
                let forced_hangup = self.session.reset();
                self.emit(SessionEvent::Terminated {
                    attempts,
                    forced_hangup,
                });
                return;
            };
            self.emit(SessionEvent::Reconnecting {
                attempt: self.backoff.attempts(),
                delay,
            });
            if !self.wait_before_retry(delay).await {
                return;
            }
        }
    }

    /// Sleeps out the backoff delay while still serving commands. Returns
    /// false when shutdown arrived; the pending retry is cancelled with it.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => return false,
                    Some(SessionCommand::Hangup) => {
                        let duration = self.session.reset();
                        self.emit(SessionEvent::CallEnded { duration });
                    }
                    Some(_) => {
                        self.emit(SessionEvent::CallFailed {
                            reason: "not connected".to_string(),
                        });
                    }
                },
            }
        }
    }

    async fn connected_loop(&mut self, transport: &mut C::Transport) -> LoopEnd {
        loop {
            let deadline = self.batcher.deadline();
            let step = tokio::select! {
                inbound = transport.recv() => Step::Inbound(inbound),
                cmd = self.commands.recv() => Step::Command(cmd),
                _ = sleep_until_opt(deadline) => Step::FlushDue,
            };

            match step {
                Step::Inbound(Some(Ok(msg))) => self.handle_server(msg),
                Step::Inbound(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Transport error");
                    return LoopEnd::TransportLost;
                }
                Step::Inbound(None) => return LoopEnd::TransportLost,
                Step::Command(None) | Step::Command(Some(SessionCommand::Shutdown)) => {
                    return LoopEnd::Shutdown;
                }
                Step::Command(Some(cmd)) => {
                    if self.handle_command(cmd, transport).await.is_err() {
                        return LoopEnd::TransportLost;
                    }
                }
                Step::FlushDue => {
                    if let Some(batch) = self.batcher.flush_due(Instant::now()) {
                        if self.send_hints(transport, batch).await.is_err() {
                            return LoopEnd::TransportLost;
                        }
                    }
                }
            }
        }
    }

    fn handle_server(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::AddressAssigned { address } => {
                self.address = Some(address.clone());
                self.emit(SessionEvent::AddressAssigned { address });
            }
            ServerMessage::IncomingCall {
                caller_address,
                offer,
            } => {
                // When busy the state is left alone; the application is
                // expected to reject the caller explicitly.
                let _ = self.session.ring(&caller_address);
                self.emit(SessionEvent::IncomingCall {
                    caller: caller_address,
                    offer,
                });
            }
            ServerMessage::CallAnswered {
                callee_address,
                answer,
            } => {
                let _ = self.session.establish();
                self.emit(SessionEvent::CallAnswered {
                    callee: callee_address,
                    answer,
                });
            }
            ServerMessage::RoutingHint { from_address, hint } => {
                self.emit(SessionEvent::HintReceived {
                    from: from_address,
                    hint,
                });
            }
            ServerMessage::Hangup { from_address } => {
                self.batcher.drain();
                let duration = self.session.reset();
                self.emit(SessionEvent::RemoteHangup {
                    from: from_address,
                    duration,
                });
            }
            ServerMessage::CallFailed { reason } => {
                self.batcher.drain();
                self.session.reset();
                self.emit(SessionEvent::CallFailed { reason });
            }
            ServerMessage::Error { code, message } => {
                // Rate-limited call setup is an immediate user-facing
                // failure, not something to retry blindly.
                if code == "rate-limited" && self.session.state() == CallState::Calling {
                    self.session.reset();
                    self.emit(SessionEvent::CallFailed {
                        reason: message.clone(),
                    });
                }
                self.emit(SessionEvent::ServerError { code, message });
            }
        }
    }

    async fn handle_command(
        &mut self,
        cmd: SessionCommand,
        transport: &mut C::Transport,
    ) -> SignalResult<()> {
        match cmd {
            SessionCommand::Call { target, offer } => {
                if self.session.initiate(&target).is_err() {
                    self.emit(SessionEvent::CallFailed {
                        reason: "already in a call".to_string(),
                    });
                    return Ok(());
                }
                transport
                    .send(ClientMessage::CallInitiate {
                        target_address: target,
                        offer,
                    })
                    .await
            }
            SessionCommand::Accept { caller, answer } => {
                if self.session.state() != CallState::Ringing {
                    self.emit(SessionEvent::CallFailed {
                        reason: "no incoming call".to_string(),
                    });
                    return Ok(());
                }
                let _ = self.session.establish();
                transport
                    .send(ClientMessage::CallAccept {
                        caller_address: caller,
                        answer,
                    })
                    .await
            }
            SessionCommand::Hint(candidate) => {
                if self.session.remote().is_none() {
                    // No call in flight; hints have nowhere to go.
                    return Ok(());
                }
                if let Some(batch) = self.batcher.push(candidate, Instant::now()) {
                    self.send_hints(transport, batch).await?;
                }
                Ok(())
            }
            SessionCommand::Hangup => {
                let remote = self.session.remote().map(str::to_string);
                self.batcher.drain();
                let duration = self.session.reset();
                self.emit(SessionEvent::CallEnded { duration });
                if let Some(remote) = remote {
                    transport
                        .send(ClientMessage::Hangup {
                            target_address: remote,
                        })
                        .await?;
                }
                Ok(())
            }
            SessionCommand::Reject { caller } => {
                if self.session.state() == CallState::Ringing {
                    self.session.reset();
                }
                transport
                    .send(ClientMessage::Reject {
                        caller_address: caller,
                    })
                    .await
            }
            SessionCommand::Shutdown => unreachable!("handled by the caller"),
        }
    }

    /// One flush becomes one frame: candidates are newline-joined into a
    /// single line-oriented hint payload, which is what buys the message
    /// reduction under bursty candidate generation.
    async fn send_hints(
        &mut self,
        transport: &mut C::Transport,
        batch: Vec<String>,
    ) -> SignalResult<()> {
        let Some(remote) = self.session.remote().map(str::to_string) else {
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }
        transport
            .send(ClientMessage::RoutingHint {
                target_address: remote,
                hint: batch.join("\n"),
            })
            .await
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending().await,
    }
}
