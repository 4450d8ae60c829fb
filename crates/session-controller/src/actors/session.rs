//! `SessionActor` - per-session actor that owns session state.
//!
//! Each `SessionActor`:
//! - Owns the connection monitor, billing engine, and reconnection
//!   controller for exactly one billed session
//! - Owns one outbound link per connected peer and relays negotiation
//!   messages between them
//! - Owns the session's timers (billing tick, reconnection retry, startup
//!   deadline) as cancellable scheduled tasks
//!
//! Every state transition flows through the actor's mailbox, so a racing
//! `connected` and `disconnected` can never be applied out of order, and a
//! billing tick can never interleave with settlement.
//!
//! # Teardown
//!
//! Teardown is one scoped operation on every exit path (settlement,
//! supervisor removal, process shutdown): cancel the billing timer, cancel
//! the pending retry, drop the startup deadline, remove registry
//! membership, and drop all peer links. A session that exits without
//! settling is settled with reason `cancelled` first - sessions never
//! disappear without a recorded reason.

use crate::billing::{BillingConfig, BillingEngine, Settlement};
use crate::config::Config;
use crate::errors::ScError;
use crate::monitor::{ConnectionMonitor, MonitorAction};
use crate::observability::CoreMetrics;
use crate::payment::PaymentGateway;
use crate::reconnect::ReconnectController;
use crate::registry::SessionRegistry;
use crate::store::{SessionPatch, SessionStore};
use crate::tasks::ScheduledTask;

use super::messages::{JoinResult, MemberInfo, SessionMessage, SessionSnapshot};

use chrono::Utc;
use common::{EndReason, ParticipantId, Role, SessionId, SessionStatus};
use signal_protocol::{RawConnectionSignal, SignalingMessage, WireMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// Timer parameters for one session, extracted from service config.
#[derive(Debug, Clone)]
pub struct SessionRuntimeConfig {
    pub billing_interval: Duration,
    pub proration_threshold: Duration,
    pub provider_share_percent: u8,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
    pub startup_deadline: Duration,
}

impl From<&Config> for SessionRuntimeConfig {
    fn from(config: &Config) -> Self {
        Self {
            billing_interval: config.billing_interval,
            proration_threshold: config.proration_threshold,
            provider_share_percent: config.provider_share_percent,
            reconnect_base_delay: config.reconnect_base_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            reconnect_max_attempts: config.reconnect_max_attempts,
            startup_deadline: config.startup_deadline,
        }
    }
}

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionActorHandle {
    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Join the session's relay room.
    pub async fn join(
        &self,
        participant_id: ParticipantId,
        role: Role,
        outbound: mpsc::Sender<WireMessage>,
    ) -> Result<JoinResult, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Join {
                participant_id,
                role,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Leave the session's relay room.
    pub async fn leave(&self, participant_id: ParticipantId) -> Result<(), ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Leave {
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Notify that a participant's transport dropped without a leave.
    pub async fn peer_closed(&self, participant_id: ParticipantId) -> Result<(), ScError> {
        self.sender
            .send(SessionMessage::PeerClosed { participant_id })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))
    }

    /// Relay a negotiation message.
    pub async fn signal(&self, message: SignalingMessage) -> Result<(), ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Signal {
                message,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Deliver a raw connectivity signal to the monitor.
    pub async fn raw_signal(
        &self,
        sender_id: ParticipantId,
        signal: RawConnectionSignal,
    ) -> Result<(), ScError> {
        self.sender
            .send(SessionMessage::RawSignal { sender_id, signal })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))
    }

    /// Explicitly pause billing.
    pub async fn pause_billing(&self, sender_id: ParticipantId) -> Result<(), ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::PauseBilling {
                sender_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Explicitly resume billing (connection must be live).
    pub async fn resume_billing(&self, sender_id: ParticipantId) -> Result<(), ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::ResumeBilling {
                sender_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// End the session and settle it.
    pub async fn end_session(&self, reason: EndReason) -> Result<Settlement, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::EndSession {
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get current session state.
    pub async fn get_state(&self) -> Result<SessionSnapshot, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Outbound link to one connected peer.
struct PeerLink {
    outbound: mpsc::Sender<WireMessage>,
    role: Role,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Sender side of the own mailbox, for timers.
    self_tx: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    runtime: SessionRuntimeConfig,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn SessionStore>,
    engine: BillingEngine,
    monitor: ConnectionMonitor,
    reconnect: ReconnectController,
    peers: HashMap<ParticipantId, PeerLink>,
    /// Offer/answer exchange has completed at least once.
    negotiated: bool,
    /// A charge failed at the last boundary; the next tick retries it.
    awaiting_charge_retry: bool,
    billing_timer: Option<ScheduledTask>,
    retry_timer: Option<ScheduledTask>,
    startup_timer: Option<ScheduledTask>,
    metrics: Arc<CoreMetrics>,
}

impl SessionActor {
    /// Spawn a session actor.
    ///
    /// Reads the session record and initializes billing; fails with
    /// `InsufficientFunds` before any signaling when the payer cannot
    /// afford one interval. The startup deadline starts counting here.
    pub async fn spawn(
        session_id: SessionId,
        registry: Arc<SessionRegistry>,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        runtime: SessionRuntimeConfig,
        metrics: Arc<CoreMetrics>,
        cancel_token: CancellationToken,
    ) -> Result<(SessionActorHandle, JoinHandle<()>), ScError> {
        let record = store.get_session(session_id).await?;
        if record.status.is_terminal() {
            return Err(ScError::Conflict("Session is already settled".to_string()));
        }

        let billing_config = BillingConfig {
            interval: runtime.billing_interval,
            proration_threshold: runtime.proration_threshold,
            provider_share_percent: runtime.provider_share_percent,
        };
        let engine =
            BillingEngine::initialize(&record, billing_config, Arc::clone(&store), gateway)?;

        if let Err(e) = store
            .update_session(session_id, SessionPatch::status(SessionStatus::Connecting))
            .await
        {
            warn!(
                target: "sc.actor.session",
                session_id = %session_id,
                error = %e,
                "Failed to mark session connecting"
            );
        }

        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let reconnect = ReconnectController::new(
            runtime.reconnect_base_delay,
            runtime.reconnect_max_delay,
            runtime.reconnect_max_attempts,
        );

        let startup_timer = ScheduledTask::once(
            runtime.startup_deadline,
            sender.clone(),
            SessionMessage::StartupDeadlineElapsed,
            &cancel_token,
        );

        let actor = Self {
            session_id,
            receiver,
            self_tx: sender.clone(),
            cancel_token: cancel_token.clone(),
            runtime,
            registry,
            store,
            engine,
            monitor: ConnectionMonitor::new(),
            reconnect,
            peers: HashMap::new(),
            negotiated: false,
            awaiting_charge_retry: false,
            billing_timer: None,
            retry_timer: None,
            startup_timer: Some(startup_timer),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        Ok((handle, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    if !self.engine.is_finalized() {
                        self.settle(EndReason::Cancelled).await;
                    }
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "sc.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            if !self.engine.is_finalized() {
                                self.settle(EndReason::Cancelled).await;
                            }
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            total_charged = self.engine.total_charged(),
            total_intervals = self.engine.total_intervals(),
            "SessionActor stopped"
        );
    }

    /// Handle a single message. Returns `true` when the actor should exit.
    async fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::Join {
                participant_id,
                role,
                outbound,
                respond_to,
            } => {
                let result = self.handle_join(participant_id, role, outbound).await;
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::Leave {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_leave(participant_id);
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::PeerClosed { participant_id } => {
                self.handle_peer_closed(participant_id);
                false
            }

            SessionMessage::Signal {
                message,
                respond_to,
            } => {
                let result = self.handle_signal(message).await;
                if result.is_err() {
                    self.metrics.relay_rejected();
                }
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::RawSignal { sender_id, signal } => {
                self.handle_raw_signal(sender_id, signal).await
            }

            SessionMessage::PauseBilling {
                sender_id,
                respond_to,
            } => {
                let result = self.handle_pause_billing(sender_id).await;
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::ResumeBilling {
                sender_id,
                respond_to,
            } => {
                let result = self.handle_resume_billing(sender_id).await;
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::EndSession { reason, respond_to } => {
                let settlement = self.settle(reason).await;
                let _ = respond_to.send(Ok(settlement));
                true
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
                false
            }

            SessionMessage::BillingTickDue => self.handle_billing_tick().await,

            SessionMessage::ReconnectDue => self.handle_reconnect_due().await,

            SessionMessage::StartupDeadlineElapsed => self.handle_startup_deadline().await,
        }
    }

    /// Handle a participant joining the relay room.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn handle_join(
        &mut self,
        participant_id: ParticipantId,
        role: Role,
        outbound: mpsc::Sender<WireMessage>,
    ) -> Result<JoinResult, ScError> {
        if self.engine.is_finalized() {
            return Err(ScError::Conflict("Session is already settled".to_string()));
        }

        // Only the booked parties may join: the provider as initiator,
        // the payer as responder.
        let expected = match role {
            Role::Initiator => self.engine.provider_id(),
            Role::Responder => self.engine.payer_id(),
        };
        if participant_id != expected {
            return Err(ScError::Authorization(
                "Participant is not a party to this session".to_string(),
            ));
        }

        let membership = self
            .registry
            .join(self.session_id, participant_id, role)?;

        self.peers.insert(participant_id, PeerLink { outbound, role });

        info!(
            target: "sc.actor.session",
            participant_id = %participant_id,
            role = %role,
            members = membership.len(),
            "Participant joined"
        );

        // A rejoin after negotiation was established asks the initiator
        // for a fresh offer, so the pair can reconnect without re-booking.
        if self.negotiated && !role.is_initiator() {
            self.send_to_initiator(WireMessage::Renegotiate {
                session_id: self.session_id,
                attempt: 0,
                restart: false,
            })
            .await;
        }

        Ok(JoinResult {
            members: membership
                .iter()
                .map(|(id, role)| MemberInfo {
                    participant_id: *id,
                    role: *role,
                })
                .collect(),
        })
    }

    /// Handle an explicit leave. Idempotent; relay bookkeeping only.
    fn handle_leave(&mut self, participant_id: ParticipantId) -> Result<(), ScError> {
        self.peers.remove(&participant_id);
        let remaining = self.registry.leave(self.session_id, participant_id);

        debug!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            participant_id = %participant_id,
            remaining = remaining.len(),
            "Participant left"
        );

        Ok(())
    }

    /// A transport dropped without a leave-room frame. Membership is
    /// released; the media connection itself may still be running, so
    /// liveness stays with the monitor's raw signals.
    fn handle_peer_closed(&mut self, participant_id: ParticipantId) {
        if self.peers.remove(&participant_id).is_some() {
            self.registry.leave(self.session_id, participant_id);
            debug!(
                target: "sc.actor.session",
                session_id = %self.session_id,
                participant_id = %participant_id,
                "Peer transport closed"
            );
        }
    }

    /// Relay a negotiation message to its target, or broadcast to all
    /// other members. Errors surface to the sender only.
    async fn handle_signal(&mut self, message: SignalingMessage) -> Result<(), ScError> {
        if message.session_id != self.session_id {
            return Err(ScError::Validation(
                "Frame does not belong to this session".to_string(),
            ));
        }

        if !self
            .registry
            .is_member(self.session_id, &message.sender_id)
        {
            return Err(ScError::Authorization(
                "Sender is not a member of this session".to_string(),
            ));
        }

        if message.payload.is_null() {
            return Err(ScError::Signaling("Empty negotiation payload".to_string()));
        }

        if message.kind == signal_protocol::SignalKind::Answer {
            self.negotiated = true;
        }

        match message.target_id {
            Some(target_id) => {
                if target_id == message.sender_id
                    || !self.registry.is_member(self.session_id, &target_id)
                {
                    return Err(ScError::Signaling("Unknown target".to_string()));
                }
                let Some(link) = self.peers.get(&target_id) else {
                    return Err(ScError::Signaling("Target is not connected".to_string()));
                };
                if link.outbound.send(message.into()).await.is_err() {
                    return Err(ScError::Signaling("Target is not reachable".to_string()));
                }
            }
            None => {
                let sender_id = message.sender_id;
                let frame: WireMessage = message.into();
                for (peer_id, link) in &self.peers {
                    if *peer_id != sender_id {
                        if let Err(e) = link.outbound.send(frame.clone()).await {
                            warn!(
                                target: "sc.actor.session",
                                session_id = %self.session_id,
                                peer_id = %peer_id,
                                error = %e,
                                "Failed to forward to peer"
                            );
                        }
                    }
                }
            }
        }

        self.metrics.relay_forwarded();
        Ok(())
    }

    /// Apply a raw connectivity signal through the monitor.
    /// Returns `true` when the resulting actions settled the session.
    async fn handle_raw_signal(
        &mut self,
        sender_id: ParticipantId,
        signal: RawConnectionSignal,
    ) -> bool {
        if !self.registry.is_member(self.session_id, &sender_id) {
            warn!(
                target: "sc.actor.session",
                session_id = %self.session_id,
                sender_id = %sender_id,
                "Connectivity signal from non-member ignored"
            );
            return false;
        }

        let actions = match self.monitor.observe(signal) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    signal = ?signal,
                    error = %e,
                    "Illegal connectivity transition ignored"
                );
                return false;
            }
        };

        for action in actions {
            if self.apply_monitor_action(action).await {
                return true;
            }
        }
        false
    }

    /// Apply one monitor action. Returns `true` when the session settled.
    async fn apply_monitor_action(&mut self, action: MonitorAction) -> bool {
        match action {
            MonitorAction::StartBilling => {
                self.start_billing().await;
                false
            }

            MonitorAction::PauseBilling => {
                self.engine.pause();
                self.billing_timer = None;
                self.awaiting_charge_retry = false;
                self.patch_status(SessionStatus::Paused).await;
                false
            }

            MonitorAction::BeginReconnect { urgent } => {
                self.schedule_retry(urgent);
                false
            }

            MonitorAction::ResetReconnect => {
                self.reconnect.reset();
                self.retry_timer = None;
                false
            }

            MonitorAction::Finalize { reason } => {
                self.settle(reason).await;
                true
            }
        }
    }

    /// Begin or continue billing; spawns the tick timer when billing was
    /// not already running (double start keeps the one timer).
    async fn start_billing(&mut self) {
        let first_start = !self.engine.has_started();

        if !self.engine.start(Instant::now(), Utc::now()) {
            return;
        }

        self.startup_timer = None;
        self.awaiting_charge_retry = false;

        if self.billing_timer.is_none() {
            self.billing_timer = Some(ScheduledTask::interval(
                self.runtime.billing_interval,
                self.self_tx.clone(),
                || SessionMessage::BillingTickDue,
                &self.cancel_token,
            ));
        }

        self.patch_status(SessionStatus::Active).await;

        if first_start {
            let started_at = self.engine.started_at_wall().unwrap_or_else(Utc::now);
            self.broadcast(WireMessage::SessionStarted {
                session_id: self.session_id,
                started_at,
            })
            .await;
        }
    }

    /// Schedule the next renegotiation attempt, unless one is pending.
    fn schedule_retry(&mut self, urgent: bool) {
        if self
            .retry_timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
        {
            return;
        }

        let delay = if urgent {
            Duration::ZERO
        } else {
            self.reconnect
                .delay_for(self.reconnect.attempts_issued() + 1)
        };

        self.retry_timer = Some(ScheduledTask::once(
            delay,
            self.self_tx.clone(),
            SessionMessage::ReconnectDue,
            &self.cancel_token,
        ));
    }

    /// A retry delay elapsed: issue a renegotiation restart through the
    /// initiator, or settle with `connection_failed` when the budget is
    /// exhausted. Returns `true` when the session settled.
    async fn handle_reconnect_due(&mut self) -> bool {
        if self.engine.is_finalized()
            || self.monitor.is_live()
            || self.monitor.is_terminated()
        {
            return false;
        }

        match self.reconnect.issue() {
            Some(attempt) => {
                info!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    attempt,
                    "Issuing renegotiation attempt"
                );
                self.metrics.reconnect_attempt();
                self.send_to_initiator(WireMessage::Renegotiate {
                    session_id: self.session_id,
                    attempt,
                    restart: true,
                })
                .await;

                let next_delay = self.reconnect.delay_for(attempt + 1);
                self.retry_timer = Some(ScheduledTask::once(
                    next_delay,
                    self.self_tx.clone(),
                    SessionMessage::ReconnectDue,
                    &self.cancel_token,
                ));
                false
            }
            None => {
                info!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    "Reconnection attempts exhausted"
                );
                self.settle(EndReason::ConnectionFailed).await;
                true
            }
        }
    }

    /// A billing interval elapsed. Returns `true` when the tick exhausted
    /// the balance and the session settled.
    async fn handle_billing_tick(&mut self) -> bool {
        if self.engine.is_finalized() {
            return false;
        }

        if !self.monitor.is_live() {
            // A stale tick raced a degradation; the timer is already
            // cancelled, never charge for it.
            debug!(
                target: "sc.actor.session",
                session_id = %self.session_id,
                "Tick while not live ignored"
            );
            return false;
        }

        // A failed charge leaves billing paused with the timer running;
        // this boundary is its retry point.
        if self.awaiting_charge_retry && !self.engine.is_active() {
            self.engine.start(Instant::now(), Utc::now());
            self.awaiting_charge_retry = false;
        }

        if !self.engine.is_active() {
            return false;
        }

        match self.engine.tick(Instant::now(), Utc::now()).await {
            Ok(outcome) => {
                self.metrics.tick_recorded();
                self.broadcast(WireMessage::BillingUpdate {
                    session_id: self.session_id,
                    interval_index: outcome.tick.interval_index,
                    charged_minor: outcome.tick.amount_minor,
                    balance_minor: outcome.tick.balance_after_minor,
                    total_charged_minor: self.engine.total_charged(),
                    ticked_at: outcome.tick.ticked_at,
                })
                .await;

                if outcome.exhausted {
                    // The next interval is unaffordable: settle now, never
                    // charge for service the payer cannot cover.
                    self.settle(EndReason::InsufficientFunds).await;
                    return true;
                }
                false
            }
            Err(ScError::PaymentGateway(e)) => {
                warn!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Charge failed, billing paused until next tick boundary"
                );
                self.metrics.payment_failure();
                self.engine.pause();
                self.awaiting_charge_retry = true;
                self.patch_status(SessionStatus::Paused).await;
                false
            }
            Err(e) => {
                warn!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Billing tick rejected"
                );
                false
            }
        }
    }

    /// Explicit pause from a participant.
    async fn handle_pause_billing(&mut self, sender_id: ParticipantId) -> Result<(), ScError> {
        if !self.registry.is_member(self.session_id, &sender_id) {
            return Err(ScError::Authorization(
                "Sender is not a member of this session".to_string(),
            ));
        }
        if self.engine.is_finalized() {
            return Err(ScError::Conflict("Session is already settled".to_string()));
        }

        self.engine.pause();
        self.billing_timer = None;
        self.awaiting_charge_retry = false;
        self.patch_status(SessionStatus::Paused).await;
        Ok(())
    }

    /// Explicit resume from a participant; only legal while live.
    async fn handle_resume_billing(&mut self, sender_id: ParticipantId) -> Result<(), ScError> {
        if !self.registry.is_member(self.session_id, &sender_id) {
            return Err(ScError::Authorization(
                "Sender is not a member of this session".to_string(),
            ));
        }
        if self.engine.is_finalized() {
            return Err(ScError::Conflict("Session is already settled".to_string()));
        }
        if !self.monitor.is_live() {
            return Err(ScError::Validation(
                "Cannot resume billing while the connection is not live".to_string(),
            ));
        }

        self.start_billing().await;
        Ok(())
    }

    /// The startup window elapsed. A session that never went live fails
    /// with no charge. Returns `true` when the session settled.
    async fn handle_startup_deadline(&mut self) -> bool {
        if self.engine.is_finalized() || self.engine.has_started() || self.monitor.is_live() {
            return false;
        }

        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            "Startup deadline elapsed without a live connection"
        );
        self.settle(EndReason::ConnectionFailed).await;
        true
    }

    /// Settle the session and tear down every per-session resource. This
    /// is the single teardown path: billing timer, retry timer, startup
    /// deadline, registry membership, and peer links all go together.
    async fn settle(&mut self, reason: EndReason) -> Settlement {
        let already_finalized = self.engine.is_finalized();

        self.billing_timer = None;
        self.retry_timer = None;
        self.startup_timer = None;
        self.monitor.terminate();

        let settlement = self
            .engine
            .finalize(reason, Instant::now(), Utc::now())
            .await;

        if !already_finalized {
            self.broadcast(WireMessage::SessionEnded {
                session_id: self.session_id,
                reason: settlement.reason,
                elapsed_minutes: settlement.elapsed_minutes,
                total_charged_minor: settlement.total_charged_minor,
            })
            .await;
            self.metrics.session_settled();
        }

        self.registry.remove_session(self.session_id);
        self.peers.clear();

        settlement
    }

    /// Send a frame to the initiator, if connected.
    async fn send_to_initiator(&self, frame: WireMessage) {
        let initiator = self
            .peers
            .iter()
            .find(|(_, link)| link.role.is_initiator());

        match initiator {
            Some((peer_id, link)) => {
                if let Err(e) = link.outbound.send(frame).await {
                    warn!(
                        target: "sc.actor.session",
                        session_id = %self.session_id,
                        peer_id = %peer_id,
                        error = %e,
                        "Failed to reach initiator"
                    );
                }
            }
            None => {
                debug!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    "No initiator connected for renegotiation request"
                );
            }
        }
    }

    /// Broadcast a frame to every connected peer.
    async fn broadcast(&self, frame: WireMessage) {
        for (peer_id, link) in &self.peers {
            if let Err(e) = link.outbound.send(frame.clone()).await {
                warn!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    peer_id = %peer_id,
                    error = %e,
                    "Failed to broadcast to peer"
                );
            }
        }
    }

    /// Move the persisted status through a non-terminal transition.
    /// Terminal statuses are written only by the billing engine.
    async fn patch_status(&self, status: SessionStatus) {
        if self.engine.is_finalized() {
            return;
        }
        if let Err(e) = self
            .store
            .update_session(self.session_id, SessionPatch::status(status))
            .await
        {
            warn!(
                target: "sc.actor.session",
                session_id = %self.session_id,
                status = ?status,
                error = %e,
                "Failed to persist status transition"
            );
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            connection_state: self.monitor.state(),
            members: self
                .registry
                .members(self.session_id)
                .map(|set| {
                    set.iter()
                        .map(|(id, role)| MemberInfo {
                            participant_id: *id,
                            role: *role,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            billing_active: self.engine.is_active(),
            is_finalized: self.engine.is_finalized(),
            total_charged_minor: self.engine.total_charged(),
            total_intervals: self.engine.total_intervals(),
            balance_minor: self.engine.balance(),
            reconnect_attempts: self.reconnect.attempts_issued(),
        }
    }
}
