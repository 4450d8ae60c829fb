//! `SessionSupervisor` - singleton supervisor for session actors.
//!
//! The supervisor is the top-level actor in the SC hierarchy:
//!
//! - Singleton per SC instance
//! - Creates and removes `SessionActor` instances (one per session id, so
//!   concurrent duplicate opens resolve to the same actor)
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Reaps settled or panicked child actors via their `JoinHandle`s
//!
//! # Graceful Shutdown
//!
//! On SIGTERM the supervisor stops accepting new sessions, cancels the
//! root token (which propagates to every session's timers and tasks), and
//! waits for sessions to settle with reason `cancelled`.

use crate::config::Config;
use crate::errors::ScError;
use crate::observability::CoreMetrics;
use crate::payment::PaymentGateway;
use crate::registry::SessionRegistry;
use crate::store::SessionStore;

use super::messages::{SupervisorMessage, SupervisorStatus};
use super::session::{SessionActor, SessionActorHandle, SessionRuntimeConfig};

use common::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the supervisor mailbox.
const SUPERVISOR_CHANNEL_BUFFER: usize = 1024;

/// Handle to the `SessionSupervisor`.
#[derive(Clone)]
pub struct SessionSupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    cancel_token: CancellationToken,
}

impl SessionSupervisorHandle {
    /// Create a new supervisor and return a handle to it.
    #[must_use]
    pub fn new(
        config: Config,
        registry: Arc<SessionRegistry>,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(SUPERVISOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionSupervisor {
            sc_id: config.sc_id.clone(),
            max_sessions: config.max_sessions,
            runtime: SessionRuntimeConfig::from(&config),
            receiver,
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            accepting_new: true,
            registry,
            store,
            gateway,
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Get or create the session actor for a session id.
    ///
    /// Creation initializes billing and fails with `InsufficientFunds`
    /// before any signaling is relayed.
    pub async fn open_session(
        &self,
        session_id: SessionId,
    ) -> Result<SessionActorHandle, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::OpenSession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a session actor.
    pub async fn remove_session(&self, session_id: SessionId) -> Result<(), ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::RemoveSession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current supervisor status.
    pub async fn get_status(&self) -> Result<SupervisorStatus, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the supervisor (immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the supervisor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for auxiliary tasks.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `SessionSupervisor` implementation.
struct SessionSupervisor {
    sc_id: String,
    max_sessions: u32,
    runtime: SessionRuntimeConfig,
    receiver: mpsc::Receiver<SupervisorMessage>,
    cancel_token: CancellationToken,
    sessions: HashMap<SessionId, ManagedSession>,
    accepting_new: bool,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    metrics: Arc<CoreMetrics>,
}

impl SessionSupervisor {
    /// Run the supervisor message loop.
    #[instrument(skip_all, name = "sc.actor.supervisor", fields(sc_id = %self.sc_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.supervisor",
            sc_id = %self.sc_id,
            "SessionSupervisor started"
        );

        loop {
            self.reap_finished_sessions().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.supervisor",
                        sc_id = %self.sc_id,
                        "SessionSupervisor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.supervisor",
                                sc_id = %self.sc_id,
                                "SessionSupervisor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.supervisor",
            sc_id = %self.sc_id,
            sessions_remaining = self.sessions.len(),
            "SessionSupervisor stopped"
        );
    }

    async fn handle_message(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::OpenSession {
                session_id,
                respond_to,
            } => {
                let result = self.open_session(session_id).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::RemoveSession {
                session_id,
                respond_to,
            } => {
                let result = self.remove_session(session_id);
                let _ = respond_to.send(result);
            }

            SupervisorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(SupervisorStatus {
                    session_count: self.sessions.len(),
                    is_draining: !self.accepting_new,
                });
            }

            SupervisorMessage::Shutdown { respond_to } => {
                info!(
                    target: "sc.actor.supervisor",
                    sc_id = %self.sc_id,
                    session_count = self.sessions.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    /// Get or create a session actor. Duplicate opens return the existing
    /// actor, which makes billing initialization idempotent per session.
    async fn open_session(
        &mut self,
        session_id: SessionId,
    ) -> Result<SessionActorHandle, ScError> {
        let stale = match self.sessions.get(&session_id) {
            Some(managed) if !managed.task_handle.is_finished() => {
                return Ok(managed.handle.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            // Settled actor not yet reaped; a fresh open on a settled
            // session will fail below on the terminal status check.
            self.sessions.remove(&session_id);
        }

        if !self.accepting_new {
            return Err(ScError::Draining);
        }

        if self.sessions.len() >= self.max_sessions as usize {
            return Err(ScError::CapacityExceeded);
        }

        let session_token = self.cancel_token.child_token();
        let (handle, task_handle) = SessionActor::spawn(
            session_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.runtime.clone(),
            Arc::clone(&self.metrics),
            session_token,
        )
        .await?;

        self.sessions.insert(
            session_id,
            ManagedSession {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.session_opened();

        info!(
            target: "sc.actor.supervisor",
            sc_id = %self.sc_id,
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session actor created"
        );

        Ok(handle)
    }

    /// Remove a session actor; cleanup is awaited in the background so the
    /// supervisor mailbox never blocks on a slow child.
    fn remove_session(&mut self, session_id: SessionId) -> Result<(), ScError> {
        match self.sessions.remove(&session_id) {
            Some(managed) => {
                managed.handle.cancel();

                let sc_id = self.sc_id.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                        Ok(Ok(())) => {
                            debug!(
                                target: "sc.actor.supervisor",
                                sc_id = %sc_id,
                                session_id = %session_id,
                                "Session actor task completed cleanly"
                            );
                        }
                        Ok(Err(e)) => {
                            warn!(
                                target: "sc.actor.supervisor",
                                sc_id = %sc_id,
                                session_id = %session_id,
                                error = ?e,
                                "Session actor task panicked during removal"
                            );
                        }
                        Err(_) => {
                            warn!(
                                target: "sc.actor.supervisor",
                                sc_id = %sc_id,
                                session_id = %session_id,
                                "Session actor cleanup timed out"
                            );
                        }
                    }
                });

                Ok(())
            }
            None => Err(ScError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Reap session actors whose tasks have finished (settled sessions
    /// exit their loop; a panic is logged and the slot released).
    async fn reap_finished_sessions(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for session_id in finished {
            if let Some(managed) = self.sessions.remove(&session_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        info!(
                            target: "sc.actor.supervisor",
                            sc_id = %self.sc_id,
                            session_id = %session_id,
                            "Session actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "sc.actor.supervisor",
                                sc_id = %self.sc_id,
                                session_id = %session_id,
                                error = ?join_error,
                                "Session actor panicked"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Cancel all sessions and wait for them to settle.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sc.actor.supervisor",
            sc_id = %self.sc_id,
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.supervisor",
                        sc_id = %self.sc_id,
                        session_id = %session_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.supervisor",
                        sc_id = %self.sc_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.supervisor",
                        sc_id = %self.sc_id,
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "sc.actor.supervisor",
            sc_id = %self.sc_id,
            "Graceful shutdown complete"
        );
    }
}
