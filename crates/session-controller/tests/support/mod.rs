//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use common::{MinorUnits, ParticipantId, Role, SessionId, SessionStatus};
use session_controller::actors::{SessionActorHandle, SessionSupervisorHandle};
use session_controller::config::Config;
use session_controller::observability::CoreMetrics;
use session_controller::payment::{PaymentGateway, RecordingGateway};
use session_controller::registry::SessionRegistry;
use session_controller::store::{InMemorySessionStore, SessionRecord, SessionStore};
use signal_protocol::WireMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Deterministic test configuration (canonical intervals).
pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        health_bind_address: "127.0.0.1:0".to_string(),
        sc_id: "sc-test".to_string(),
        max_sessions: 16,
        billing_interval: Duration::from_secs(60),
        proration_threshold: Duration::from_secs(30),
        reconnect_base_delay: Duration::from_secs(1),
        reconnect_max_delay: Duration::from_secs(16),
        reconnect_max_attempts: 5,
        startup_deadline: Duration::from_secs(90),
        provider_share_percent: 70,
    }
}

/// One fully wired service instance over in-memory collaborators.
pub struct TestHarness {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<InMemorySessionStore>,
    pub gateway: Arc<RecordingGateway>,
    pub metrics: Arc<CoreMetrics>,
    pub supervisor: SessionSupervisorHandle,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(InMemorySessionStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let metrics = CoreMetrics::new();
        let supervisor = SessionSupervisorHandle::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::clone(&metrics),
        );
        Self {
            registry,
            store,
            gateway,
            metrics,
            supervisor,
        }
    }

    /// Seed an accepted session record and return it.
    pub fn seed_session(&self, rate: MinorUnits, balance: MinorUnits) -> SessionRecord {
        let record = SessionRecord {
            id: SessionId::new(),
            provider_id: ParticipantId::new(),
            rate_per_interval: rate,
            payer_id: ParticipantId::new(),
            payer_balance_minor: balance,
            status: SessionStatus::Accepted,
            requested_at: Utc::now(),
            accepted_at: Some(Utc::now()),
            started_at: None,
            ended_at: None,
            total_charged_minor: 0,
            total_intervals: 0,
        };
        self.store.insert(record.clone());
        record
    }
}

/// A joined peer with its outbound frame stream.
pub struct Peer {
    pub id: ParticipantId,
    pub rx: mpsc::Receiver<WireMessage>,
}

impl Peer {
    /// Drain every frame queued so far.
    pub fn drain(&mut self) -> Vec<WireMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Join a participant and return its peer handle.
pub async fn join_peer(handle: &SessionActorHandle, id: ParticipantId, role: Role) -> Peer {
    let (tx, rx) = mpsc::channel(64);
    handle
        .join(id, role, tx)
        .await
        .expect("join should succeed");
    Peer { id, rx }
}

/// Let background timers fire and the actor drain its mailbox.
/// (With paused time this advances the clock by only 10ms.)
pub async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
