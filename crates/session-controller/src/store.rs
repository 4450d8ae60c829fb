//! Persistent store collaborator.
//!
//! The core reads the provider rate and payer balance at initialize and
//! writes status, timestamps, and totals at finalize. It does not own the
//! broader schema (user profiles, catalog, forums); those belong to the
//! surrounding platform.

use crate::errors::ScError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MinorUnits, ParticipantId, SessionId, SessionStatus};
use dashmap::DashMap;

/// A session as persisted by the platform.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    /// Rate-setting party.
    pub provider_id: ParticipantId,
    /// Charge per billing interval, minor units.
    pub rate_per_interval: MinorUnits,
    /// Paying party.
    pub payer_id: ParticipantId,
    /// Payer balance at last read, minor units.
    pub payer_balance_minor: MinorUnits,
    pub status: SessionStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_charged_minor: MinorUnits,
    pub total_intervals: u32,
}

/// Partial update applied to a session record.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_charged_minor: Option<MinorUnits>,
    pub total_intervals: Option<u32>,
    pub payer_balance_minor: Option<MinorUnits>,
}

impl SessionPatch {
    /// A patch that only moves status.
    #[must_use]
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Persistence operations the core consumes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session record.
    async fn get_session(&self, id: SessionId) -> Result<SessionRecord, ScError>;

    /// Apply a partial update. Status transitions are monotonic: a patch
    /// that would move a terminal session back to a non-terminal status
    /// must be rejected.
    async fn update_session(&self, id: SessionId, patch: SessionPatch) -> Result<(), ScError>;
}

/// In-memory store for the dev binary and tests.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, SessionRecord>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Seed a record (the booking flow is external to the core).
    pub fn insert(&self, record: SessionRecord) {
        self.sessions.insert(record.id, record);
    }

    /// Read back a record, for assertions.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionRecord> {
        self.sessions.get(&id).map(|r| r.clone())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, id: SessionId) -> Result<SessionRecord, ScError> {
        self.sessions
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| ScError::SessionNotFound(id.to_string()))
    }

    async fn update_session(&self, id: SessionId, patch: SessionPatch) -> Result<(), ScError> {
        let mut record = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| ScError::SessionNotFound(id.to_string()))?;

        if let Some(status) = patch.status {
            if record.status.is_terminal() && !status.is_terminal() {
                return Err(ScError::Conflict(format!(
                    "session is already {:?}",
                    record.status
                )));
            }
            record.status = status;
        }
        if let Some(started_at) = patch.started_at {
            record.started_at = Some(started_at);
        }
        if let Some(ended_at) = patch.ended_at {
            record.ended_at = Some(ended_at);
        }
        if let Some(total) = patch.total_charged_minor {
            record.total_charged_minor = total;
        }
        if let Some(intervals) = patch.total_intervals {
            record.total_intervals = intervals;
        }
        if let Some(balance) = patch.payer_balance_minor {
            record.payer_balance_minor = balance;
        }

        Ok(())
    }
}
