//! Session membership registry.
//!
//! The registry is the authoritative membership table: which participants
//! belong to which session, and their roles. It is an owned object injected
//! into whatever needs it (no ambient globals), backed by a sharded
//! concurrent map so operations on different sessions never block each
//! other while operations on one session key serialize.
//!
//! Membership is live-relay bookkeeping only: an empty entry is
//! garbage-collected, which does not end the Session entity itself.

use crate::errors::ScError;
use common::{ParticipantId, Role, SessionId};
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// A session holds exactly two parties.
const MAX_MEMBERS: usize = 2;

/// Snapshot of a session's membership at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSet {
    members: BTreeMap<ParticipantId, Role>,
}

impl MembershipSet {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the participant is a member.
    #[must_use]
    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.members.contains_key(participant_id)
    }

    /// Role of a member, if present.
    #[must_use]
    pub fn role_of(&self, participant_id: &ParticipantId) -> Option<Role> {
        self.members.get(participant_id).copied()
    }

    /// The initiator member, if one has joined.
    #[must_use]
    pub fn initiator(&self) -> Option<ParticipantId> {
        self.members
            .iter()
            .find(|(_, role)| role.is_initiator())
            .map(|(id, _)| *id)
    }

    /// Iterate over `(participant, role)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &Role)> {
        self.members.iter()
    }
}

/// Authoritative membership table, keyed by session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, BTreeMap<ParticipantId, Role>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Add a participant to a session.
    ///
    /// Idempotent: re-joining an already-present participant is a no-op
    /// returning the current set. Fails with `Conflict` when the session is
    /// full or a second initiator tries to join.
    pub fn join(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        role: Role,
    ) -> Result<MembershipSet, ScError> {
        let mut entry = self.sessions.entry(session_id).or_default();

        if let Some(existing) = entry.get(&participant_id) {
            if *existing != role {
                return Err(ScError::Conflict(
                    "Participant already joined with a different role".to_string(),
                ));
            }
            return Ok(MembershipSet {
                members: entry.clone(),
            });
        }

        if entry.len() >= MAX_MEMBERS {
            return Err(ScError::Conflict("Session is full".to_string()));
        }

        if role.is_initiator() && entry.values().any(|r| r.is_initiator()) {
            return Err(ScError::Conflict(
                "Session already has an initiator".to_string(),
            ));
        }

        entry.insert(participant_id, role);

        debug!(
            target: "sc.registry",
            session_id = %session_id,
            participant_id = %participant_id,
            role = %role,
            members = entry.len(),
            "Participant joined"
        );

        Ok(MembershipSet {
            members: entry.clone(),
        })
    }

    /// Remove a participant from a session.
    ///
    /// Idempotent: leaving a session one is not in returns the current set.
    /// When the last member leaves, the entry is garbage-collected.
    pub fn leave(&self, session_id: SessionId, participant_id: ParticipantId) -> MembershipSet {
        let remaining = if let Some(mut entry) = self.sessions.get_mut(&session_id) {
            entry.remove(&participant_id);
            entry.clone()
        } else {
            BTreeMap::new()
        };

        if remaining.is_empty() {
            self.sessions.remove_if(&session_id, |_, m| m.is_empty());
            debug!(
                target: "sc.registry",
                session_id = %session_id,
                "Membership empty, registry entry collected"
            );
        }

        MembershipSet { members: remaining }
    }

    /// Drop a session's entry entirely (session teardown).
    pub fn remove_session(&self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    /// Current membership of a session, if any.
    #[must_use]
    pub fn members(&self, session_id: SessionId) -> Option<MembershipSet> {
        self.sessions.get(&session_id).map(|m| MembershipSet {
            members: m.clone(),
        })
    }

    /// Whether the participant is a member of the session.
    #[must_use]
    pub fn is_member(&self, session_id: SessionId, participant_id: &ParticipantId) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|m| m.contains_key(participant_id))
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
