//! Payment gateway collaborator.
//!
//! The core treats charge and transfer as black-box operations and never
//! retries either within a billing interval: a failed charge pauses billing
//! and the next tick boundary is the retry point.

use crate::errors::ScError;
use async_trait::async_trait;
use common::{MinorUnits, ParticipantId, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Payment operations the core consumes.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the payer for one interval (or a final prorated partial).
    async fn charge(
        &self,
        payer_id: ParticipantId,
        amount_minor: MinorUnits,
        session_id: SessionId,
    ) -> Result<(), ScError>;

    /// Transfer the provider's share at settlement.
    async fn transfer(
        &self,
        provider_id: ParticipantId,
        amount_minor: MinorUnits,
        session_id: SessionId,
    ) -> Result<(), ScError>;
}

/// A recorded gateway operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub account: ParticipantId,
    pub amount_minor: MinorUnits,
    pub session_id: SessionId,
}

/// In-memory gateway for the dev binary and tests. Records every call and
/// can be armed to fail the next charge.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    charges: Mutex<Vec<GatewayCall>>,
    transfers: Mutex<Vec<GatewayCall>>,
    fail_next_charge: AtomicBool,
}

impl RecordingGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `charge` call fail with `PaymentGateway`.
    pub fn fail_next_charge(&self) {
        self.fail_next_charge.store(true, Ordering::SeqCst);
    }

    /// All charges issued so far.
    #[must_use]
    pub fn charges(&self) -> Vec<GatewayCall> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// All transfers issued so far.
    #[must_use]
    pub fn transfers(&self) -> Vec<GatewayCall> {
        self.transfers.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn charge(
        &self,
        payer_id: ParticipantId,
        amount_minor: MinorUnits,
        session_id: SessionId,
    ) -> Result<(), ScError> {
        if self.fail_next_charge.swap(false, Ordering::SeqCst) {
            return Err(ScError::PaymentGateway("charge declined".to_string()));
        }
        if let Ok(mut charges) = self.charges.lock() {
            charges.push(GatewayCall {
                account: payer_id,
                amount_minor,
                session_id,
            });
        }
        Ok(())
    }

    async fn transfer(
        &self,
        provider_id: ParticipantId,
        amount_minor: MinorUnits,
        session_id: SessionId,
    ) -> Result<(), ScError> {
        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.push(GatewayCall {
                account: provider_id,
                amount_minor,
                session_id,
            });
        }
        Ok(())
    }
}
