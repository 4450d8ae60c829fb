//! Metered billing engine.
//!
//! One engine per session, owned by the session actor; every mutation of
//! billing state flows through the actor's mailbox, so ticks, pauses, and
//! finalization are applied in order. The engine is the sole writer of the
//! session's billing fields and of its terminal status.
//!
//! Charging rules:
//! - a tick charges exactly the per-interval rate, once, with a contiguous
//!   interval index;
//! - a tick that leaves the balance unable to afford the *next* interval
//!   reports exhaustion so the session settles immediately after the tick;
//! - a failed charge is never retried within the interval - the next tick
//!   boundary is the retry point;
//! - finalize settles exactly once; repeat calls return the stored result.

use crate::errors::ScError;
use crate::payment::PaymentGateway;
use crate::store::{SessionRecord, SessionPatch, SessionStore};
use chrono::{DateTime, Utc};
use common::{EndReason, MinorUnits, ParticipantId, SessionId, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Billing parameters for one session.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Fixed charge interval (canonical: 60s).
    pub interval: Duration,
    /// Elapsed time since the last tick beyond which a final partial
    /// interval is billed at settlement (canonical: 30s).
    pub proration_threshold: Duration,
    /// Provider share of settled revenue, in percent.
    pub provider_share_percent: u8,
}

/// One recorded charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingTick {
    pub session_id: SessionId,
    /// Contiguous, strictly increasing, starts at 1.
    pub interval_index: u32,
    pub amount_minor: MinorUnits,
    pub balance_after_minor: MinorUnits,
    pub ticked_at: DateTime<Utc>,
}

/// Result of a successful tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick: BillingTick,
    /// The next tick would overdraw the balance; settle now with
    /// `insufficient_funds`.
    pub exhausted: bool,
}

/// The settled result of a session, computed exactly once.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub session_id: SessionId,
    pub reason: EndReason,
    pub status: SessionStatus,
    pub total_charged_minor: MinorUnits,
    pub total_intervals: u32,
    /// Final partial-interval charge, zero when none was billed.
    pub prorated_minor: MinorUnits,
    pub provider_minor: MinorUnits,
    pub platform_minor: MinorUnits,
    pub elapsed_minutes: i64,
    pub ended_at: DateTime<Utc>,
}

/// Per-session metered billing engine.
pub struct BillingEngine {
    session_id: SessionId,
    provider_id: ParticipantId,
    payer_id: ParticipantId,
    rate: MinorUnits,
    balance: MinorUnits,
    cfg: BillingConfig,
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    /// Whether the tick timer is logically running.
    active: bool,
    started_at: Option<Instant>,
    started_at_wall: Option<DateTime<Utc>>,
    /// Start of the interval currently accruing (set on start, resume,
    /// and every tick). Paused time never accrues.
    interval_anchor: Option<Instant>,
    ticks: Vec<BillingTick>,
    total_intervals: u32,
    total_charged: MinorUnits,
    settlement: Option<Settlement>,
}

impl BillingEngine {
    /// Initialize billing for a session.
    ///
    /// Fails with `InsufficientFunds` when the payer cannot afford even one
    /// interval - before any signaling occurs. The caller (session actor)
    /// guarantees at-most-one engine per session id, which makes duplicate
    /// initialize calls resolve to the same instance.
    pub fn initialize(
        record: &SessionRecord,
        cfg: BillingConfig,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, ScError> {
        if record.rate_per_interval <= 0 {
            return Err(ScError::Validation(format!(
                "rate must be positive, got {}",
                record.rate_per_interval
            )));
        }

        if record.payer_balance_minor < record.rate_per_interval {
            return Err(ScError::InsufficientFunds {
                required: record.rate_per_interval,
                available: record.payer_balance_minor,
            });
        }

        debug!(
            target: "sc.billing",
            session_id = %record.id,
            rate = record.rate_per_interval,
            balance = record.payer_balance_minor,
            "Billing initialized"
        );

        Ok(Self {
            session_id: record.id,
            provider_id: record.provider_id,
            payer_id: record.payer_id,
            rate: record.rate_per_interval,
            balance: record.payer_balance_minor,
            cfg,
            store,
            gateway,
            active: false,
            started_at: None,
            started_at_wall: None,
            interval_anchor: None,
            ticks: Vec::new(),
            total_intervals: 0,
            total_charged: 0,
            settlement: None,
        })
    }

    /// Begin or continue accruing. No-op when already active or settled.
    /// Returns whether billing was newly started (the caller spawns the
    /// tick timer exactly when this returns `true`).
    pub fn start(&mut self, now: Instant, wall: DateTime<Utc>) -> bool {
        if self.active || self.settlement.is_some() {
            return false;
        }

        self.active = true;
        self.interval_anchor = Some(now);
        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.started_at_wall = Some(wall);
            info!(
                target: "sc.billing",
                session_id = %self.session_id,
                "Billing started"
            );
        } else {
            info!(
                target: "sc.billing",
                session_id = %self.session_id,
                "Billing resumed"
            );
        }
        true
    }

    /// Stop accruing without charging. Elapsed time while paused is
    /// dropped, not carried.
    pub fn pause(&mut self) {
        if self.active {
            self.active = false;
            self.interval_anchor = None;
            info!(
                target: "sc.billing",
                session_id = %self.session_id,
                "Billing paused"
            );
        }
    }

    /// Charge one full interval.
    ///
    /// A gateway failure leaves the ledger untouched and propagates as
    /// `PaymentGateway`; the caller pauses billing and the next tick
    /// boundary is the retry point.
    pub async fn tick(&mut self, now: Instant, wall: DateTime<Utc>) -> Result<TickOutcome, ScError> {
        if self.settlement.is_some() {
            return Err(ScError::Validation(
                "tick on a settled session".to_string(),
            ));
        }
        if !self.active {
            return Err(ScError::Validation(
                "tick while billing inactive".to_string(),
            ));
        }

        self.gateway
            .charge(self.payer_id, self.rate, self.session_id)
            .await?;

        self.balance -= self.rate;
        self.total_intervals += 1;
        self.total_charged += self.rate;
        self.interval_anchor = Some(now);

        let tick = BillingTick {
            session_id: self.session_id,
            interval_index: self.total_intervals,
            amount_minor: self.rate,
            balance_after_minor: self.balance,
            ticked_at: wall,
        };
        self.ticks.push(tick.clone());

        let exhausted = self.balance < self.rate;

        debug!(
            target: "sc.billing",
            session_id = %self.session_id,
            interval_index = tick.interval_index,
            balance_after = tick.balance_after_minor,
            exhausted,
            "Interval charged"
        );

        Ok(TickOutcome { tick, exhausted })
    }

    /// Settle the session. Idempotent: a repeat call returns the stored
    /// settlement without touching the ledger, the store, or the gateway.
    pub async fn finalize(
        &mut self,
        reason: EndReason,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Settlement {
        if let Some(settlement) = &self.settlement {
            debug!(
                target: "sc.billing",
                session_id = %self.session_id,
                "Finalize called on settled session, returning stored result"
            );
            return settlement.clone();
        }

        let was_live = self.active;
        self.active = false;

        let prorated = if was_live {
            self.bill_final_partial(now).await
        } else {
            0
        };

        let billing_started = self.started_at.is_some();
        let status = reason.terminal_status(billing_started);

        let elapsed_minutes = self
            .started_at_wall
            .map(|started| {
                let secs = (wall - started).num_seconds().max(0);
                (secs + 59) / 60
            })
            .unwrap_or(0);

        // Revenue split: provider share floors, the platform keeps the
        // remainder, so the two always sum to the total.
        let provider_minor = self.total_charged * MinorUnits::from(self.cfg.provider_share_percent) / 100;
        let platform_minor = self.total_charged - provider_minor;

        if provider_minor > 0 {
            if let Err(e) = self
                .gateway
                .transfer(self.provider_id, provider_minor, self.session_id)
                .await
            {
                // Single attempt; reconciliation of failed transfers is a
                // back-office concern, settlement still completes.
                warn!(
                    target: "sc.billing",
                    session_id = %self.session_id,
                    error = %e,
                    "Provider transfer failed at settlement"
                );
            }
        }

        let settlement = Settlement {
            session_id: self.session_id,
            reason,
            status,
            total_charged_minor: self.total_charged,
            total_intervals: self.total_intervals,
            prorated_minor: prorated,
            provider_minor,
            platform_minor,
            elapsed_minutes,
            ended_at: wall,
        };

        let patch = SessionPatch {
            status: Some(status),
            started_at: self.started_at_wall,
            ended_at: Some(wall),
            total_charged_minor: Some(self.total_charged),
            total_intervals: Some(self.total_intervals),
            payer_balance_minor: Some(self.balance),
        };
        if let Err(e) = self.store.update_session(self.session_id, patch).await {
            error!(
                target: "sc.billing",
                session_id = %self.session_id,
                error = %e,
                "Failed to persist settlement"
            );
        }

        info!(
            target: "sc.billing",
            session_id = %self.session_id,
            reason = %reason,
            total_charged = settlement.total_charged_minor,
            total_intervals = settlement.total_intervals,
            prorated = settlement.prorated_minor,
            elapsed_minutes = settlement.elapsed_minutes,
            "Session settled"
        );

        self.settlement = Some(settlement.clone());
        settlement
    }

    /// Bill the final partial interval when the session ends live more than
    /// the proration threshold past its last tick. The partial adds to the
    /// charged total but is not a ledger tick and does not count as an
    /// interval.
    async fn bill_final_partial(&mut self, now: Instant) -> MinorUnits {
        let Some(anchor) = self.interval_anchor else {
            return 0;
        };

        let elapsed = now.saturating_duration_since(anchor);
        if elapsed <= self.cfg.proration_threshold {
            return 0;
        }

        let interval_ms = self.cfg.interval.as_millis().max(1);
        let elapsed_ms = elapsed.as_millis().min(interval_ms);
        let raw = (i128::from(self.rate) * elapsed_ms as i128 / interval_ms as i128) as MinorUnits;
        let amount = raw.min(self.rate).min(self.balance).max(0);
        if amount == 0 {
            return 0;
        }

        match self
            .gateway
            .charge(self.payer_id, amount, self.session_id)
            .await
        {
            Ok(()) => {
                self.balance -= amount;
                self.total_charged += amount;
                debug!(
                    target: "sc.billing",
                    session_id = %self.session_id,
                    amount,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Final partial interval billed"
                );
                amount
            }
            Err(e) => {
                // Never retried; the partial is forfeited rather than
                // risking a duplicate charge.
                warn!(
                    target: "sc.billing",
                    session_id = %self.session_id,
                    error = %e,
                    "Final partial charge failed, skipping proration"
                );
                0
            }
        }
    }

    /// Whether the tick timer is logically running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the session is settled.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.settlement.is_some()
    }

    /// Whether billing ever started.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Remaining payer balance, minor units.
    #[must_use]
    pub fn balance(&self) -> MinorUnits {
        self.balance
    }

    /// Total charged so far, minor units.
    #[must_use]
    pub fn total_charged(&self) -> MinorUnits {
        self.total_charged
    }

    /// Full intervals charged so far.
    #[must_use]
    pub fn total_intervals(&self) -> u32 {
        self.total_intervals
    }

    /// The per-interval rate, minor units.
    #[must_use]
    pub fn rate(&self) -> MinorUnits {
        self.rate
    }

    /// The rate-setting party.
    #[must_use]
    pub fn provider_id(&self) -> ParticipantId {
        self.provider_id
    }

    /// The paying party.
    #[must_use]
    pub fn payer_id(&self) -> ParticipantId {
        self.payer_id
    }

    /// The recorded ledger.
    #[must_use]
    pub fn ticks(&self) -> &[BillingTick] {
        &self.ticks
    }

    /// Wall-clock start of billing, if it ever started.
    #[must_use]
    pub fn started_at_wall(&self) -> Option<DateTime<Utc>> {
        self.started_at_wall
    }
}
