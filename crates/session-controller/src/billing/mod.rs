//! Metered billing: the per-interval charge engine and its ledger types.

pub mod engine;

pub use engine::{BillingConfig, BillingEngine, BillingTick, Settlement, TickOutcome};
