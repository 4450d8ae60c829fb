//! End-to-end billing lifecycle: charges accrue only while live, pause on
//! degradation, settle exactly once with the recorded reason.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use common::{EndReason, Role, SessionStatus};
use session_controller::errors::ScError;
use signal_protocol::{RawConnectionSignal, WireMessage};
use std::time::Duration;
use support::{join_peer, settle_tasks, TestHarness};

#[tokio::test(start_paused = true)]
async fn two_ticks_then_insufficient_funds() {
    // Scenario A: rate 500, balance 1200.
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 1200);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let mut provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let mut payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    let state = handle.get_state().await.unwrap();
    assert!(state.billing_active);

    // First interval elapses.
    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    let frames = payer.drain();
    let update = frames
        .iter()
        .find_map(|f| match f {
            WireMessage::BillingUpdate {
                interval_index,
                balance_minor,
                ..
            } => Some((*interval_index, *balance_minor)),
            _ => None,
        })
        .expect("first billing update");
    assert_eq!(update, (1, 700));

    // Second interval elapses; balance 200 cannot cover a third tick, so
    // the session settles right after the charge.
    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    let frames = payer.drain();
    let ended = frames
        .iter()
        .find_map(|f| match f {
            WireMessage::SessionEnded {
                reason,
                total_charged_minor,
                ..
            } => Some((*reason, *total_charged_minor)),
            _ => None,
        })
        .expect("session-ended broadcast");
    assert_eq!(ended, (EndReason::InsufficientFunds, 1000));

    // The provider hears the same settlement.
    assert!(provider
        .drain()
        .iter()
        .any(|f| matches!(f, WireMessage::SessionEnded { .. })));

    let stored = harness.store.get(record.id).unwrap();
    assert_eq!(stored.status, SessionStatus::EndedInsufficientFunds);
    assert_eq!(stored.total_charged_minor, 1000);
    assert_eq!(stored.total_intervals, 2);
    assert_eq!(stored.payer_balance_minor, 200);
    assert!(stored.ended_at.is_some());

    // Exactly two charges, one transfer of the 70% provider share.
    assert_eq!(harness.gateway.charges().len(), 2);
    let transfers = harness.gateway.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount_minor, 700);
    assert_eq!(transfers[0].account, record.provider_id);
}

#[tokio::test(start_paused = true)]
async fn insufficient_balance_fails_before_any_signaling() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 400);

    let result = harness.supervisor.open_session(record.id).await;
    assert!(matches!(
        result,
        Err(ScError::InsufficientFunds {
            required: 500,
            available: 400
        })
    ));

    // No ticks, no charges, and the record is untouched.
    assert!(harness.gateway.charges().is_empty());
    let stored = harness.store.get(record.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Accepted);
    assert_eq!(stored.total_intervals, 0);
}

#[tokio::test(start_paused = true)]
async fn no_charge_before_live() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 5000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let mut payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    // Negotiation drags on; the connection never reports connected.
    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Checking)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(80)).await;
    settle_tasks().await;

    assert!(harness.gateway.charges().is_empty());
    assert!(!payer
        .drain()
        .iter()
        .any(|f| matches!(f, WireMessage::BillingUpdate { .. })));
}

#[tokio::test(start_paused = true)]
async fn startup_deadline_fails_session_with_no_charge() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 5000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let mut payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    // 90s startup window elapses without a live connection.
    tokio::time::advance(Duration::from_secs(91)).await;
    settle_tasks().await;

    let frames = payer.drain();
    let reason = frames
        .iter()
        .find_map(|f| match f {
            WireMessage::SessionEnded { reason, .. } => Some(*reason),
            _ => None,
        })
        .expect("session-ended broadcast");
    assert_eq!(reason, EndReason::ConnectionFailed);

    let stored = harness.store.get(record.id).unwrap();
    // Never live, never billed: the session is cancelled, not ended.
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert_eq!(stored.total_charged_minor, 0);
    assert!(harness.gateway.charges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn degraded_time_does_not_accrue() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let _payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;
    assert_eq!(harness.gateway.charges().len(), 1);

    // Connection degrades 10s into the second interval.
    handle
        .raw_signal(record.payer_id, RawConnectionSignal::Disconnected)
        .await
        .unwrap();
    settle_tasks().await;

    let state = handle.get_state().await.unwrap();
    assert!(!state.billing_active);

    // Ten paused seconds accrue nothing.
    tokio::time::advance(Duration::from_secs(10)).await;
    settle_tasks().await;
    assert_eq!(harness.gateway.charges().len(), 1);

    // Reconnection succeeds; a full interval after resume charges again.
    handle
        .raw_signal(record.payer_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;
    assert_eq!(harness.gateway.charges().len(), 2);

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.total_intervals, 2);
    assert!(!state.is_finalized);
}

#[tokio::test(start_paused = true)]
async fn explicit_pause_and_resume() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let _payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    handle.pause_billing(record.payer_id).await.unwrap();

    tokio::time::advance(Duration::from_secs(180)).await;
    settle_tasks().await;
    assert!(harness.gateway.charges().is_empty());

    handle.resume_billing(record.payer_id).await.unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;
    assert_eq!(harness.gateway.charges().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_while_not_live_is_rejected() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 5000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    let result = handle.resume_billing(record.payer_id).await;
    assert!(matches!(result, Err(ScError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn charge_failure_pauses_and_retries_at_next_boundary() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let mut payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    harness.gateway.fail_next_charge();

    // The failed boundary records nothing and is never retried within the
    // interval.
    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;
    assert!(harness.gateway.charges().is_empty());
    assert!(!payer
        .drain()
        .iter()
        .any(|f| matches!(f, WireMessage::BillingUpdate { .. })));

    let state = handle.get_state().await.unwrap();
    assert!(!state.billing_active);
    assert!(!state.is_finalized);

    // The next natural boundary is the retry point.
    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    let charges = harness.gateway.charges();
    assert_eq!(charges.len(), 1);
    let frames = payer.drain();
    let index = frames
        .iter()
        .find_map(|f| match f {
            WireMessage::BillingUpdate { interval_index, .. } => Some(*interval_index),
            _ => None,
        })
        .expect("billing update after retry");
    assert_eq!(index, 1);
}

#[tokio::test(start_paused = true)]
async fn close_past_threshold_bills_one_partial() {
    // Scenario B: close 45s after the last tick bills 45/60 of the rate.
    let harness = TestHarness::new();
    let record = harness.seed_session(600, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let mut payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(45)).await;
    handle
        .raw_signal(record.payer_id, RawConnectionSignal::Closed)
        .await
        .unwrap();
    settle_tasks().await;

    let ended = payer
        .drain()
        .iter()
        .find_map(|f| match f {
            WireMessage::SessionEnded {
                reason,
                total_charged_minor,
                ..
            } => Some((*reason, *total_charged_minor)),
            _ => None,
        })
        .expect("session-ended broadcast");
    assert_eq!(ended, (EndReason::UserEnded, 600 + 450));

    let stored = harness.store.get(record.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    assert_eq!(stored.total_charged_minor, 1050);
    // The partial is not an interval.
    assert_eq!(stored.total_intervals, 1);
}

#[tokio::test(start_paused = true)]
async fn close_within_threshold_bills_no_partial() {
    // Scenario B: close 25s after the last tick bills nothing extra.
    let harness = TestHarness::new();
    let record = harness.seed_session(600, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let _payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(25)).await;
    handle
        .raw_signal(record.payer_id, RawConnectionSignal::Closed)
        .await
        .unwrap();
    settle_tasks().await;

    let stored = harness.store.get(record.id).unwrap();
    assert_eq!(stored.total_charged_minor, 600);
    assert_eq!(stored.total_intervals, 1);
    assert_eq!(harness.gateway.charges().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn double_connected_keeps_a_single_timer() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let _payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    // Both endpoints report connectivity; one timer must result.
    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    handle
        .raw_signal(record.payer_id, RawConnectionSignal::Completed)
        .await
        .unwrap();
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    assert_eq!(harness.gateway.charges().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_end_settles_once() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;
    let _payer = join_peer(&handle, record.payer_id, Role::Responder).await;

    handle
        .raw_signal(record.provider_id, RawConnectionSignal::Connected)
        .await
        .unwrap();
    settle_tasks().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    settle_tasks().await;

    let settlement = handle.end_session(EndReason::UserEnded).await.unwrap();
    assert_eq!(settlement.total_charged_minor, 500);
    assert_eq!(settlement.provider_minor, 350);
    assert_eq!(settlement.platform_minor, 150);

    // Settlement tears the session down; the registry entry is gone and
    // no further timer can charge.
    assert!(harness.registry.members(record.id).is_none());
    tokio::time::advance(Duration::from_secs(300)).await;
    settle_tasks().await;
    assert_eq!(harness.gateway.charges().len(), 1);
    assert_eq!(harness.gateway.transfers().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_settles_open_sessions_as_cancelled() {
    let harness = TestHarness::new();
    let record = harness.seed_session(500, 50_000);
    let handle = harness.supervisor.open_session(record.id).await.unwrap();

    let _provider = join_peer(&handle, record.provider_id, Role::Initiator).await;

    harness.supervisor.shutdown().await.unwrap();
    settle_tasks().await;

    let stored = harness.store.get(record.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert!(stored.ended_at.is_some());
}
