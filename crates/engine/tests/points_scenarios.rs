//! Points engine scenarios: the reference interval computations, driver
//! monotonicity and the boundary behaviors, against the in-memory store.

mod common;

use common::*;

use accrue_engine::{BalanceApplier, PointsEngine};
use accrue_storage::store::LedgerStore;

#[tokio::test]
async fn pure_holding_earns_rate_times_hours() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    // Balance of 1 token established before the interval; no events inside it.
    applier
        .apply(&mint(user, tokens(1), 90, &tx(1)), day_before(23))
        .await
        .unwrap();

    let outcome = engine
        .calculate(&hex_addr(user), CHAIN_ID, at(0, 0), at(1, 0))
        .await
        .unwrap()
        .expect("points expected");

    assert!(approx(outcome.points_earned, 0.05), "got {}", outcome.points_earned);
    assert_eq!(outcome.average_balance, tokens(1));
    assert!(approx(outcome.holding_hours, 1.0));
}

#[tokio::test]
async fn mid_interval_inflow_weights_each_segment() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    // Starts at zero, receives 2 tokens at 00:30.
    applier
        .apply(&mint(user, tokens(2), 100, &tx(1)), at(0, 30))
        .await
        .unwrap();

    let outcome = engine
        .calculate(&hex_addr(user), CHAIN_ID, at(0, 0), at(1, 0))
        .await
        .unwrap()
        .expect("points expected");

    // 0 · 0.05 · 0.5 + 2 · 0.05 · 0.5
    assert!(approx(outcome.points_earned, 0.05), "got {}", outcome.points_earned);
    // (0 · 1800 + 2e18 · 1800) / 3600
    assert_eq!(outcome.average_balance, tokens(1));
}

#[tokio::test]
async fn clamped_outflow_counts_the_held_prefix() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    let counterparty = holder(0x22);

    applier
        .apply(&mint(user, tokens(1), 90, &tx(1)), day_before(23))
        .await
        .unwrap();
    // Over-spend at 00:15 clamps the balance to zero.
    applier
        .apply(&transfer(user, counterparty, tokens(3), 100, &tx(2)), at(0, 15))
        .await
        .unwrap();

    let outcome = engine
        .calculate(&hex_addr(user), CHAIN_ID, at(0, 0), at(1, 0))
        .await
        .unwrap()
        .expect("points expected");

    // 1 · 0.05 · 0.25 + 0 · 0.05 · 0.75
    assert!(approx(outcome.points_earned, 0.0125), "got {}", outcome.points_earned);
}

#[tokio::test]
async fn driver_windows_accumulate_and_rerun_safely() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    applier
        .apply(&mint(user, tokens(1), 90, &tx(1)), day_before(23))
        .await
        .unwrap();
    // Simulate a holder already settled through 00:00.
    store
        .add_points(&hex_addr(user), CHAIN_ID, 0.0, at(0, 0))
        .await
        .unwrap();

    engine.run_tick(&[CHAIN_ID], at(1, 0)).await.unwrap();
    engine.run_tick(&[CHAIN_ID], at(2, 0)).await.unwrap();

    let points = store.points(&hex_addr(user), CHAIN_ID).unwrap();
    assert!(approx(points.total_points, 0.10), "got {}", points.total_points);
    assert_eq!(points.last_calculated_at, at(2, 0));

    // Re-running covered windows is a no-op: the watermark already advanced.
    engine.run_tick(&[CHAIN_ID], at(1, 0)).await.unwrap();
    engine.run_tick(&[CHAIN_ID], at(2, 0)).await.unwrap();

    let points = store.points(&hex_addr(user), CHAIN_ID).unwrap();
    assert!(approx(points.total_points, 0.10), "got {}", points.total_points);

    // Every positive increment has exactly one audit row.
    let logs = store.calc_logs();
    assert_eq!(logs.len(), 2);
    let logged: f64 = logs.iter().map(|l| l.points_earned).sum();
    assert!(approx(logged, points.total_points));
}

#[tokio::test]
async fn backfill_slices_into_hour_windows() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    applier
        .apply(&mint(user, tokens(1), 90, &tx(1)), day_before(23))
        .await
        .unwrap();
    store
        .add_points(&hex_addr(user), CHAIN_ID, 0.0, at(0, 0))
        .await
        .unwrap();

    engine.backfill(&[CHAIN_ID], at(0, 0), at(3, 0)).await.unwrap();

    let points = store.points(&hex_addr(user), CHAIN_ID).unwrap();
    assert!(approx(points.total_points, 0.15), "got {}", points.total_points);
    assert_eq!(points.last_calculated_at, at(3, 0));
    assert_eq!(store.calc_logs().len(), 3);

    // Backfilling the same span again changes nothing.
    engine.backfill(&[CHAIN_ID], at(0, 0), at(3, 0)).await.unwrap();
    let points = store.points(&hex_addr(user), CHAIN_ID).unwrap();
    assert!(approx(points.total_points, 0.15));
}

#[tokio::test]
async fn empty_interval_is_a_no_op() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    applier
        .apply(&mint(user, tokens(1), 90, &tx(1)), day_before(23))
        .await
        .unwrap();
    store
        .add_points(&hex_addr(user), CHAIN_ID, 0.0, at(0, 0))
        .await
        .unwrap();

    assert!(engine
        .calculate(&hex_addr(user), CHAIN_ID, at(1, 0), at(1, 0))
        .await
        .unwrap()
        .is_none());

    engine.settle(&hex_addr(user), CHAIN_ID, at(1, 0), at(1, 0)).await.unwrap();

    let points = store.points(&hex_addr(user), CHAIN_ID).unwrap();
    assert!(approx(points.total_points, 0.0));
    assert_eq!(points.last_calculated_at, at(0, 0), "watermark must not move");
    assert!(store.calc_logs().is_empty());
}

#[tokio::test]
async fn zero_balance_interval_advances_the_watermark_silently() {
    let store = new_store();
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    store
        .get_or_create_points(&hex_addr(user), CHAIN_ID, at(0, 0))
        .await
        .unwrap();

    engine.run_tick(&[CHAIN_ID], at(1, 0)).await.unwrap();

    let points = store.points(&hex_addr(user), CHAIN_ID).unwrap();
    assert!(approx(points.total_points, 0.0));
    assert_eq!(points.last_calculated_at, at(1, 0));
    assert!(store.calc_logs().is_empty(), "zero-point interval logs nothing");
}

#[tokio::test]
async fn interval_without_rows_uses_the_current_balance() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    applier
        .apply(&mint(user, tokens(4), 90, &tx(1)), day_before(20))
        .await
        .unwrap();

    // No journal rows inside [01:00, 02:00): the balance was constant at its
    // current value for the whole interval.
    let outcome = engine
        .calculate(&hex_addr(user), CHAIN_ID, at(1, 0), at(2, 0))
        .await
        .unwrap()
        .expect("points expected");
    assert!(approx(outcome.points_earned, 0.2), "got {}", outcome.points_earned);
    assert_eq!(outcome.average_balance, tokens(4));
}

#[tokio::test]
async fn recalculating_an_interval_is_deterministic() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    applier
        .apply(&mint(user, tokens(3), 100, &tx(1)), at(0, 20))
        .await
        .unwrap();
    applier
        .apply(&burn(user, tokens(1), 101, &tx(2)), at(0, 40))
        .await
        .unwrap();

    let first = engine
        .calculate(&hex_addr(user), CHAIN_ID, at(0, 0), at(1, 0))
        .await
        .unwrap()
        .expect("points expected");
    let second = engine
        .calculate(&hex_addr(user), CHAIN_ID, at(0, 0), at(1, 0))
        .await
        .unwrap()
        .expect("points expected");

    assert_eq!(first, second);
}

#[tokio::test]
async fn settlement_marks_the_interval_rows_processed() {
    let store = new_store();
    let applier = BalanceApplier::new(store.clone(), CHAIN_ID);
    let engine = PointsEngine::new(store.clone());

    let user = holder(0x11);
    applier
        .apply(&mint(user, tokens(2), 100, &tx(1)), at(0, 30))
        .await
        .unwrap();

    engine
        .settle(&hex_addr(user), CHAIN_ID, at(0, 0), at(1, 0))
        .await
        .unwrap();

    let rows = store.changes();
    assert!(rows.iter().all(|c| c.processed), "settled rows must be marked");
}
