//! Postgres-backed tests. Run with
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

mod common;

use rust_decimal::Decimal;

use accrual_engine::config::EngineConfig;
use accrual_engine::db::LedgerStore;
use accrual_engine::engine::Engine;
use accrual_engine::errors::LedgerError;
use accrual_engine::ledger::verify_user_ledger;
use accrual_engine::models::PositionStatus;

#[tokio::test]
#[ignore]
async fn test_pg_position_accrual_and_audit() {
    let store = common::setup_test_db().await;
    let engine = Engine::new(store, &EngineConfig::default());
    let user = common::funded_user(&engine, 1_000).await;

    let pos = engine
        .positions
        .create_position(user, common::plan(20, 10), Decimal::from(500))
        .await
        .unwrap();
    let at = pos.start_date + chrono::Duration::days(1);
    engine.positions.accrue(pos.id, at.date_naive(), at).await.unwrap();

    let err = engine.positions.accrue(pos.id, at.date_naive(), at).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyProcessedForPeriod { .. }));

    let stored = engine.store().get_position(pos.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Active);
    assert_eq!(stored.accumulated_profit, Decimal::from(10));
    assert_eq!(stored.version, 1);
    assert_eq!(stored.distribution_history[0].balance_after, Decimal::from(510));

    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(510));
    assert!(verify_user_ledger(engine.store(), user).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_concurrent_debits_cannot_overdraw() {
    let store = common::setup_test_db().await;
    let engine = Engine::new(store, &EngineConfig::default());
    let user = common::funded_user(&engine, 100).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.ledger.withdraw(user, Decimal::from(30)).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }

    assert_eq!(ok, 3);
    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(10));
}

#[tokio::test]
#[ignore]
async fn test_pg_transactions_are_immutable() {
    let store = common::setup_test_db().await;
    let engine = Engine::new(store.clone(), &EngineConfig::default());
    let user = common::funded_user(&engine, 50).await;

    let updated = sqlx::query("UPDATE transactions SET amount = 0 WHERE user_id = $1")
        .bind(user)
        .execute(store.pool())
        .await;
    assert!(updated.is_err());

    let deleted = sqlx::query("DELETE FROM transactions WHERE user_id = $1")
        .bind(user)
        .execute(store.pool())
        .await;
    assert!(deleted.is_err());
}
