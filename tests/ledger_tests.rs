mod common;

use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use accrual_engine::config::EngineConfig;
use accrual_engine::db::{Commit, Committed, LedgerStore, MemoryStore};
use accrual_engine::engine::Engine;
use accrual_engine::errors::LedgerError;
use accrual_engine::ledger::{verify_user_ledger, RetryPolicy};
use accrual_engine::lifecycle::PrincipalPolicy;
use accrual_engine::models::{CopyAllocation, Position, Strategy, Transaction, TransactionKind, User};
use accrual_engine::query::PlatformStats;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_cannot_overdraw() {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let user = common::funded_user(&engine, 100).await;

    let a = tokio::spawn({
        let engine = engine.clone();
        async move { engine.ledger.withdraw(user, Decimal::from(60)).await }
    });
    let b = tokio::spawn({
        let engine = engine.clone();
        async move { engine.ledger.withdraw(user, Decimal::from(60)).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. }))));
    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(40));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_investments_respect_balance() {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let user = common::funded_user(&engine, 1_000).await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .positions
                .create_position(user, common::plan(20, 10), Decimal::from(300))
                .await
        }));
    }
    let mut opened = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            opened += 1;
        }
    }

    assert_eq!(opened, 3);
    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(100));
    assert_eq!(engine.store().positions_for_user(user).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_replay_reproduces_balance() {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let user = common::funded_user(&engine, 250).await;

    engine.ledger.deposit(user, Decimal::new(1999, 2)).await.unwrap();
    engine.ledger.withdraw(user, Decimal::new(505, 1)).await.unwrap();
    engine
        .ledger
        .apply_transaction(user, TransactionKind::Adjustment, Decimal::from(-3), "Fee correction", None)
        .await
        .unwrap();

    let txs = engine.store().transactions_for_user(user).await.unwrap();
    for pair in txs.windows(2) {
        assert_eq!(pair[0].balance_after, pair[1].balance_before);
        assert!(pair[0].seq < pair[1].seq);
    }

    let audit = verify_user_ledger(engine.store(), user).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.transaction_count, 4);
    assert_eq!(audit.replayed_balance, Decimal::new(21649, 2));
}

#[tokio::test]
async fn test_zero_and_unknown_user_rejected() {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let user = common::funded_user(&engine, 10).await;

    assert!(matches!(
        engine.ledger.deposit(user, Decimal::ZERO).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.ledger.deposit(uuid::Uuid::new_v4(), Decimal::ONE).await,
        Err(LedgerError::UserNotFound(_))
    ));
    assert!(matches!(
        verify_user_ledger(engine.store(), uuid::Uuid::new_v4()).await,
        Err(LedgerError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn test_deposit_that_would_overflow_is_rejected() {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let user = common::funded_user(&engine, 0).await;

    engine.ledger.deposit(user, Decimal::MAX).await.unwrap();
    assert!(matches!(
        engine.ledger.deposit(user, Decimal::MAX).await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert_eq!(common::balance_of(&engine, user).await, Decimal::MAX);
    assert_eq!(engine.store().transactions_for_user(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_out_of_range_plan_terms_are_rejected() {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let user = common::funded_user(&engine, 1_000).await;

    let result = engine
        .positions
        .create_position(user, common::plan(20, 1_000_000_000), Decimal::from(500))
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));

    let mut plan = common::plan(20, 10);
    plan.return_pct = Decimal::MAX;
    let result = engine.positions.create_position(user, plan, Decimal::from(500)).await;
    assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));

    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(1_000));
    assert!(engine.store().positions_for_user(user).await.unwrap().is_empty());
}

/// Applies every commit, then stalls before reporting back.
#[derive(Clone)]
struct SlowAckStore {
    inner: MemoryStore,
    delay: Duration,
}

impl LedgerStore for SlowAckStore {
    async fn ping(&self) -> Result<(), LedgerError> {
        self.inner.ping().await
    }

    async fn create_user(&self, email: Option<String>) -> Result<User, LedgerError> {
        self.inner.create_user(email).await
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, LedgerError> {
        self.inner.get_user(user_id).await
    }

    async fn commit(&self, commit: Commit) -> Result<Committed, LedgerError> {
        let committed = self.inner.commit(commit).await?;
        tokio::time::sleep(self.delay).await;
        Ok(committed)
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        self.inner.transactions_for_user(user_id).await
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, LedgerError> {
        self.inner.get_position(id).await
    }

    async fn positions_for_user(&self, user_id: Uuid) -> Result<Vec<Position>, LedgerError> {
        self.inner.positions_for_user(user_id).await
    }

    async fn active_positions_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Position>, LedgerError> {
        self.inner.active_positions_page(after, limit).await
    }

    async fn get_allocation(&self, id: Uuid) -> Result<Option<CopyAllocation>, LedgerError> {
        self.inner.get_allocation(id).await
    }

    async fn allocations_for_user(&self, user_id: Uuid) -> Result<Vec<CopyAllocation>, LedgerError> {
        self.inner.allocations_for_user(user_id).await
    }

    async fn active_allocations_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<CopyAllocation>, LedgerError> {
        self.inner.active_allocations_page(after, limit).await
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>, LedgerError> {
        self.inner.get_strategy(id).await
    }

    async fn upsert_strategy(&self, strategy: Strategy) -> Result<Strategy, LedgerError> {
        self.inner.upsert_strategy(strategy).await
    }

    async fn platform_stats(&self) -> Result<PlatformStats, LedgerError> {
        self.inner.platform_stats().await
    }
}

#[tokio::test]
async fn test_insert_that_lands_after_timeout_is_reported_as_applied() {
    let store = SlowAckStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(200),
    };
    let config = EngineConfig {
        retry: RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        },
        ..EngineConfig::default()
    };
    let engine = Engine::new(store, &config);
    let user = engine.store().create_user(None).await.unwrap().id;

    // Plain ledger writes have no id to look up and surface the timeout.
    assert!(matches!(
        engine.ledger.deposit(user, Decimal::from(1_000)).await,
        Err(LedgerError::Timeout(20))
    ));
    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(1_000));

    let pos = engine
        .positions
        .create_position(user, common::plan(20, 10), Decimal::from(500))
        .await
        .unwrap();
    assert_eq!(pos.principal, Decimal::from(500));
    assert_eq!(engine.store().positions_for_user(user).await.unwrap().len(), 1);
    assert_eq!(common::balance_of(&engine, user).await, Decimal::from(500));
}
