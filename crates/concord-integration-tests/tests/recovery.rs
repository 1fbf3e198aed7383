//! Liveness after crashed holders, and tolerance of corrupt records.

use async_trait::async_trait;
use concord_engine::{AwardOutcome, Choice, Engine, EngineConfig, Finalization, Keys, OutcomeCategory};
use concord_integration_tests::{cycle, init_tracing, memory_engine, participant, rocks_engine};
use concord_store::{Commit, DistributedLock, KvStore, MemoryStore, StoreError, Versioned, Watch, WriteOp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn crashed_finalizer_blocks_only_until_ttl() {
    let engine = memory_engine(EngineConfig::default().with_lock_ttl(Duration::from_secs(20)));
    let day = cycle("2024-08-01");
    engine.submit_vote_at(&participant(0), day, Choice::Cooperate, day).await.unwrap();

    // A holder that takes the lock and dies without releasing it
    let crashed = DistributedLock::with_prefix(Arc::clone(engine.store()), engine.keys().lock_prefix());
    crashed
        .acquire(&Keys::finalize_resource(day), Duration::from_secs(20))
        .await
        .unwrap()
        .expect("lock is free");

    assert_eq!(engine.ensure_finalized(day).await.unwrap(), Finalization::Contended);
    assert_eq!(
        engine.award_if_due(&participant(0), day).await.unwrap(),
        AwardOutcome::Contended
    );

    tokio::time::advance(Duration::from_secs(19)).await;
    assert_eq!(engine.ensure_finalized(day).await.unwrap(), Finalization::Contended);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(
        engine.award_if_due(&participant(0), day).await.unwrap(),
        AwardOutcome::Credited { points: 3, score: 3 }
    );
}

#[tokio::test(start_paused = true)]
async fn crashed_award_session_is_recovered() {
    let engine = memory_engine(EngineConfig::default());
    let day = cycle("2024-08-01");
    engine.submit_vote_at(&participant(0), day, Choice::Defect, day).await.unwrap();
    engine.ensure_finalized(day).await.unwrap();

    let crashed = DistributedLock::with_prefix(Arc::clone(engine.store()), engine.keys().lock_prefix());
    let stale = crashed
        .acquire(&Keys::award_resource(&participant(0), day), Duration::from_secs(30))
        .await
        .unwrap()
        .expect("lock is free");
    assert_eq!(
        engine.award_if_due(&participant(0), day).await.unwrap(),
        AwardOutcome::Contended
    );

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(engine.award_if_due(&participant(0), day).await.unwrap().is_credited());

    // The stale holder waking up must not disturb anything
    assert!(!crashed.release(&stale).await.unwrap());
    assert_eq!(
        engine.award_if_due(&participant(0), day).await.unwrap(),
        AwardOutcome::AlreadyAwarded
    );
    assert_eq!(engine.load_ledger_at(&participant(0), day).await.unwrap().cumulative_score, 1);
}

#[tokio::test]
async fn rocks_lock_expires_on_disk() {
    let (engine, _dir) = rocks_engine(EngineConfig::default().with_lock_ttl(Duration::from_millis(200)));
    let day = cycle("2024-08-01");
    engine.submit_vote_at(&participant(0), day, Choice::Cooperate, day).await.unwrap();

    let crashed = DistributedLock::with_prefix(Arc::clone(engine.store()), engine.keys().lock_prefix());
    crashed
        .acquire(&Keys::finalize_resource(day), Duration::from_millis(200))
        .await
        .unwrap()
        .expect("lock is free");
    assert_eq!(engine.ensure_finalized(day).await.unwrap(), Finalization::Contended);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = engine.ensure_finalized(day).await.unwrap();
    assert_eq!(settled.settled().unwrap().category, OutcomeCategory::AllCooperate);
}

#[tokio::test]
async fn corrupt_records_never_fail_a_visit() {
    let engine = memory_engine(EngineConfig::default());
    let yesterday = cycle("2024-08-01");
    let today = cycle("2024-08-02");
    let alice = participant(0);
    let bob = participant(1);

    engine.submit_vote_at(&alice, yesterday, Choice::Defect, yesterday).await.unwrap();
    engine.submit_vote_at(&bob, yesterday, Choice::Defect, yesterday).await.unwrap();

    let store = engine.store();
    let keys = engine.keys();
    store.put(&keys.settled(yesterday), b"\x00\x01garbage".to_vec()).await.unwrap();
    store.put(&keys.score(&alice), b"-".to_vec()).await.unwrap();
    store
        .put(
            &keys.history(&alice),
            br#"[{"day":"2024-08-01","choice":"defect"},{"day":"yesterday"},42,"2024-07-31"]"#.to_vec(),
        )
        .await
        .unwrap();

    let report = engine.visit_at(&alice, today).await.unwrap();
    // The unreadable settlement is recomputed from the tallies
    assert!(matches!(report.finalization, Some(Finalization::Settled(_))));
    assert_eq!(report.awards, vec![(yesterday, AwardOutcome::Credited { points: 1, score: 1 })]);
    assert_eq!(report.ledger.total_votes, 1);
    assert_eq!(report.ledger.skipped_entries, 3);
    assert_eq!(report.ledger.longest_streak, 1);
}

/// A [`MemoryStore`] whose `transact` can be switched off.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get_versioned(&self, key: &str) -> concord_store::Result<Versioned> {
        self.inner.get_versioned(key).await
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> concord_store::Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> concord_store::Result<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> concord_store::Result<()> {
        self.inner.delete(key).await
    }

    async fn atomic_increment(&self, key: &str, delta: i64) -> concord_store::Result<i64> {
        self.inner.atomic_increment(key, delta).await
    }

    async fn transact(&self, watches: &[Watch], writes: Vec<WriteOp>) -> concord_store::Result<Commit> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.transact(watches, writes).await
    }
}

#[tokio::test(start_paused = true)]
async fn store_outage_is_retryable_and_commits_nothing() {
    init_tracing();
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        down: AtomicBool::new(false),
    });
    let engine = Engine::new(Arc::clone(&store), EngineConfig::default()).unwrap();
    let day = cycle("2024-08-01");
    let alice = participant(0);
    engine.submit_vote_at(&alice, day, Choice::Defect, day).await.unwrap();
    engine.ensure_finalized(day).await.unwrap();

    store.down.store(true, Ordering::SeqCst);
    let err = engine.award_if_due(&alice, day).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert_eq!(engine.load_ledger_at(&alice, day).await.unwrap().cumulative_score, 0);

    // The award lock could not be released either; it expires on its own.
    store.down.store(false, Ordering::SeqCst);
    assert_eq!(engine.award_if_due(&alice, day).await.unwrap(), AwardOutcome::Contended);
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(
        engine.award_if_due(&alice, day).await.unwrap(),
        AwardOutcome::Credited { points: 1, score: 1 }
    );
}
