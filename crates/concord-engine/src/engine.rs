//! The engine facade consumed by a presentation layer.

use crate::awarder::{AwardOutcome, ParticipantAwarder};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::finalizer::{CycleFinalizer, Finalization};
use crate::keys::Keys;
use crate::ledger::LedgerProjection;
use crate::models::{AggregateView, CycleId, ParticipantId, ParticipantLedger, Rejection, SubmitReceipt, Vote};
use concord_outcome::Choice;
use concord_store::{Commit, JsonStoreExt, KvStore, Watch, WriteOp};
use concord_streak::{parse_entry, HistoryEntry, ParsedEntry};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a visit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitReport {
    /// Settlement attempt for the previous cycle.
    pub finalization: Option<Finalization>,
    /// Award attempts for recent cycles the participant voted in, newest first.
    pub awards: Vec<(CycleId, AwardOutcome)>,
    /// Ledger after the awards.
    pub ledger: ParticipantLedger,
}

impl VisitReport {
    /// Points credited by this visit.
    pub fn credited_points(&self) -> u64 {
        self.awards
            .iter()
            .map(|(_, award)| match award {
                AwardOutcome::Credited { points, .. } => u64::from(*points),
                _ => 0,
            })
            .sum()
    }
}

/// Settlement engine over a shared store.
///
/// Every call is an independent, short-lived invocation; the engine keeps no
/// state between calls other than its configuration.
pub struct Engine<S> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
    keys: Keys,
    finalizer: CycleFinalizer<S>,
    awarder: ParticipantAwarder<S>,
    ledger: LedgerProjection<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            keys: self.keys.clone(),
            finalizer: self.finalizer.clone(),
            awarder: self.awarder.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: KvStore> Engine<S> {
    /// Create an engine after validating `config`.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let finalizer = CycleFinalizer::new(Arc::clone(&store), &config);
        let awarder = ParticipantAwarder::new(Arc::clone(&store), finalizer.clone(), &config);
        let ledger = LedgerProjection::new(Arc::clone(&store), &config);
        Ok(Self {
            keys: Keys::new(config.namespace.clone()),
            store,
            config: Arc::new(config),
            finalizer,
            awarder,
            ledger,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// The cycle for the current UTC day.
    pub fn current_cycle_id(&self) -> CycleId {
        CycleId::today()
    }

    /// Record `participant`'s choice for `cycle`, which must be the current
    /// UTC day.
    pub async fn submit_vote(
        &self,
        participant: &ParticipantId,
        cycle: CycleId,
        choice: Choice,
    ) -> Result<SubmitReceipt> {
        self.submit_vote_at(participant, cycle, choice, self.current_cycle_id()).await
    }

    /// Record `participant`'s choice for `cycle` as seen on `today`.
    ///
    /// One vote per participant per cycle, enforced by conditional create.
    /// Votes for any cycle but `today`, or for a settled cycle, are rejected
    /// before anything is written.
    pub async fn submit_vote_at(
        &self,
        participant: &ParticipantId,
        cycle: CycleId,
        choice: Choice,
        today: CycleId,
    ) -> Result<SubmitReceipt> {
        if cycle != today {
            debug!(%participant, %cycle, %today, "vote outside the current cycle rejected");
            return Ok(SubmitReceipt::rejected(Rejection::CycleClosed));
        }
        if self.finalizer.is_finalized(cycle).await? {
            debug!(%participant, %cycle, "vote for settled cycle rejected");
            return Ok(SubmitReceipt::rejected(Rejection::CycleSettled));
        }

        let vote = Vote::new(cycle, choice);
        let created = self
            .store
            .set_json_if_absent(&self.keys.vote(participant, cycle), &vote, None)
            .await?;
        if !created {
            debug!(%participant, %cycle, "duplicate vote rejected");
            return Ok(SubmitReceipt::rejected(Rejection::AlreadyVoted));
        }

        self.store.atomic_increment(&self.keys.tally(cycle, choice), 1).await?;

        // The vote already counts; a failed append only leaves a gap in the history.
        if let Err(e) = self.append_history(participant, HistoryEntry::new(cycle.day(), choice)).await {
            warn!(%participant, %cycle, error = %e, "history append failed");
        }

        info!(%participant, %cycle, %choice, "vote accepted");
        Ok(SubmitReceipt::accepted())
    }

    /// [`submit_vote`](Self::submit_vote) from untrusted strings. Every field
    /// is validated before the store is touched.
    pub async fn submit_raw(&self, participant: &str, cycle: &str, choice: &str) -> Result<SubmitReceipt> {
        let participant = ParticipantId::new(participant)?;
        let cycle: CycleId = cycle.parse()?;
        let choice: Choice = choice.parse()?;
        self.submit_vote(&participant, cycle, choice).await
    }

    /// Append one entry to the participant's log. Returns false if the day
    /// was already present or every attempt conflicted.
    async fn append_history(&self, participant: &ParticipantId, entry: HistoryEntry) -> Result<bool> {
        let key = self.keys.history(participant);

        for attempt in 1..=self.config.max_award_attempts {
            let current = self.store.get_versioned(&key).await?;
            let mut log: Vec<Value> = match current.value.as_deref() {
                None => Vec::new(),
                Some(raw) => serde_json::from_slice(raw).unwrap_or_else(|e| {
                    warn!(%participant, error = %e, "replacing unreadable history log");
                    Vec::new()
                }),
            };

            let present = log
                .iter()
                .any(|raw| matches!(parse_entry(raw), ParsedEntry::Valid(e) if e.day == entry.day));
            if present {
                return Ok(false);
            }
            log.push(entry.to_value());

            let write = WriteOp::put(key.as_str(), serde_json::to_vec(&log)?);
            match self.store.transact(&[Watch::new(key.as_str(), current.version)], vec![write]).await? {
                Commit::Committed => return Ok(true),
                Commit::Conflict => debug!(%participant, attempt, "history append conflicted, retrying"),
            }
        }

        warn!(%participant, day = %entry.day, "history append retries exhausted");
        Ok(false)
    }

    /// Settled outcome, or the live counts with a preview of their outcome.
    pub async fn load_aggregate(&self, cycle: CycleId) -> Result<AggregateView> {
        if let Some(settled) = self.finalizer.load_settled(cycle).await? {
            return Ok(AggregateView::Settled(settled));
        }
        let aggregate = self.finalizer.load_aggregate(cycle).await?;
        let preview = self
            .config
            .rules
            .evaluate(aggregate.cooperate_count, aggregate.defect_count);
        Ok(AggregateView::Live {
            cycle_id: cycle,
            aggregate,
            preview,
        })
    }

    /// See [`CycleFinalizer::ensure_finalized`].
    pub async fn ensure_finalized(&self, cycle: CycleId) -> Result<Finalization> {
        self.finalizer.ensure_finalized(cycle).await
    }

    /// See [`CycleFinalizer::ensure_finalized_at`].
    pub async fn ensure_finalized_at(&self, cycle: CycleId, today: CycleId) -> Result<Finalization> {
        self.finalizer.ensure_finalized_at(cycle, today).await
    }

    /// See [`ParticipantAwarder::award_if_due`].
    pub async fn award_if_due(&self, participant: &ParticipantId, cycle: CycleId) -> Result<AwardOutcome> {
        self.awarder.award_if_due(participant, cycle).await
    }

    /// See [`ParticipantAwarder::award_if_due_at`].
    pub async fn award_if_due_at(
        &self,
        participant: &ParticipantId,
        cycle: CycleId,
        today: CycleId,
    ) -> Result<AwardOutcome> {
        self.awarder.award_if_due_at(participant, cycle, today).await
    }

    /// Ledger as of the current UTC day.
    pub async fn load_ledger(&self, participant: &ParticipantId) -> Result<ParticipantLedger> {
        self.load_ledger_at(participant, self.current_cycle_id()).await
    }

    pub async fn load_ledger_at(&self, participant: &ParticipantId, today: CycleId) -> Result<ParticipantLedger> {
        self.ledger.load(participant, today.day()).await
    }

    /// A participant's visit on the current UTC day.
    pub async fn visit(&self, participant: &ParticipantId) -> Result<VisitReport> {
        self.visit_at(participant, self.current_cycle_id()).await
    }

    /// Settle yesterday, credit any unawarded votes from the last
    /// `catch_up_days` cycles, and return the resulting ledger.
    pub async fn visit_at(&self, participant: &ParticipantId, today: CycleId) -> Result<VisitReport> {
        let finalization = match today.previous() {
            Some(previous) => Some(self.finalizer.ensure_finalized_at(previous, today).await?),
            None => None,
        };

        let mut awards = Vec::new();
        for days_back in 1..=self.config.catch_up_days {
            let Some(cycle) = today.days_before(days_back) else {
                break;
            };
            match self.awarder.award_if_due_at(participant, cycle, today).await? {
                AwardOutcome::NoVote => {}
                award => awards.push((cycle, award)),
            }
        }

        let ledger = self.load_ledger_at(participant, today).await?;
        Ok(VisitReport {
            finalization,
            awards,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use concord_outcome::OutcomeCategory;
    use async_trait::async_trait;
    use concord_store::{MemoryStore, RocksStore, Versioned};
    use std::time::Duration;

    fn engine() -> Engine<MemoryStore> {
        Engine::new(Arc::new(MemoryStore::new()), EngineConfig::default()).unwrap()
    }

    fn pid(name: &str) -> ParticipantId {
        ParticipantId::new(name).unwrap()
    }

    fn cycle(s: &str) -> CycleId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let config = EngineConfig::default().with_threshold_percent(50);
        assert!(matches!(
            Engine::new(Arc::new(MemoryStore::new()), config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn one_vote_per_participant_per_cycle() {
        let engine = engine();
        let day = cycle("2024-06-01");

        assert_eq!(
            engine.submit_vote_at(&pid("alice"), day, Choice::Cooperate, day).await.unwrap(),
            SubmitReceipt::accepted()
        );
        assert_eq!(
            engine.submit_vote_at(&pid("alice"), day, Choice::Defect, day).await.unwrap(),
            SubmitReceipt::rejected(Rejection::AlreadyVoted)
        );

        let AggregateView::Live { aggregate, .. } = engine.load_aggregate(day).await.unwrap() else {
            panic!("cycle should still be live");
        };
        assert_eq!(aggregate.cooperate_count, 1);
        assert_eq!(aggregate.defect_count, 0);

        let ledger = engine.load_ledger_at(&pid("alice"), day).await.unwrap();
        assert_eq!(ledger.history, vec![HistoryEntry::new(day.day(), Choice::Cooperate)]);
        assert_eq!(ledger.current_streak, 1);
    }

    #[tokio::test]
    async fn settled_cycle_rejects_votes() {
        let engine = engine();
        let day = cycle("2024-06-01");
        engine.submit_vote_at(&pid("alice"), day, Choice::Defect, day).await.unwrap();
        assert!(engine.ensure_finalized(day).await.unwrap().settled().is_some());

        // A caller whose clock still reads `day`
        assert_eq!(
            engine.submit_vote_at(&pid("bob"), day, Choice::Cooperate, day).await.unwrap(),
            SubmitReceipt::rejected(Rejection::CycleSettled)
        );
        let view = engine.load_aggregate(day).await.unwrap();
        assert!(view.is_settled());
        assert_eq!(view.outcome().category, OutcomeCategory::AllDefect);
    }

    #[tokio::test]
    async fn invalid_input_touches_nothing() {
        let engine = engine();
        for (who, day, choice) in [
            ("alice", "2024-06-01", "maybe"),
            ("al ice", "2024-06-01", "cooperate"),
            ("a:b", "2024-06-01", "cooperate"),
            ("", "2024-06-01", "defect"),
            ("alice", "June 1st", "defect"),
        ] {
            let result = engine.submit_raw(who, day, choice).await;
            assert!(matches!(result, Err(Error::InvalidInput(_))), "{who:?} {day:?} {choice:?}");
        }
        assert!(engine.store().is_empty().await);

        let receipt = engine.submit_raw("alice", "2024-06-01", "defect").await.unwrap();
        assert_eq!(receipt, SubmitReceipt::rejected(Rejection::CycleClosed));
        assert!(engine.store().is_empty().await);

        let today = engine.current_cycle_id().to_string();
        let receipt = engine.submit_raw("alice", &today, " Defect ").await.unwrap();
        assert!(receipt.accepted);
    }

    #[tokio::test]
    async fn live_view_previews_outcome() {
        let engine = engine();
        let day = cycle("2024-06-01");
        for who in ["a", "b", "c"] {
            engine.submit_vote_at(&pid(who), day, Choice::Cooperate, day).await.unwrap();
        }
        engine.submit_vote_at(&pid("d"), day, Choice::Defect, day).await.unwrap();

        let view = engine.load_aggregate(day).await.unwrap();
        assert!(!view.is_settled());
        // 3 of 4 is 75%
        assert_eq!(view.outcome().category, OutcomeCategory::AllCooperate);
    }

    #[tokio::test]
    async fn visit_settles_yesterday_and_credits() {
        let engine = engine();
        let yesterday = cycle("2024-06-01");
        let today = cycle("2024-06-02");
        engine.submit_vote_at(&pid("alice"), yesterday, Choice::Cooperate, yesterday).await.unwrap();
        engine.submit_vote_at(&pid("bob"), yesterday, Choice::Defect, yesterday).await.unwrap();

        let report = engine.visit_at(&pid("alice"), today).await.unwrap();
        assert!(matches!(report.finalization, Some(Finalization::Settled(_))));
        assert_eq!(report.awards, vec![(yesterday, AwardOutcome::Credited { points: 0, score: 0 })]);
        assert_eq!(report.ledger.current_streak, 0);
        assert_eq!(report.ledger.longest_streak, 1);

        let bob = engine.visit_at(&pid("bob"), today).await.unwrap();
        assert!(matches!(bob.finalization, Some(Finalization::AlreadySettled(_))));
        assert_eq!(bob.credited_points(), 5);
        assert_eq!(bob.ledger.cumulative_score, 5);

        // Second visit is a no-op
        let again = engine.visit_at(&pid("bob"), today).await.unwrap();
        assert_eq!(again.awards, vec![(yesterday, AwardOutcome::AlreadyAwarded)]);
        assert_eq!(again.ledger.cumulative_score, 5);
    }

    #[tokio::test]
    async fn visit_catches_up_on_missed_days() {
        let engine = engine();
        let old = cycle("2024-06-01");
        let today = cycle("2024-06-05");
        engine.submit_vote_at(&pid("alice"), old, Choice::Defect, old).await.unwrap();

        // Nobody visited on 06-02..06-04; the visit still settles 06-01
        let report = engine.visit_at(&pid("alice"), today).await.unwrap();
        assert_eq!(report.finalization, Some(Finalization::NothingToSettle));
        assert_eq!(report.awards, vec![(old, AwardOutcome::Credited { points: 1, score: 1 })]);
    }

    #[tokio::test]
    async fn catch_up_window_is_bounded() {
        let config = EngineConfig::default().with_catch_up_days(2);
        let engine = Engine::new(Arc::new(MemoryStore::new()), config).unwrap();
        let old = cycle("2024-06-01");
        engine.submit_vote_at(&pid("alice"), old, Choice::Defect, old).await.unwrap();

        let report = engine.visit_at(&pid("alice"), cycle("2024-06-05")).await.unwrap();
        assert!(report.awards.is_empty());
        assert_eq!(report.ledger.cumulative_score, 0);
    }

    #[tokio::test]
    async fn todays_vote_is_not_settled_by_a_visit() {
        let engine = engine();
        let today = cycle("2024-06-02");
        engine.submit_vote_at(&pid("alice"), today, Choice::Cooperate, today).await.unwrap();

        let report = engine.visit_at(&pid("alice"), today).await.unwrap();
        assert!(report.awards.is_empty());
        assert!(!engine.load_aggregate(today).await.unwrap().is_settled());
        assert_eq!(report.ledger.current_streak, 1);
    }

    #[tokio::test]
    async fn unreadable_history_is_replaced_on_append() {
        let engine = engine();
        let alice = pid("alice");
        engine.store().put(&engine.keys().history(&alice), b"{oops".to_vec()).await.unwrap();

        let day = cycle("2024-06-01");
        engine.submit_vote_at(&alice, day, Choice::Cooperate, day).await.unwrap();
        let ledger = engine.load_ledger_at(&alice, day).await.unwrap();
        assert_eq!(ledger.total_votes, 1);
        assert_eq!(ledger.skipped_entries, 0);
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let a = Engine::new(Arc::clone(&store), EngineConfig::default().with_namespace("a")).unwrap();
        let b = Engine::new(Arc::clone(&store), EngineConfig::default().with_namespace("b")).unwrap();
        let day = cycle("2024-06-01");

        assert!(a.submit_vote_at(&pid("alice"), day, Choice::Cooperate, day).await.unwrap().accepted);
        assert!(b.submit_vote_at(&pid("alice"), day, Choice::Defect, day).await.unwrap().accepted);
        a.ensure_finalized(day).await.unwrap();

        assert!(!b.load_aggregate(day).await.unwrap().is_settled());
        assert_eq!(
            a.load_aggregate(day).await.unwrap().outcome().category,
            OutcomeCategory::AllCooperate
        );
    }

    #[tokio::test]
    async fn runs_on_rocksdb() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let engine = Engine::new(store, EngineConfig::default()).unwrap();
        let day = cycle("2024-06-01");

        engine.submit_vote_at(&pid("alice"), day, Choice::Defect, day).await.unwrap();
        engine.submit_vote_at(&pid("bob"), day, Choice::Cooperate, day).await.unwrap();

        let report = engine.visit_at(&pid("alice"), cycle("2024-06-02")).await.unwrap();
        assert_eq!(report.credited_points(), 5);
        assert_eq!(report.ledger.cumulative_score, 5);
        assert_eq!(
            engine.award_if_due(&pid("alice"), day).await.unwrap(),
            AwardOutcome::AlreadyAwarded
        );
    }

    #[tokio::test]
    async fn only_the_current_cycle_takes_votes() {
        let engine = engine();
        let alice = pid("alice");
        let today = cycle("2024-06-10");

        for day in ["2024-06-03", "2024-06-09", "2024-06-11", "2030-01-01"] {
            assert_eq!(
                engine.submit_vote_at(&alice, cycle(day), Choice::Defect, today).await.unwrap(),
                SubmitReceipt::rejected(Rejection::CycleClosed),
                "{day}"
            );
        }
        let yesterday = engine.current_cycle_id().previous().unwrap();
        assert_eq!(
            engine.submit_vote(&alice, yesterday, Choice::Defect).await.unwrap(),
            SubmitReceipt::rejected(Rejection::CycleClosed)
        );
        assert!(engine.store().is_empty().await);

        // Nothing backdated can be settled or credited later
        let report = engine.visit_at(&alice, today).await.unwrap();
        assert!(report.awards.is_empty());
        assert_eq!(report.ledger.cumulative_score, 0);
        assert_eq!(report.ledger.longest_streak, 0);
    }

    /// A [`MemoryStore`] whose vote inserts take `delay` to land.
    struct SlowVoteStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl KvStore for SlowVoteStore {
        async fn get_versioned(&self, key: &str) -> concord_store::Result<Versioned> {
            self.inner.get_versioned(key).await
        }

        async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> concord_store::Result<bool> {
            if key.contains(":vote:") {
                tokio::time::sleep(self.delay).await;
            }
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
            self.inner.transact(watches, writes).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_vote_is_never_left_out_of_the_settlement() {
        let store = Arc::new(SlowVoteStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(100),
        });
        let engine = Engine::new(store, EngineConfig::default()).unwrap();
        let day = cycle("2024-06-01");
        for who in ["a", "b", "c"] {
            engine.submit_vote_at(&pid(who), day, Choice::Cooperate, day).await.unwrap();
        }

        // Someone tries to settle while the late vote is still in flight
        let late_pid = pid("late");
        let (late, settle) = tokio::join!(
            engine.submit_vote_at(&late_pid, day, Choice::Defect, day),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                engine.ensure_finalized_at(day, day).await
            }
        );
        assert!(late.unwrap().accepted);
        assert_eq!(settle.unwrap(), Finalization::Open);
        assert!(!engine.load_aggregate(day).await.unwrap().is_settled());

        // Settled the next day with every accepted vote counted
        let next = cycle("2024-06-02");
        let settled = engine.ensure_finalized_at(day, next).await.unwrap().into_settled().unwrap();
        assert_eq!((settled.cooperate_count, settled.defect_count), (3, 1));
        assert_eq!(settled.category, OutcomeCategory::AllCooperate);
        assert_eq!(
            engine.award_if_due_at(&pid("late"), day, next).await.unwrap(),
            AwardOutcome::Credited { points: 3, score: 3 }
        );
    }
}
