//! Participant Awarder - credit each participant once per settled cycle.
//!
//! The award lock keeps sessions of one participant from doing duplicate
//! work. Exactly-once itself rests on the final commit: the `awarded` flag
//! and the new score are written in one `transact` that watches both keys,
//! so a concurrent writer (or a holder whose lease expired) makes the commit
//! fail instead of double crediting.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::finalizer::{release_lease, CycleFinalizer, Finalization};
use crate::keys::Keys;
use crate::models::{tolerate_corrupt, CycleId, ParticipantId, SettledOutcome, Vote};
use chrono::Utc;
use concord_store::{
    decode_integer, decode_json, encode_integer, Commit, DistributedLock, JsonStoreExt, KvStore, StoreError,
    Watch, WriteOp,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`ParticipantAwarder::award_if_due`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    /// No vote for this participant and cycle.
    NoVote,
    /// Credit was applied earlier.
    AlreadyAwarded,
    /// The cycle has no settled outcome yet.
    NotSettled,
    /// Another session holds the lock, or every optimistic attempt conflicted.
    Contended,
    /// This call credited `points`; `score` is the new cumulative score.
    Credited { points: u32, score: i64 },
}

impl AwardOutcome {
    pub fn is_credited(&self) -> bool {
        matches!(self, AwardOutcome::Credited { .. })
    }
}

/// Applies settled outcomes to participant scores.
pub struct ParticipantAwarder<S> {
    store: Arc<S>,
    lock: DistributedLock<S>,
    keys: Keys,
    finalizer: CycleFinalizer<S>,
    lock_ttl: Duration,
    max_attempts: u32,
}

impl<S> Clone for ParticipantAwarder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lock: self.lock.clone(),
            keys: self.keys.clone(),
            finalizer: self.finalizer.clone(),
            lock_ttl: self.lock_ttl,
            max_attempts: self.max_attempts,
        }
    }
}

impl<S: KvStore> ParticipantAwarder<S> {
    pub fn new(store: Arc<S>, finalizer: CycleFinalizer<S>, config: &EngineConfig) -> Self {
        let keys = Keys::new(config.namespace.clone());
        let lock = DistributedLock::with_prefix(Arc::clone(&store), keys.lock_prefix());
        Self {
            store,
            lock,
            keys,
            finalizer,
            lock_ttl: config.lock_ttl,
            max_attempts: config.max_award_attempts.max(1),
        }
    }

    /// Load a participant's vote. A corrupt vote reads as no vote.
    pub async fn load_vote(&self, participant: &ParticipantId, cycle: CycleId) -> Result<Option<Vote>> {
        tolerate_corrupt(self.store.get_json(&self.keys.vote(participant, cycle)).await)
    }

    /// [`award_if_due_at`](Self::award_if_due_at) as of the current UTC day.
    pub async fn award_if_due(&self, participant: &ParticipantId, cycle: CycleId) -> Result<AwardOutcome> {
        self.award_if_due_at(participant, cycle, CycleId::today()).await
    }

    /// Credit `participant` for `cycle` if they voted, the cycle is settled
    /// and no credit was applied yet. Settles the cycle on the way if it
    /// ended before `today`.
    pub async fn award_if_due_at(
        &self,
        participant: &ParticipantId,
        cycle: CycleId,
        today: CycleId,
    ) -> Result<AwardOutcome> {
        let Some(vote) = self.load_vote(participant, cycle).await? else {
            return Ok(AwardOutcome::NoVote);
        };
        if vote.awarded {
            return Ok(AwardOutcome::AlreadyAwarded);
        }

        let settled = match self.finalizer.load_settled(cycle).await? {
            Some(settled) => settled,
            None => match self.finalizer.ensure_finalized_at(cycle, today).await? {
                Finalization::AlreadySettled(settled) | Finalization::Settled(settled) => settled,
                Finalization::Contended => return Ok(AwardOutcome::Contended),
                Finalization::NothingToSettle | Finalization::Open => return Ok(AwardOutcome::NotSettled),
            },
        };

        let resource = Keys::award_resource(participant, cycle);
        let Some(lease) = self.lock.acquire(&resource, self.lock_ttl).await? else {
            debug!(%participant, %cycle, "award in progress elsewhere");
            return Ok(AwardOutcome::Contended);
        };

        let result = self.credit_locked(participant, cycle, &settled).await;
        release_lease(&self.lock, &lease).await;
        result
    }

    async fn credit_locked(
        &self,
        participant: &ParticipantId,
        cycle: CycleId,
        settled: &SettledOutcome,
    ) -> Result<AwardOutcome> {
        let vote_key = self.keys.vote(participant, cycle);
        let score_key = self.keys.score(participant);

        for attempt in 1..=self.max_attempts {
            let vote_entry = self.store.get_versioned(&vote_key).await?;
            let Some(raw) = vote_entry.value.as_deref() else {
                return Ok(AwardOutcome::NoVote);
            };
            let vote: Vote = match decode_json(&vote_key, raw) {
                Ok(vote) => vote,
                Err(e) => {
                    warn!(%participant, %cycle, error = %e, "vote became unreadable");
                    return Ok(AwardOutcome::NoVote);
                }
            };
            if vote.awarded {
                return Ok(AwardOutcome::AlreadyAwarded);
            }

            let score_entry = self.store.get_versioned(&score_key).await?;
            let current = match decode_integer(&score_key, score_entry.value.as_deref()) {
                Ok(score) => score,
                Err(StoreError::NotAnInteger { key }) => {
                    warn!(%key, "unreadable score reset to zero");
                    0
                }
                Err(e) => return Err(e.into()),
            };

            let points = settled.points_for(vote.choice);
            let score = current.saturating_add(i64::from(points));
            let awarded = vote.into_awarded(points, Utc::now());

            let watches = [
                Watch::new(vote_key.as_str(), vote_entry.version),
                Watch::new(score_key.as_str(), score_entry.version),
            ];
            let writes = vec![
                WriteOp::put(vote_key.as_str(), serde_json::to_vec(&awarded)?),
                WriteOp::put(score_key.as_str(), encode_integer(score)),
            ];

            match self.store.transact(&watches, writes).await? {
                Commit::Committed => {
                    info!(%participant, %cycle, points, score, "award credited");
                    return Ok(AwardOutcome::Credited { points, score });
                }
                Commit::Conflict => {
                    debug!(%participant, %cycle, attempt, "award commit conflicted, retrying");
                }
            }
        }

        warn!(%participant, %cycle, attempts = self.max_attempts, "award retries exhausted");
        Ok(AwardOutcome::Contended)
    }
}
