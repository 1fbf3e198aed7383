//! Cycle Finalizer - compute and cache a cycle's outcome exactly once.
//!
//! # Protocol
//!
//! 1. Fast path: a cached [`SettledOutcome`] is returned without locking.
//!    A cycle that is not strictly before today is still taking votes and
//!    is never settled.
//! 2. Take the `finalize:{cycle}` lock. Losing it means another caller is
//!    settling right now; return [`Finalization::Contended`].
//! 3. Re-check the cache under the lock (it may have been written between 1 and 2).
//! 4. Read the tallies. Zero votes settles nothing.
//! 5. Write outcome and marker in one `transact` watching the outcome key.
//! 6. Release the lock.
//!
//! Any number of concurrent callers produce at most one write, and every
//! caller that sees an outcome sees the same one.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::keys::Keys;
use crate::models::{tolerate_corrupt, CycleAggregate, CycleId, FinalizationMarker, SettledOutcome};
use chrono::Utc;
use concord_outcome::{Choice, OutcomeRules};
use concord_store::{
    decode_integer, decode_json, Commit, DistributedLock, JsonStoreExt, KvStore, LockLease, StoreError, Watch,
    WriteOp,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`CycleFinalizer::ensure_finalized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// The outcome already existed.
    AlreadySettled(SettledOutcome),
    /// This call computed and wrote the outcome.
    Settled(SettledOutcome),
    /// Another caller holds the finalization lock.
    Contended,
    /// No votes were cast; nothing was written.
    NothingToSettle,
    /// The cycle is still taking votes; nothing was written.
    Open,
}

impl Finalization {
    /// The outcome, if one exists after this call.
    pub fn settled(&self) -> Option<&SettledOutcome> {
        match self {
            Finalization::AlreadySettled(s) | Finalization::Settled(s) => Some(s),
            Finalization::Contended | Finalization::NothingToSettle | Finalization::Open => None,
        }
    }

    pub fn into_settled(self) -> Option<SettledOutcome> {
        match self {
            Finalization::AlreadySettled(s) | Finalization::Settled(s) => Some(s),
            Finalization::Contended | Finalization::NothingToSettle | Finalization::Open => None,
        }
    }
}

/// Release a lease, leaving it to expire if the store is unreachable.
pub(crate) async fn release_lease<S: KvStore>(lock: &DistributedLock<S>, lease: &LockLease) {
    match lock.release(lease).await {
        Ok(true) => {}
        Ok(false) => warn!(resource = %lease.resource, "lock expired before release"),
        Err(e) => warn!(resource = %lease.resource, error = %e, "lock release failed; left to expire"),
    }
}

/// Settles cycles.
pub struct CycleFinalizer<S> {
    store: Arc<S>,
    lock: DistributedLock<S>,
    keys: Keys,
    rules: OutcomeRules,
    lock_ttl: Duration,
}

impl<S> Clone for CycleFinalizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lock: self.lock.clone(),
            keys: self.keys.clone(),
            rules: self.rules,
            lock_ttl: self.lock_ttl,
        }
    }
}

impl<S: KvStore> CycleFinalizer<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        let keys = Keys::new(config.namespace.clone());
        let lock = DistributedLock::with_prefix(Arc::clone(&store), keys.lock_prefix());
        Self {
            store,
            lock,
            keys,
            rules: config.rules,
            lock_ttl: config.lock_ttl,
        }
    }

    /// The cached outcome, if present and readable.
    pub async fn load_settled(&self, cycle: CycleId) -> Result<Option<SettledOutcome>> {
        tolerate_corrupt(self.store.get_json(&self.keys.settled(cycle)).await)
    }

    /// Whether the finalization marker for `cycle` exists.
    pub async fn is_finalized(&self, cycle: CycleId) -> Result<bool> {
        Ok(self.store.get(&self.keys.finalized(cycle)).await?.is_some())
    }

    /// Current tallies. An unreadable counter counts as zero.
    pub async fn load_aggregate(&self, cycle: CycleId) -> Result<CycleAggregate> {
        Ok(CycleAggregate {
            cooperate_count: self.read_tally(cycle, Choice::Cooperate).await?,
            defect_count: self.read_tally(cycle, Choice::Defect).await?,
        })
    }

    async fn read_tally(&self, cycle: CycleId, choice: Choice) -> Result<u64> {
        let key = self.keys.tally(cycle, choice);
        let raw = self.store.get(&key).await?;
        match decode_integer(&key, raw.as_deref()) {
            Ok(n) => Ok(u64::try_from(n).unwrap_or(0)),
            Err(StoreError::NotAnInteger { key }) => {
                warn!(%key, "unreadable tally counted as zero");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Settle `cycle` if nobody has yet, as of the current UTC day.
    pub async fn ensure_finalized(&self, cycle: CycleId) -> Result<Finalization> {
        self.ensure_finalized_at(cycle, CycleId::today()).await
    }

    /// Settle `cycle` if nobody has yet and it ended before `today`. Safe to
    /// call from any number of uncoordinated callers at once.
    pub async fn ensure_finalized_at(&self, cycle: CycleId, today: CycleId) -> Result<Finalization> {
        if let Some(settled) = self.load_settled(cycle).await? {
            debug!(%cycle, "already settled");
            return Ok(Finalization::AlreadySettled(settled));
        }
        if cycle >= today {
            debug!(%cycle, %today, "cycle still open");
            return Ok(Finalization::Open);
        }

        let resource = Keys::finalize_resource(cycle);
        let Some(lease) = self.lock.acquire(&resource, self.lock_ttl).await? else {
            debug!(%cycle, "finalization in progress elsewhere");
            return Ok(Finalization::Contended);
        };

        let result = self.settle_locked(cycle).await;
        release_lease(&self.lock, &lease).await;
        result
    }

    async fn settle_locked(&self, cycle: CycleId) -> Result<Finalization> {
        let settled_key = self.keys.settled(cycle);
        let current = self.store.get_versioned(&settled_key).await?;
        if let Some(raw) = &current.value {
            match decode_json::<SettledOutcome>(&settled_key, raw) {
                Ok(settled) => {
                    debug!(%cycle, "settled while waiting for lock");
                    return Ok(Finalization::AlreadySettled(settled));
                }
                Err(e) => warn!(%cycle, error = %e, "replacing corrupt settlement"),
            }
        }

        let aggregate = self.load_aggregate(cycle).await?;
        if aggregate.is_empty() {
            debug!(%cycle, "no votes, nothing to settle");
            return Ok(Finalization::NothingToSettle);
        }

        let outcome = self.rules.evaluate(aggregate.cooperate_count, aggregate.defect_count);
        let settled = SettledOutcome::new(cycle, aggregate, outcome);
        let marker = FinalizationMarker {
            cycle_id: cycle,
            finalized_at: Utc::now(),
        };

        let writes = vec![
            WriteOp::put(settled_key.clone(), serde_json::to_vec(&settled)?),
            WriteOp::put(self.keys.finalized(cycle), serde_json::to_vec(&marker)?),
        ];
        match self
            .store
            .transact(&[Watch::new(settled_key, current.version)], writes)
            .await?
        {
            Commit::Committed => {
                info!(
                    %cycle,
                    category = %settled.category,
                    cooperate = settled.cooperate_count,
                    defect = settled.defect_count,
                    "cycle settled"
                );
                Ok(Finalization::Settled(settled))
            }
            Commit::Conflict => {
                // Only possible if our lease expired mid-settlement.
                warn!(%cycle, "settlement write lost to a concurrent writer");
                Ok(match self.load_settled(cycle).await? {
                    Some(settled) => Finalization::AlreadySettled(settled),
                    None => Finalization::Contended,
                })
            }
        }
    }
}
