//! Ledger Projection - the participant view, rebuilt from stored state.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::keys::Keys;
use crate::models::{ParticipantId, ParticipantLedger};
use chrono::NaiveDate;
use concord_outcome::Choice;
use concord_store::{decode_integer, KvStore, StoreError};
use concord_streak::{streaks, History};
use std::sync::Arc;
use tracing::warn;

/// Builds [`ParticipantLedger`]s. Holds no cached state.
pub struct LedgerProjection<S> {
    store: Arc<S>,
    keys: Keys,
}

impl<S> Clone for LedgerProjection<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
        }
    }
}

impl<S: KvStore> LedgerProjection<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            keys: Keys::new(config.namespace.clone()),
        }
    }

    /// The stored choice log, validated. Unreadable entries are skipped.
    pub async fn load_history(&self, participant: &ParticipantId) -> Result<History> {
        Ok(match self.store.get(&self.keys.history(participant)).await? {
            Some(bytes) => History::from_json(&bytes),
            None => History::new(),
        })
    }

    /// Stored cumulative score; an unreadable value reads as 0.
    pub async fn load_score(&self, participant: &ParticipantId) -> Result<i64> {
        let key = self.keys.score(participant);
        let raw = self.store.get(&key).await?;
        match decode_integer(&key, raw.as_deref()) {
            Ok(score) => Ok(score),
            Err(StoreError::NotAnInteger { key }) => {
                warn!(%key, "unreadable score shown as zero");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Assemble the ledger as of `today`.
    pub async fn load(&self, participant: &ParticipantId, today: NaiveDate) -> Result<ParticipantLedger> {
        let cumulative_score = self.load_score(participant).await?;
        let history = self.load_history(participant).await?;
        let streaks = streaks(&history, today);

        Ok(ParticipantLedger {
            participant: participant.clone(),
            cumulative_score,
            current_streak: streaks.current,
            longest_streak: streaks.longest,
            total_votes: history.len(),
            cooperate_count: history.count(Choice::Cooperate),
            defect_count: history.count(Choice::Defect),
            history: history.entries().collect(),
            skipped_entries: history.skipped(),
        })
    }
}
