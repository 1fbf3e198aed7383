//! Persisted entities and read views.
//!
//! # Core Types
//!
//! - [`Vote`] - one participant's choice for one cycle
//! - [`CycleAggregate`] - running per-cycle counts
//! - [`SettledOutcome`] - write-once result of a cycle
//! - [`FinalizationMarker`] - "settlement completed" flag
//!
//! # Views
//!
//! - [`AggregateView`] - settled result or live preview
//! - [`ParticipantLedger`] - score, streaks and history for display
//!
//! The store owns all of these; in-process values are rebuilt on every access.

mod cycle;
mod ledger;
mod settlement;
mod vote;

pub use cycle::{CycleId, ParticipantId, MAX_PARTICIPANT_ID_LEN};
pub use ledger::ParticipantLedger;
pub use settlement::{AggregateView, CycleAggregate, FinalizationMarker, SettledOutcome};
pub use vote::{Rejection, SubmitReceipt, Vote};

use crate::error::Result;
use concord_store::StoreError;
use tracing::warn;

/// Treat a corrupt record as absent; propagate every other store failure.
pub(crate) fn tolerate_corrupt<T>(result: std::result::Result<Option<T>, StoreError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(value),
        Err(StoreError::Corrupt { key, reason }) => {
            warn!(%key, %reason, "ignoring corrupt record");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
