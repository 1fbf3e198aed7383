//! Store key layout.
//!
//! ```text
//! {ns}:vote:{cycle}:{participant}     Vote (JSON, conditional create)
//! {ns}:tally:{cycle}:{choice}         integer counter
//! {ns}:settled:{cycle}                SettledOutcome (JSON)
//! {ns}:finalized:{cycle}              FinalizationMarker (JSON)
//! {ns}:score:{participant}            integer
//! {ns}:history:{participant}          JSON array of {day, choice}
//! {ns}:lock:finalize:{cycle}          LockRecord
//! {ns}:lock:award:{participant}:{cycle}
//! ```
//!
//! Participant ids and namespaces can not contain `:`, so keys never collide.

use crate::models::{CycleId, ParticipantId};
use concord_outcome::Choice;

/// Key builder for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    ns: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { ns: namespace.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn vote(&self, participant: &ParticipantId, cycle: CycleId) -> String {
        format!("{}:vote:{}:{}", self.ns, cycle, participant)
    }

    pub fn tally(&self, cycle: CycleId, choice: Choice) -> String {
        format!("{}:tally:{}:{}", self.ns, cycle, choice)
    }

    pub fn settled(&self, cycle: CycleId) -> String {
        format!("{}:settled:{}", self.ns, cycle)
    }

    pub fn finalized(&self, cycle: CycleId) -> String {
        format!("{}:finalized:{}", self.ns, cycle)
    }

    pub fn score(&self, participant: &ParticipantId) -> String {
        format!("{}:score:{}", self.ns, participant)
    }

    pub fn history(&self, participant: &ParticipantId) -> String {
        format!("{}:history:{}", self.ns, participant)
    }

    /// Prefix handed to the lock; resources below are appended to it.
    pub fn lock_prefix(&self) -> String {
        format!("{}:lock:", self.ns)
    }

    pub fn finalize_resource(cycle: CycleId) -> String {
        format!("finalize:{}", cycle)
    }

    pub fn award_resource(participant: &ParticipantId, cycle: CycleId) -> String {
        format!("award:{}:{}", participant, cycle)
    }
}
