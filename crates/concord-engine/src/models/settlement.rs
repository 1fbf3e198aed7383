//! Per-cycle tallies and the settled outcome.

use super::cycle::CycleId;
use chrono::{DateTime, Utc};
use concord_outcome::{Choice, Outcome, OutcomeCategory};
use serde::{Deserialize, Serialize};

/// Running counts for one cycle. Only ever changed by atomic increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleAggregate {
    pub cooperate_count: u64,
    pub defect_count: u64,
}

impl CycleAggregate {
    pub const fn total(&self) -> u64 {
        self.cooperate_count + self.defect_count
    }

    pub const fn count(&self, choice: Choice) -> u64 {
        match choice {
            Choice::Cooperate => self.cooperate_count,
            Choice::Defect => self.defect_count,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// The authoritative, write-once result of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledOutcome {
    pub cycle_id: CycleId,
    pub total_votes: u64,
    pub cooperate_count: u64,
    pub defect_count: u64,
    pub category: OutcomeCategory,
    pub points_for_cooperators: u32,
    pub points_for_defectors: u32,
    pub settled_at: DateTime<Utc>,
}

impl SettledOutcome {
    /// Freeze `aggregate` and its computed `outcome`.
    pub fn new(cycle_id: CycleId, aggregate: CycleAggregate, outcome: Outcome) -> Self {
        Self {
            cycle_id,
            total_votes: aggregate.total(),
            cooperate_count: aggregate.cooperate_count,
            defect_count: aggregate.defect_count,
            category: outcome.category,
            points_for_cooperators: outcome.points_for_cooperators,
            points_for_defectors: outcome.points_for_defectors,
            settled_at: Utc::now(),
        }
    }

    pub const fn outcome(&self) -> Outcome {
        Outcome {
            category: self.category,
            points_for_cooperators: self.points_for_cooperators,
            points_for_defectors: self.points_for_defectors,
        }
    }

    pub const fn points_for(&self, choice: Choice) -> u32 {
        self.outcome().points_for(choice)
    }
}

/// Records that settlement of a cycle completed. Written in the same commit as
/// [`SettledOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationMarker {
    pub cycle_id: CycleId,
    pub finalized_at: DateTime<Utc>,
}

/// What a reader sees for a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AggregateView {
    /// Settled; numbers are final.
    Settled(SettledOutcome),
    /// Still open; `preview` is what the current counts would settle to.
    Live {
        cycle_id: CycleId,
        aggregate: CycleAggregate,
        preview: Outcome,
    },
}

impl AggregateView {
    pub fn is_settled(&self) -> bool {
        matches!(self, AggregateView::Settled(_))
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            AggregateView::Settled(settled) => settled.outcome(),
            AggregateView::Live { preview, .. } => *preview,
        }
    }
}
