//! A participant's vote for one cycle.

use super::cycle::CycleId;
use chrono::{DateTime, Utc};
use concord_outcome::Choice;
use serde::{Deserialize, Serialize};

/// Created once per participant per cycle by conditional create.
///
/// `choice` and `cast_at` never change. `awarded` flips false → true exactly
/// once, in the same atomic commit that credits the score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub choice: Choice,
    pub cast_at: DateTime<Utc>,
    pub cycle_id: CycleId,
    #[serde(default)]
    pub awarded: bool,
    #[serde(default)]
    pub awarded_at: Option<DateTime<Utc>>,
    /// Points credited by the award, once awarded.
    #[serde(default)]
    pub points: Option<u32>,
}

impl Vote {
    /// A fresh, unawarded vote cast now.
    pub fn new(cycle_id: CycleId, choice: Choice) -> Self {
        Self {
            choice,
            cast_at: Utc::now(),
            cycle_id,
            awarded: false,
            awarded_at: None,
            points: None,
        }
    }

    /// The same vote marked as awarded.
    #[must_use]
    pub fn into_awarded(self, points: u32, at: DateTime<Utc>) -> Self {
        Self {
            awarded: true,
            awarded_at: Some(at),
            points: Some(points),
            ..self
        }
    }
}

/// Why a vote was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// This participant already voted in this cycle.
    AlreadyVoted,
    /// The cycle's outcome has already been settled.
    CycleSettled,
    /// Votes are only taken for the current cycle.
    CycleClosed,
}

/// Result of a vote submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub accepted: bool,
    pub rejection: Option<Rejection>,
}

impl SubmitReceipt {
    pub const fn accepted() -> Self {
        Self {
            accepted: true,
            rejection: None,
        }
    }

    pub const fn rejected(reason: Rejection) -> Self {
        Self {
            accepted: false,
            rejection: Some(reason),
        }
    }
}
