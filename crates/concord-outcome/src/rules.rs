//! Threshold rule mapping vote counts to an outcome.
//!
//! - 0 votes → Mixed, nobody scores
//! - cooperators ≥ threshold% → AllCooperate, everyone gets the cooperation payoff
//! - defectors ≥ threshold% → AllDefect, everyone gets the defection payoff
//! - otherwise → Mixed, defectors exploit cooperators
//!
//! Percentages are compared in integer arithmetic (`count × 100 ≥ threshold × total`)
//! so the boundary is exact: 7 of 10 is exactly 70%.

use crate::choice::{Choice, OutcomeCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default share of the vote (in percent) one side needs to carry the cycle.
pub const DEFAULT_THRESHOLD_PERCENT: u32 = 70;

/// Point values for each category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payoffs {
    /// Awarded to every participant when cooperation carries the cycle.
    pub all_cooperate: u32,
    /// Awarded to every participant when defection carries the cycle.
    pub all_defect: u32,
    /// Awarded to cooperators in a mixed cycle.
    pub mixed_cooperator: u32,
    /// Awarded to defectors in a mixed cycle.
    pub mixed_defector: u32,
}

impl Default for Payoffs {
    fn default() -> Self {
        Self {
            all_cooperate: 3,
            all_defect: 1,
            mixed_cooperator: 0,
            mixed_defector: 5,
        }
    }
}

/// Rejected rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// A threshold at or below 50% would let both sides qualify at once.
    #[error("threshold must be in 51..=100 percent, got {0}")]
    ThresholdOutOfRange(u32),
}

/// The full rule set: threshold plus payoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRules {
    pub threshold_percent: u32,
    pub payoffs: Payoffs,
}

impl Default for OutcomeRules {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            payoffs: Payoffs::default(),
        }
    }
}

/// Result of applying the rules to a pair of counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub category: OutcomeCategory,
    pub points_for_cooperators: u32,
    pub points_for_defectors: u32,
}

impl Outcome {
    /// Points owed to a participant who made `choice`.
    pub const fn points_for(&self, choice: Choice) -> u32 {
        match choice {
            Choice::Cooperate => self.points_for_cooperators,
            Choice::Defect => self.points_for_defectors,
        }
    }
}

impl OutcomeRules {
    /// Build rules with a custom threshold, validating it.
    pub fn new(threshold_percent: u32, payoffs: Payoffs) -> Result<Self, RulesError> {
        let rules = Self {
            threshold_percent,
            payoffs,
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Check the threshold leaves room for exactly one winning side.
    pub fn validate(&self) -> Result<(), RulesError> {
        if (51..=100).contains(&self.threshold_percent) {
            Ok(())
        } else {
            Err(RulesError::ThresholdOutOfRange(self.threshold_percent))
        }
    }

    /// Apply the rules. Pure; never fails.
    pub fn evaluate(&self, cooperate_count: u64, defect_count: u64) -> Outcome {
        let total = u128::from(cooperate_count) + u128::from(defect_count);
        if total == 0 {
            return Outcome {
                category: OutcomeCategory::Mixed,
                points_for_cooperators: 0,
                points_for_defectors: 0,
            };
        }

        let p = &self.payoffs;
        if meets_threshold(cooperate_count, total, self.threshold_percent) {
            Outcome {
                category: OutcomeCategory::AllCooperate,
                points_for_cooperators: p.all_cooperate,
                points_for_defectors: p.all_cooperate,
            }
        } else if meets_threshold(defect_count, total, self.threshold_percent) {
            Outcome {
                category: OutcomeCategory::AllDefect,
                points_for_cooperators: p.all_defect,
                points_for_defectors: p.all_defect,
            }
        } else {
            Outcome {
                category: OutcomeCategory::Mixed,
                points_for_cooperators: p.mixed_cooperator,
                points_for_defectors: p.mixed_defector,
            }
        }
    }
}

/// `count / total ≥ threshold%`, inclusive.
fn meets_threshold(count: u64, total: u128, threshold_percent: u32) -> bool {
    u128::from(count) * 100 >= u128::from(threshold_percent) * total
}

/// Apply the default rules (70% threshold, payoffs 3/1/0/5).
///
/// # Examples
///
/// ```
/// use concord_outcome::{outcome, OutcomeCategory};
///
/// let o = outcome(7, 3);
/// assert_eq!(o.category, OutcomeCategory::AllCooperate);
/// assert_eq!(o.points_for_defectors, 3);
/// ```
pub fn outcome(cooperate_count: u64, defect_count: u64) -> Outcome {
    OutcomeRules::default().evaluate(cooperate_count, defect_count)
}
