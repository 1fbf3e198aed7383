//! Cycle Outcome Rule
//!
//! Every cycle, each participant independently chooses to **cooperate** or
//! **defect**. Once the cycle closes, the two counts collapse into one of three
//! categories and every participant is paid according to their own choice.
//!
//! # The Rule
//!
//! | Condition | Category | Cooperators | Defectors |
//! |---|---|---|---|
//! | no votes | Mixed | 0 | 0 |
//! | cooperate ≥ 70% | AllCooperate | +3 | +3 |
//! | defect ≥ 70% | AllDefect | +1 | +1 |
//! | otherwise | Mixed | 0 | +5 |
//!
//! The threshold is inclusive and must stay above 50%, so at most one side
//! can ever qualify. Threshold and payoffs are plain values ([`OutcomeRules`])
//! rather than globals.

mod choice;
mod rules;

pub use choice::{Choice, OutcomeCategory, ParseChoiceError};
pub use rules::{outcome, Outcome, OutcomeRules, Payoffs, RulesError, DEFAULT_THRESHOLD_PERCENT};
