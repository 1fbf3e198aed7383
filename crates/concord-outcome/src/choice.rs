//! The two choices a participant can make, and the three outcome categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A participant's choice for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Cooperate,
    Defect,
}

impl Choice {
    /// Both choices, in a stable order.
    pub const ALL: [Choice; 2] = [Choice::Cooperate, Choice::Defect];

    /// Lowercase wire name ("cooperate" / "defect").
    pub const fn as_str(&self) -> &'static str {
        match self {
            Choice::Cooperate => "cooperate",
            Choice::Defect => "defect",
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognized choice string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized choice: {0:?} (expected \"cooperate\" or \"defect\")")]
pub struct ParseChoiceError(pub String);

impl FromStr for Choice {
    type Err = ParseChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooperate" => Ok(Choice::Cooperate),
            "defect" => Ok(Choice::Defect),
            _ => Err(ParseChoiceError(s.to_string())),
        }
    }
}

/// The settled category of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    /// Cooperators reached the threshold.
    AllCooperate,
    /// Defectors reached the threshold.
    AllDefect,
    /// Neither side reached the threshold, or nobody voted.
    Mixed,
}

impl fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeCategory::AllCooperate => "all_cooperate",
            OutcomeCategory::AllDefect => "all_defect",
            OutcomeCategory::Mixed => "mixed",
        };
        f.write_str(name)
    }
}
