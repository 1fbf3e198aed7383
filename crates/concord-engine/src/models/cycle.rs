//! Identifiers: cycles are UTC calendar days, participants are opaque ids.

use crate::error::{Error, Result};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One decision cycle: a UTC calendar day, rendered `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(NaiveDate);

impl CycleId {
    pub const fn new(day: NaiveDate) -> Self {
        Self(day)
    }

    /// The cycle for the current UTC day.
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    pub const fn day(&self) -> NaiveDate {
        self.0
    }

    /// The cycle before this one.
    pub fn previous(&self) -> Option<Self> {
        self.0.pred_opt().map(Self)
    }

    /// The cycle `days` before this one.
    pub fn days_before(&self, days: u32) -> Option<Self> {
        self.0.checked_sub_signed(Duration::days(i64::from(days))).map(Self)
    }
}

impl From<NaiveDate> for CycleId {
    fn from(day: NaiveDate) -> Self {
        Self(day)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for CycleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("cycle id must be YYYY-MM-DD, got {s:?}")))
    }
}

/// Maximum participant id length.
pub const MAX_PARTICIPANT_ID_LEN: usize = 128;

/// A validated participant id, safe to embed in store keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validate: non-empty, bounded, no whitespace, no `:` key separator.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("participant id is empty".into()));
        }
        if id.len() > MAX_PARTICIPANT_ID_LEN {
            return Err(Error::InvalidInput(format!(
                "participant id longer than {MAX_PARTICIPANT_ID_LEN} bytes"
            )));
        }
        if id.chars().any(|c| c == ':' || c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidInput(format!(
                "participant id {id:?} contains ':' or whitespace"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
