//! Parse-and-validate step for a participant's choice log.
//!
//! The log is stored as a JSON array. Every element is checked on its own:
//! a well-formed `{ "day": ..., "choice": ... }` object becomes a
//! [`HistoryEntry`]; anything else is skipped with a [`SkipReason`]. No default
//! choice is ever guessed, so a skipped element shows up as a gap in the
//! participant's history.

use chrono::{DateTime, NaiveDate, Utc};
use concord_outcome::Choice;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// One validated log element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// UTC calendar day of the cycle.
    pub day: NaiveDate,
    pub choice: Choice,
}

impl HistoryEntry {
    pub const fn new(day: NaiveDate, choice: Choice) -> Self {
        Self { day, choice }
    }

    /// Encode for appending to the stored log.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "day": self.day.format("%Y-%m-%d").to_string(),
            "choice": self.choice.as_str(),
        })
    }
}

/// Why a log element was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A bare string with no recorded choice.
    BareString,
    /// Neither an object nor a string.
    NotAnObject,
    MissingDay,
    BadDay(String),
    MissingChoice,
    BadChoice(String),
    /// Another element already claimed the same day.
    DuplicateDay(NaiveDate),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BareString => write!(f, "bare string entry has no choice"),
            SkipReason::NotAnObject => write!(f, "entry is not an object"),
            SkipReason::MissingDay => write!(f, "missing day"),
            SkipReason::BadDay(s) => write!(f, "unparseable day {s:?}"),
            SkipReason::MissingChoice => write!(f, "missing choice"),
            SkipReason::BadChoice(s) => write!(f, "unrecognized choice {s:?}"),
            SkipReason::DuplicateDay(d) => write!(f, "duplicate day {d}"),
        }
    }
}

/// Tagged result of validating one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEntry {
    Valid(HistoryEntry),
    Skip(SkipReason),
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (reduced to its UTC day).
fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc).date_naive()))
}

/// Validate a single raw log element.
pub fn parse_entry(raw: &Value) -> ParsedEntry {
    let obj = match raw {
        Value::Object(obj) => obj,
        Value::String(_) => return ParsedEntry::Skip(SkipReason::BareString),
        _ => return ParsedEntry::Skip(SkipReason::NotAnObject),
    };

    let day = match obj.get("day") {
        None | Some(Value::Null) => return ParsedEntry::Skip(SkipReason::MissingDay),
        Some(Value::String(s)) => match parse_day(s) {
            Some(day) => day,
            None => return ParsedEntry::Skip(SkipReason::BadDay(s.clone())),
        },
        Some(other) => return ParsedEntry::Skip(SkipReason::BadDay(other.to_string())),
    };

    let choice = match obj.get("choice") {
        None | Some(Value::Null) => return ParsedEntry::Skip(SkipReason::MissingChoice),
        Some(Value::String(s)) => match s.parse::<Choice>() {
            Ok(choice) => choice,
            Err(_) => return ParsedEntry::Skip(SkipReason::BadChoice(s.clone())),
        },
        Some(other) => return ParsedEntry::Skip(SkipReason::BadChoice(other.to_string())),
    };

    ParsedEntry::Valid(HistoryEntry { day, choice })
}

/// A validated log: one entry per day, sorted by day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: BTreeMap<NaiveDate, Choice>,
    skipped: usize,
}

impl History {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate raw elements, keeping the first valid entry per day.
    pub fn from_values(values: &[Value]) -> Self {
        let mut history = Self::new();
        for (index, raw) in values.iter().enumerate() {
            let reason = match parse_entry(raw) {
                ParsedEntry::Valid(entry) => {
                    if history.entries.contains_key(&entry.day) {
                        SkipReason::DuplicateDay(entry.day)
                    } else {
                        history.entries.insert(entry.day, entry.choice);
                        continue;
                    }
                }
                ParsedEntry::Skip(reason) => reason,
            };
            warn!(index, %reason, "skipping history entry");
            history.skipped += 1;
        }
        history
    }

    /// Decode a stored log. A log that is not a JSON array yields an empty
    /// history with one skipped element.
    pub fn from_json(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Vec<Value>>(bytes) {
            Ok(values) => Self::from_values(&values),
            Err(e) => {
                warn!(error = %e, "history log is not a JSON array");
                Self {
                    entries: BTreeMap::new(),
                    skipped: 1,
                }
            }
        }
    }

    /// Build directly from validated entries (first entry per day wins).
    pub fn from_entries(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut history = Self::new();
        for entry in entries {
            if history.entries.contains_key(&entry.day) {
                history.skipped += 1;
            } else {
                history.entries.insert(entry.day, entry.choice);
            }
        }
        history
    }

    /// Entries in day order.
    pub fn entries(&self) -> impl Iterator<Item = HistoryEntry> + '_ {
        self.entries.iter().map(|(day, choice)| HistoryEntry::new(*day, *choice))
    }

    /// Days present, ascending.
    pub fn days(&self) -> impl DoubleEndedIterator<Item = NaiveDate> + '_ {
        self.entries.keys().copied()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.entries.contains_key(&day)
    }

    pub fn choice_on(&self, day: NaiveDate) -> Option<Choice> {
        self.entries.get(&day).copied()
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of elements dropped during validation.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Count of valid entries with the given choice.
    pub fn count(&self, choice: Choice) -> usize {
        self.entries.values().filter(|c| **c == choice).count()
    }
}
