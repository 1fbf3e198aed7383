//! Participation Streaks
//!
//! A participant's choices are kept as an append-only log of `(day, choice)`
//! pairs keyed by UTC calendar day. This crate turns that log into:
//!
//! - a validated [`History`] (one entry per day; malformed elements skipped)
//! - the **current streak**: consecutive days ending today
//! - the **longest streak**: the best run of consecutive days ever
//!
//! Corrupt elements never fail the whole log. They are dropped and counted,
//! which can open a gap in an otherwise continuous run.

mod history;
mod streak;

pub use history::{parse_entry, History, HistoryEntry, ParsedEntry, SkipReason};
pub use streak::{current_streak, longest_streak, streaks, Streaks};
