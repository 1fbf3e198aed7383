//! Streak derivation.
//!
//! Both numbers are recomputed from the full validated history every time;
//! nothing incremental is trusted.

use crate::history::History;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Current and best consecutive-day participation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streaks {
    /// Consecutive days ending at `today`. 0 if `today` has no entry.
    pub current: u32,
    /// Longest run of consecutive days anywhere in the history.
    pub longest: u32,
}

/// Count back from `today` until the first missing day.
pub fn current_streak(history: &History, today: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = Some(today);
    while let Some(d) = day {
        if !history.contains(d) {
            break;
        }
        count += 1;
        day = d.pred_opt();
    }
    count
}

/// Longest run where each day follows the previous by exactly one calendar day.
pub fn longest_streak(history: &History) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;

    for day in history.days() {
        run = match prev.and_then(|p| p.succ_opt()) {
            Some(next) if next == day => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }
    longest
}

/// Both streaks as of `today`.
pub fn streaks(history: &History, today: NaiveDate) -> Streaks {
    Streaks {
        current: current_streak(history, today),
        longest: longest_streak(history),
    }
}
