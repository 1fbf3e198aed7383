//! Read-only participant view.

use super::cycle::ParticipantId;
use concord_streak::HistoryEntry;
use serde::Serialize;

/// Everything a presentation layer shows for one participant.
///
/// Streaks and totals are recomputed from the stored history on every load;
/// only `cumulative_score` is read as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantLedger {
    pub participant: ParticipantId,
    pub cumulative_score: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_votes: usize,
    pub cooperate_count: usize,
    pub defect_count: usize,
    /// Validated history, oldest first.
    pub history: Vec<HistoryEntry>,
    /// History elements dropped as unreadable.
    pub skipped_entries: usize,
}
