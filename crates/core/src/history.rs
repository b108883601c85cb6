//! Point-in-time board snapshots.
//!
//! Each board keeps its most recent [`MAX_HISTORY_SNAPSHOTS`] snapshots, newest
//! first. Snapshots feed the growth figures reported by
//! [`analytics`](crate::analytics::analytics).

use crate::config::{MAX_HISTORY_SNAPSHOTS, SNAPSHOT_TOP_ENTRIES};
use crate::index::RankIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Summary of a board at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub taken_at: DateTime<Utc>,
    pub description: String,
    pub total_entities: usize,
    /// 0.0 for an empty board.
    pub average_score: f64,
    pub highest_score: Option<i64>,
    /// Up to [`SNAPSHOT_TOP_ENTRIES`] `(entity, score)` pairs, highest first.
    pub top: Vec<(String, i64)>,
}

impl BoardSnapshot {
    /// Captures the current state of an index. O(n) for the average.
    pub fn capture(index: &RankIndex, description: impl Into<String>, taken_at: DateTime<Utc>) -> Self {
        let total_entities = index.len();
        let average_score = if total_entities == 0 {
            0.0
        } else {
            let sum: i128 = index.iter().map(|(_, _, s)| s as i128).sum();
            sum as f64 / total_entities as f64
        };
        let top: Vec<(String, i64)> = index
            .iter()
            .take(SNAPSHOT_TOP_ENTRIES)
            .map(|(_, entity, score)| (entity.to_string(), score))
            .collect();

        Self {
            taken_at,
            description: description.into(),
            total_entities,
            average_score,
            highest_score: top.first().map(|(_, s)| *s),
            top,
        }
    }
}

/// Bounded, newest-first snapshot list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    snapshots: VecDeque<BoardSnapshot>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a snapshot at the front, evicting the oldest beyond capacity.
    pub fn record(&mut self, snapshot: BoardSnapshot) {
        self.snapshots.push_front(snapshot);
        self.snapshots.truncate(MAX_HISTORY_SNAPSHOTS);
    }

    /// Up to `limit` snapshots, newest first.
    pub fn recent(&self, limit: usize) -> Vec<BoardSnapshot> {
        self.snapshots.iter().take(limit).cloned().collect()
    }

    pub fn newest(&self) -> Option<&BoardSnapshot> {
        self.snapshots.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoardSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.snapshots.len() > MAX_HISTORY_SNAPSHOTS {
            return Err(format!(
                "history holds {} snapshots (max {})",
                self.snapshots.len(),
                MAX_HISTORY_SNAPSHOTS
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn index_of(entries: &[(&str, i64)]) -> RankIndex {
        let mut index = RankIndex::new();
        for (e, s) in entries {
            index.insert(*s, e.to_string());
        }
        index
    }

    #[test]
    fn test_capture_empty_board() {
        let snap = BoardSnapshot::capture(&RankIndex::new(), "empty", at(0));
        assert_eq!(snap.total_entities, 0);
        assert_eq!(snap.average_score, 0.0);
        assert_eq!(snap.highest_score, None);
        assert!(snap.top.is_empty());
    }

    #[test]
    fn test_capture_summary() {
        let index = index_of(&[("a", 100), ("b", 200), ("c", 150)]);
        let snap = BoardSnapshot::capture(&index, "daily", at(0));
        assert_eq!(snap.total_entities, 3);
        assert_eq!(snap.average_score, 150.0);
        assert_eq!(snap.highest_score, Some(200));
        assert_eq!(snap.top[0], ("b".to_string(), 200));
        assert_eq!(snap.description, "daily");
    }

    #[test]
    fn test_capture_keeps_top_ten() {
        let entries: Vec<(String, i64)> = (0..25).map(|i| (format!("p{:02}", i), i)).collect();
        let mut index = RankIndex::new();
        for (e, s) in &entries {
            index.insert(*s, e.clone());
        }
        let snap = BoardSnapshot::capture(&index, "", at(0));
        assert_eq!(snap.top.len(), SNAPSHOT_TOP_ENTRIES);
        assert_eq!(snap.top[0].1, 24);
    }

    #[test]
    fn test_history_newest_first_and_capped() {
        let index = RankIndex::new();
        let mut history = History::new();
        for i in 0..(MAX_HISTORY_SNAPSHOTS as i64 + 5) {
            history.record(BoardSnapshot::capture(&index, format!("s{}", i), at(i)));
        }
        assert_eq!(history.len(), MAX_HISTORY_SNAPSHOTS);
        let recent = history.recent(2);
        assert_eq!(recent[0].description, format!("s{}", MAX_HISTORY_SNAPSHOTS + 4));
        assert!(recent[0].taken_at > recent[1].taken_at);
        assert!(history.validate().is_ok());
    }
}
