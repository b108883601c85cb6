//! Core entity types for leaderboard.db.
//!
//! A [`RankedEntry`] is one row of a board's descending-score ordering. A
//! [`ScoreChange`] describes the before/after state of a single score mutation.
//! `MetadataValue` holds the attribute bag kept alongside an entity's score.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed metadata value attached to an entity.
///
/// Uses the default externally-tagged serde representation for bincode compatibility.
/// The server API layer converts to/from untagged JSON at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

/// Attribute bag stored per entity (e.g. `last_updated`, `display_name`).
pub type Metadata = HashMap<String, MetadataValue>;

/// An entity with its score and 0-based rank in descending-score order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub entity: String,
    pub score: i64,
    /// 0-based position. Rank 0 is the highest score.
    pub rank: usize,
}

impl RankedEntry {
    /// 1-based position, for display.
    pub fn position(&self) -> usize {
        self.rank + 1
    }
}

/// Result of an insert or increment, observed inside the mutation's critical section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub entity: String,
    /// Score before the mutation, `None` if the entity was created by it.
    pub previous: Option<i64>,
    pub score: i64,
    /// 0-based rank before the mutation.
    pub previous_rank: Option<usize>,
    /// 0-based rank after the mutation.
    pub rank: usize,
}

impl ScoreChange {
    /// Returns `true` if the mutation created the entity.
    pub fn created(&self) -> bool {
        self.previous.is_none()
    }

    /// Signed rank movement: positive when the entity climbed.
    pub fn rank_delta(&self) -> i64 {
        match self.previous_rank {
            Some(before) => before as i64 - self.rank as i64,
            None => 0,
        }
    }
}
