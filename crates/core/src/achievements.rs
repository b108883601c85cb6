//! Static achievement catalogue.
//!
//! Achievements are derived from an entity's score and 1-based position; nothing
//! is stored. [`unlocked`] reports what a single mutation newly earned.

use crate::entity::ScoreChange;
use serde::Serialize;

/// What an achievement is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Score ≥ threshold.
    ScoreAtLeast(i64),
    /// 1-based position ≤ threshold.
    PositionAtMost(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub condition: Condition,
    pub icon: &'static str,
    pub points: u32,
}

impl Achievement {
    /// Returns `true` if the achievement holds for this score and position.
    pub fn is_met(&self, score: i64, position: usize) -> bool {
        match self.condition {
            Condition::ScoreAtLeast(threshold) => score >= threshold,
            Condition::PositionAtMost(threshold) => position >= 1 && position <= threshold,
        }
    }
}

pub const CATALOGUE: &[Achievement] = &[
    Achievement {
        id: "first_score",
        name: "First Steps",
        description: "Score your first points",
        condition: Condition::ScoreAtLeast(1),
        icon: "🎯",
        points: 50,
    },
    Achievement {
        id: "bronze_league",
        name: "Bronze League",
        description: "Reach 1000 points",
        condition: Condition::ScoreAtLeast(1_000),
        icon: "🥉",
        points: 100,
    },
    Achievement {
        id: "silver_league",
        name: "Silver League",
        description: "Reach 2500 points",
        condition: Condition::ScoreAtLeast(2_500),
        icon: "🥈",
        points: 200,
    },
    Achievement {
        id: "gold_league",
        name: "Gold League",
        description: "Reach 5000 points",
        condition: Condition::ScoreAtLeast(5_000),
        icon: "🥇",
        points: 300,
    },
    Achievement {
        id: "top_10",
        name: "Elite Player",
        description: "Reach the top 10",
        condition: Condition::PositionAtMost(10),
        icon: "⭐",
        points: 150,
    },
    Achievement {
        id: "top_3",
        name: "Podium Finisher",
        description: "Reach the top 3",
        condition: Condition::PositionAtMost(3),
        icon: "🏅",
        points: 250,
    },
    Achievement {
        id: "champion",
        name: "Champion",
        description: "Reach #1",
        condition: Condition::PositionAtMost(1),
        icon: "👑",
        points: 500,
    },
];

/// Every achievement met by `score` at 1-based `position`.
pub fn earned(score: i64, position: usize) -> Vec<&'static Achievement> {
    CATALOGUE.iter().filter(|a| a.is_met(score, position)).collect()
}

/// Achievements met after `change` that were not met before it.
pub fn unlocked(change: &ScoreChange) -> Vec<&'static Achievement> {
    let after_position = change.rank + 1;
    CATALOGUE
        .iter()
        .filter(|a| a.is_met(change.score, after_position))
        .filter(|a| match (change.previous, change.previous_rank) {
            (Some(score), Some(rank)) => !a.is_met(score, rank + 1),
            _ => true,
        })
        .collect()
}
