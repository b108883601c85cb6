//! Board statistics and score analytics.
//!
//! [`stats`] gives the headline numbers (count, highest, lowest, average, podium).
//! [`analytics`] adds percentiles by linear interpolation, an equal-width score
//! distribution, and growth between the oldest and newest recent snapshots.

use crate::config::DISTRIBUTION_BUCKETS;
use crate::entity::RankedEntry;
use crate::history::History;
use crate::index::RankIndex;
use serde::{Deserialize, Serialize};

/// Number of recent snapshots considered for growth figures.
const GROWTH_WINDOW: usize = 10;

/// Headline figures for a board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardStats {
    pub total_entities: usize,
    pub highest: Option<i64>,
    pub lowest: Option<i64>,
    pub average: Option<f64>,
    pub total_score: i128,
    pub top_3: Vec<RankedEntry>,
}

/// One equal-width score bucket. `upper` is exclusive except for the last bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Percentage change between the oldest and newest of the recent snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Growth {
    pub entity_growth_pct: f64,
    pub average_score_growth_pct: f64,
    /// Number of snapshots the figures span.
    pub snapshots: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardAnalytics {
    pub stats: BoardStats,
    pub median: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
    pub distribution: Vec<ScoreBucket>,
    pub growth: Option<Growth>,
}

/// Computes headline figures in one pass over the index.
pub fn stats(index: &RankIndex) -> BoardStats {
    let total_entities = index.len();
    if total_entities == 0 {
        return BoardStats::default();
    }
    let total_score: i128 = index.iter().map(|(_, _, s)| s as i128).sum();
    let top_3 = index
        .iter()
        .take(3)
        .map(|(rank, entity, score)| RankedEntry {
            entity: entity.to_string(),
            score,
            rank,
        })
        .collect();

    BoardStats {
        total_entities,
        highest: index.select(0).map(|(s, _)| s),
        lowest: index.select(total_entities - 1).map(|(s, _)| s),
        average: Some(total_score as f64 / total_entities as f64),
        total_score,
        top_3,
    }
}

/// Percentile `p` (0..=100) of ascending scores by linear interpolation.
pub fn percentile(ascending: &[i64], p: f64) -> Option<f64> {
    if ascending.is_empty() {
        return None;
    }
    let k = (ascending.len() - 1) as f64 * p.clamp(0.0, 100.0) / 100.0;
    let floor = k.floor() as usize;
    let ceil = floor + 1;
    if ceil >= ascending.len() {
        return Some(ascending[floor] as f64);
    }
    let (lo, hi) = (ascending[floor] as f64, ascending[ceil] as f64);
    Some(lo + (k - floor as f64) * (hi - lo))
}

/// Buckets ascending scores into [`DISTRIBUTION_BUCKETS`] equal-width ranges
/// spanning lowest to highest. The highest score lands in the last bucket.
pub fn distribution(ascending: &[i64]) -> Vec<ScoreBucket> {
    let (Some(&min), Some(&max)) = (ascending.first(), ascending.last()) else {
        return Vec::new();
    };
    let span = (max as i128 - min as i128) as f64;
    let width = span / DISTRIBUTION_BUCKETS as f64;

    let mut buckets: Vec<ScoreBucket> = (0..DISTRIBUTION_BUCKETS)
        .map(|i| ScoreBucket {
            lower: min as f64 + i as f64 * width,
            upper: min as f64 + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    for &score in ascending {
        let slot = if width == 0.0 {
            DISTRIBUTION_BUCKETS - 1
        } else {
            let offset = (score as i128 - min as i128) as f64;
            ((offset / width) as usize).min(DISTRIBUTION_BUCKETS - 1)
        };
        buckets[slot].count += 1;
    }
    buckets
}

/// Growth between the oldest and newest of the last few snapshots.
/// `None` with fewer than two snapshots.
pub fn growth(history: &History) -> Option<Growth> {
    let recent = history.recent(GROWTH_WINDOW);
    if recent.len() < 2 {
        return None;
    }
    let newest = &recent[0];
    let oldest = &recent[recent.len() - 1];

    let pct = |old: f64, new: f64| {
        if old == 0.0 {
            0.0
        } else {
            (new - old) / old * 100.0
        }
    };

    Some(Growth {
        entity_growth_pct: pct(oldest.total_entities as f64, newest.total_entities as f64),
        average_score_growth_pct: pct(oldest.average_score, newest.average_score),
        snapshots: recent.len(),
    })
}

/// Full analytics report. O(n) over the board.
pub fn analytics(index: &RankIndex, history: &History) -> BoardAnalytics {
    let stats = stats(index);
    let mut ascending: Vec<i64> = index.iter().map(|(_, _, s)| s).collect();
    ascending.reverse();

    BoardAnalytics {
        stats,
        median: percentile(&ascending, 50.0),
        p25: percentile(&ascending, 25.0),
        p75: percentile(&ascending, 75.0),
        p90: percentile(&ascending, 90.0),
        p99: percentile(&ascending, 99.0),
        distribution: distribution(&ascending),
        growth: growth(history),
    }
}
