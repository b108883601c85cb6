//! Per-player activity statistics and progression.
//!
//! Every score write folds one [`Activity`] into the writer's [`PlayerProfile`]:
//! lifetime counters, experience, two streaks, and the most recent
//! [`MAX_RECENT_ACTIVITY`] records. Activity timestamps come from the logged
//! write, so a replayed board rebuilds the same profiles.

use crate::config::MAX_RECENT_ACTIVITY;
use crate::powerups::{self, ActivePowerUp, PowerUp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Experience needed for levels 2 through 10.
pub const LEVEL_THRESHOLDS: [u64; 9] = [100, 250, 500, 1_000, 2_000, 4_000, 8_000, 15_000, 30_000];

pub const MAX_LEVEL: u32 = 10;

const TITLES: [&str; MAX_LEVEL as usize] = [
    "Newcomer",
    "Beginner",
    "Player",
    "Competitor",
    "Skilled",
    "Expert",
    "Master",
    "Champion",
    "Legend",
    "Grandmaster",
];

/// Streak bonus per step, in percent of base experience.
const STREAK_STEP_PERCENT: u64 = 10;
/// Cap on the streak bonus multiplier, in percent.
const STREAK_MAX_PERCENT: u64 = 300;

pub fn level_for(experience: u64) -> u32 {
    let met = LEVEL_THRESHOLDS.iter().take_while(|&&t| experience >= t).count() as u32;
    (1 + met).min(MAX_LEVEL)
}

pub fn title_for(level: u32) -> &'static str {
    let i = level.clamp(1, MAX_LEVEL) as usize - 1;
    TITLES[i]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Set,
    Increment,
    Batch,
}

/// One score write as seen by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    /// Signed change, counted from 0 when the write created the entity.
    pub score_change: i64,
    /// Score after the write.
    pub score: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub current: u32,
    pub best: u32,
}

impl Streak {
    fn extend(&mut self) {
        self.current = self.current.saturating_add(1);
        self.best = self.best.max(self.current);
    }

    fn restart(&mut self, current: u32) {
        self.current = current;
        self.best = self.best.max(current);
    }

    /// Experience multiplier in percent: +10% per step, capped at 300%.
    pub fn bonus_percent(&self) -> u64 {
        (100 + u64::from(self.current) * STREAK_STEP_PERCENT).min(STREAK_MAX_PERCENT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub games_played: u64,
    /// Sum of absolute score changes.
    pub total_score_earned: u64,
    pub highest_score: Option<i64>,
    pub lowest_score: Option<i64>,
    pub experience: u64,
    /// Consecutive gains; a loss resets it.
    pub score_streak: Streak,
    /// Consecutive UTC days with at least one write.
    pub daily_streak: Streak,
    pub power_ups: Vec<ActivePowerUp>,
    recent: VecDeque<Activity>,
}

impl PlayerProfile {
    pub fn new(joined_at: DateTime<Utc>) -> Self {
        Self {
            joined_at,
            last_active: joined_at,
            games_played: 0,
            total_score_earned: 0,
            highest_score: None,
            lowest_score: None,
            experience: 0,
            score_streak: Streak::default(),
            daily_streak: Streak::default(),
            power_ups: Vec::new(),
            recent: VecDeque::new(),
        }
    }

    /// Folds one write in and returns the experience it earned.
    ///
    /// Only gains earn experience, scaled by the gain streak as it stood before
    /// this write.
    pub fn record(&mut self, activity: Activity) -> u64 {
        let bonus = self.score_streak.bonus_percent();
        match activity.score_change {
            c if c > 0 => self.score_streak.extend(),
            c if c < 0 => self.score_streak.restart(0),
            _ => {}
        }

        if self.games_played == 0 {
            self.daily_streak.restart(1);
        } else {
            let days = (activity.at.date_naive() - self.last_active.date_naive()).num_days();
            match days {
                0 => {}
                1 => self.daily_streak.extend(),
                _ => self.daily_streak.restart(1),
            }
        }

        let gain = u64::try_from(activity.score_change).unwrap_or(0);
        let earned = u64::try_from(u128::from(gain) * u128::from(bonus) / 100).unwrap_or(u64::MAX);
        self.experience = self.experience.saturating_add(earned);

        self.games_played += 1;
        self.total_score_earned = self
            .total_score_earned
            .saturating_add(activity.score_change.unsigned_abs());
        self.highest_score = Some(self.highest_score.map_or(activity.score, |h| h.max(activity.score)));
        self.lowest_score = Some(self.lowest_score.map_or(activity.score, |l| l.min(activity.score)));
        self.last_active = self.last_active.max(activity.at);

        self.recent.push_front(activity);
        self.recent.truncate(MAX_RECENT_ACTIVITY);
        earned
    }

    /// `total_score_earned / games_played`, 0 with no games.
    pub fn average_score(&self) -> f64 {
        if self.games_played == 0 {
            return 0.0;
        }
        self.total_score_earned as f64 / self.games_played as f64
    }

    pub fn level(&self) -> u32 {
        level_for(self.experience)
    }

    pub fn title(&self) -> &'static str {
        title_for(self.level())
    }

    /// Experience needed for the next level, `None` at the top.
    pub fn next_level_at(&self) -> Option<u64> {
        LEVEL_THRESHOLDS.get(self.level() as usize - 1).copied()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<Activity> {
        self.recent.iter().take(limit).cloned().collect()
    }

    pub fn active_power_ups(&self, at: DateTime<Utc>) -> Vec<ActivePowerUp> {
        self.power_ups
            .iter()
            .filter(|p| p.is_active(at))
            .cloned()
            .collect()
    }

    /// Starts `power_up` at `at`. Restarting a running one moves its expiry.
    pub fn activate(&mut self, power_up: &PowerUp, at: DateTime<Utc>) -> ActivePowerUp {
        self.power_ups.retain(|p| p.expires_at > at && p.id != power_up.id);
        let started = ActivePowerUp::new(power_up, at);
        self.power_ups.push(started.clone());
        started
    }

    /// `delta` after power-ups active at `at`. `None` on overflow.
    pub fn boost(&self, delta: i64, at: DateTime<Utc>) -> Option<i64> {
        powerups::boosted_delta(delta, &self.power_ups, at)
    }

    pub(crate) fn recent_len(&self) -> usize {
        self.recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::days(d)
    }

    fn activity(at: DateTime<Utc>, score_change: i64, score: i64) -> Activity {
        Activity {
            at,
            kind: ActivityKind::Increment,
            score_change,
            score,
        }
    }

    // ── Levels ──

    #[test]
    fn test_levels_and_titles() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(99), 1);
        assert_eq!(level_for(100), 2);
        assert_eq!(level_for(999), 4);
        assert_eq!(level_for(30_000), 10);
        assert_eq!(level_for(u64::MAX), MAX_LEVEL);
        assert_eq!(title_for(1), "Newcomer");
        assert_eq!(title_for(7), "Master");
        assert_eq!(title_for(10), "Grandmaster");
    }

    #[test]
    fn test_next_level_at() {
        let mut p = PlayerProfile::new(day(0));
        assert_eq!(p.next_level_at(), Some(100));
        p.experience = 30_000;
        assert_eq!(p.next_level_at(), None);
    }

    // ── Statistics ──

    #[test]
    fn test_record_tracks_lifetime_stats() {
        let mut p = PlayerProfile::new(day(0));
        p.record(activity(day(0), 100, 100));
        p.record(activity(day(0), -40, 60));
        p.record(activity(day(0), 20, 80));
        assert_eq!(p.games_played, 3);
        assert_eq!(p.total_score_earned, 160);
        assert_eq!(p.highest_score, Some(100));
        assert_eq!(p.lowest_score, Some(60));
        assert!((p.average_score() - 160.0 / 3.0).abs() < 1e-9);
        assert_eq!(p.recent(1)[0].score, 80);
    }

    #[test]
    fn test_recent_activity_is_bounded() {
        let mut p = PlayerProfile::new(day(0));
        for i in 0..(MAX_RECENT_ACTIVITY as i64 + 20) {
            p.record(activity(day(0), 1, i));
        }
        assert_eq!(p.recent_len(), MAX_RECENT_ACTIVITY);
        assert_eq!(p.recent(usize::MAX).len(), MAX_RECENT_ACTIVITY);
        assert_eq!(p.recent(1)[0].score, MAX_RECENT_ACTIVITY as i64 + 19);
    }

    #[test]
    fn test_empty_profile_average_is_zero() {
        assert_eq!(PlayerProfile::new(day(0)).average_score(), 0.0);
    }

    // ── Experience and streaks ──

    #[test]
    fn test_gain_streak_scales_experience() {
        let mut p = PlayerProfile::new(day(0));
        assert_eq!(p.record(activity(day(0), 100, 100)), 100);
        assert_eq!(p.record(activity(day(0), 100, 200)), 110);
        assert_eq!(p.record(activity(day(0), 100, 300)), 120);
        assert_eq!(p.score_streak.current, 3);
        // A loss earns nothing and resets the streak
        assert_eq!(p.record(activity(day(0), -10, 290)), 0);
        assert_eq!(p.score_streak, Streak { current: 0, best: 3 });
        assert_eq!(p.record(activity(day(0), 100, 390)), 100);
        assert_eq!(p.experience, 430);
        assert_eq!(p.level(), 3);
        assert_eq!(p.title(), "Player");
    }

    #[test]
    fn test_streak_bonus_caps() {
        let s = Streak {
            current: 50,
            best: 50,
        };
        assert_eq!(s.bonus_percent(), 300);
    }

    #[test]
    fn test_daily_streak() {
        let mut p = PlayerProfile::new(day(0));
        p.record(activity(day(0), 1, 1));
        p.record(activity(day(0), 1, 2));
        assert_eq!(p.daily_streak.current, 1);
        p.record(activity(day(1), 1, 3));
        p.record(activity(day(2), 1, 4));
        assert_eq!(p.daily_streak.current, 3);
        p.record(activity(day(5), 1, 5));
        assert_eq!(p.daily_streak, Streak { current: 1, best: 3 });
    }

    // ── Power-ups ──

    #[test]
    fn test_activate_restarts_and_prunes() {
        let mut p = PlayerProfile::new(day(0));
        let double = powerups::find("double_points").unwrap();
        let shield = powerups::find("shield").unwrap();
        p.activate(double, day(0));
        p.activate(shield, day(0));
        let again = p.activate(double, day(0) + Duration::minutes(5));
        assert_eq!(again.expires_at, day(0) + Duration::minutes(15));
        assert_eq!(p.power_ups.len(), 2);
        // Both have expired by the next day
        p.activate(double, day(1));
        assert_eq!(p.power_ups.len(), 1);
        assert_eq!(p.active_power_ups(day(1)).len(), 1);
        assert_eq!(p.boost(7, day(1)), Some(14));
    }
}
