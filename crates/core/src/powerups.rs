//! Static power-up catalogue and the effect of active power-ups on increments.
//!
//! A power-up is activated for one entity on one board and lasts a fixed number
//! of minutes from the logged activation time. Expiry is always judged against
//! the timestamp of the write being applied, never the wall clock, so replay
//! gives the same scores.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Positive increments are multiplied.
    Multiplier(i64),
    /// Negative increments are absorbed.
    Shield,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerUp {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub effect: Effect,
    pub duration_minutes: i64,
    /// Shop price, informational.
    pub cost_points: u32,
    pub icon: &'static str,
    pub rarity: &'static str,
}

impl PowerUp {
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes)
    }
}

pub const CATALOGUE: &[PowerUp] = &[
    PowerUp {
        id: "double_points",
        name: "Double Points",
        description: "Double all score gains for 10 minutes",
        effect: Effect::Multiplier(2),
        duration_minutes: 10,
        cost_points: 500,
        icon: "⚡",
        rarity: "common",
    },
    PowerUp {
        id: "mega_boost",
        name: "Mega Boost",
        description: "Triple score gains for 5 minutes",
        effect: Effect::Multiplier(3),
        duration_minutes: 5,
        cost_points: 1_000,
        icon: "🚀",
        rarity: "rare",
    },
    PowerUp {
        id: "shield",
        name: "Rank Shield",
        description: "Score losses are blocked for 30 minutes",
        effect: Effect::Shield,
        duration_minutes: 30,
        cost_points: 750,
        icon: "🛡️",
        rarity: "uncommon",
    },
];

pub fn find(id: &str) -> Option<&'static PowerUp> {
    CATALOGUE.iter().find(|p| p.id == id)
}

/// A power-up running for an entity until `expires_at` (exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePowerUp {
    pub id: String,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ActivePowerUp {
    pub fn new(power_up: &PowerUp, at: DateTime<Utc>) -> Self {
        Self {
            id: power_up.id.to_string(),
            activated_at: at,
            expires_at: at + power_up.duration(),
        }
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.activated_at <= at && at < self.expires_at
    }

    pub fn power_up(&self) -> Option<&'static PowerUp> {
        find(&self.id)
    }
}

/// Delta after every power-up active at `at`. `None` on overflow.
///
/// Multipliers stack and only touch gains; a shield zeroes losses. The two never
/// interact, so the order of `active` does not matter.
pub fn boosted_delta(delta: i64, active: &[ActivePowerUp], at: DateTime<Utc>) -> Option<i64> {
    let mut boosted = delta;
    for effect in active
        .iter()
        .filter(|p| p.is_active(at))
        .filter_map(|p| p.power_up())
        .map(|p| p.effect)
    {
        match effect {
            Effect::Multiplier(factor) if boosted > 0 => boosted = boosted.checked_mul(factor)?,
            Effect::Shield if boosted < 0 => boosted = 0,
            _ => {}
        }
    }
    Some(boosted)
}
