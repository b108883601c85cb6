//! Request and response data transfer objects for the REST API.
//!
//! All types derive `Serialize` and/or `Deserialize` for JSON marshalling via Axum.
//! Responses carry both the 0-based `rank` and the 1-based `position`.

use chrono::{DateTime, Utc};
use leaderboard_core::achievements::Achievement;
use leaderboard_core::analytics::BoardAnalytics;
use leaderboard_core::history::BoardSnapshot;
use leaderboard_core::powerups::{ActivePowerUp, Effect, PowerUp};
use leaderboard_core::profile::{Activity, Streak};
use leaderboard_core::{Metadata, MetadataValue, PlayerProfile, RankedEntry, ScoreChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Convert JSON metadata (from API requests) to core MetadataValue.
///
/// Nulls, arrays, and nested objects are dropped.
pub fn json_to_metadata(map: HashMap<String, serde_json::Value>) -> Metadata {
    map.into_iter()
        .filter_map(|(k, v)| {
            let mv = match v {
                serde_json::Value::Bool(b) => MetadataValue::Boolean(b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        MetadataValue::Integer(i)
                    } else {
                        MetadataValue::Float(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::String(s) => MetadataValue::String(s),
                _ => return None,
            };
            Some((k, mv))
        })
        .collect()
}

/// Convert core MetadataValue to JSON (for API responses).
pub fn metadata_to_json(map: &Metadata) -> HashMap<String, serde_json::Value> {
    map.iter()
        .map(|(k, v)| {
            let jv = match v {
                MetadataValue::Boolean(b) => serde_json::Value::Bool(*b),
                MetadataValue::Integer(i) => serde_json::json!(*i),
                MetadataValue::Float(f) => serde_json::json!(*f),
                MetadataValue::String(s) => serde_json::Value::String(s.clone()),
            };
            (k.clone(), jv)
        })
        .collect()
}

// ── Requests ────────────────────────────────────────────────────────────

/// Request body for `POST /leaderboards/:name/players`.
#[derive(Debug, Deserialize)]
pub struct AddPlayerRequest {
    pub player_name: String,
    pub score: i64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request body for `POST /leaderboards/:name/players/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchPlayersRequest {
    pub players: BTreeMap<String, i64>,
}

/// Request body for `PUT .../players/:player/score`.
#[derive(Debug, Deserialize)]
pub struct ScoreIncrementRequest {
    pub score_increment: i64,
}

/// Request body for `PUT .../players/:player/score/absolute`.
///
/// `player_name` is accepted for compatibility; the path wins.
#[derive(Debug, Deserialize)]
pub struct SetScoreRequest {
    #[allow(dead_code)]
    pub player_name: Option<String>,
    pub score: i64,
}

/// Request body for `PUT .../players/:player/metadata`.
#[derive(Debug, Deserialize)]
pub struct SetMetadataRequest {
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request body for `POST /leaderboards/:name/trim`.
#[derive(Debug, Deserialize)]
pub struct TrimRequest {
    pub count: usize,
}

/// Request body for `POST /leaderboards/:name/snapshots`.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotRequest {
    pub description: Option<String>,
}

/// Request body for `POST .../players/:player/power-ups`.
#[derive(Debug, Deserialize)]
pub struct PowerUpRequest {
    pub power_up: String,
}

/// Query string for `GET /leaderboards/:name/top`.
#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub count: Option<usize>,
}

/// Query string for `GET /leaderboards/:name/page`.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub count: Option<usize>,
}

/// Query string for `GET /leaderboards/:name/range`.
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub min_score: i64,
    pub max_score: i64,
}

/// Query string for `GET .../players/:player/context`.
#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub radius: Option<usize>,
}

/// Query string for `GET .../players/:player/stats`.
#[derive(Debug, Deserialize)]
pub struct PlayerStatsQuery {
    pub activity_limit: Option<usize>,
}

/// Query string for `GET /leaderboards/:name/snapshots`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// ── Responses ───────────────────────────────────────────────────────────

/// Generic success message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// One row of a ranked listing.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub player_name: String,
    pub score: i64,
    pub rank: usize,
    pub position: usize,
}

impl From<RankedEntry> for EntryResponse {
    fn from(entry: RankedEntry) -> Self {
        Self {
            position: entry.position(),
            player_name: entry.entity,
            score: entry.score,
            rank: entry.rank,
        }
    }
}

/// An achievement as shown to clients.
#[derive(Debug, Serialize)]
pub struct AchievementResponse {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub points: u32,
}

impl From<&Achievement> for AchievementResponse {
    fn from(a: &Achievement) -> Self {
        Self {
            id: a.id,
            name: a.name,
            description: a.description,
            icon: a.icon,
            points: a.points,
        }
    }
}

/// Result of any score mutation: add, increment, or absolute set.
#[derive(Debug, Serialize)]
pub struct ScoreChangeResponse {
    pub message: String,
    pub leaderboard: String,
    pub player_name: String,
    pub previous_score: Option<i64>,
    pub new_score: i64,
    pub rank: usize,
    pub position: usize,
    /// Positive when the player climbed.
    pub rank_change: i64,
    pub achievements_unlocked: Vec<AchievementResponse>,
}

impl ScoreChangeResponse {
    pub fn new(message: String, leaderboard: &str, change: ScoreChange) -> Self {
        let achievements_unlocked = leaderboard_core::achievements::unlocked(&change)
            .into_iter()
            .map(AchievementResponse::from)
            .collect();
        Self {
            message,
            leaderboard: leaderboard.to_string(),
            previous_score: change.previous,
            new_score: change.score,
            rank: change.rank,
            position: change.rank + 1,
            rank_change: change.rank_delta(),
            player_name: change.entity,
            achievements_unlocked,
        }
    }
}

/// Response for `POST /leaderboards/:name/players/batch`.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub message: String,
    pub leaderboard: String,
    pub players_submitted: usize,
    pub players_added: usize,
}

/// Response for `GET /leaderboards/:name/players/:player`.
#[derive(Debug, Serialize)]
pub struct PlayerResponse {
    pub player_name: String,
    pub score: i64,
    pub rank: usize,
    pub position: usize,
    pub metadata: HashMap<String, serde_json::Value>,
    pub achievements: Vec<AchievementResponse>,
}

/// Response for `DELETE /leaderboards/:name/players/:player`.
#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub message: String,
    pub leaderboard: String,
}

/// Response for `GET` and `PUT` on `.../players/:player/metadata`.
#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub leaderboard_name: String,
    pub player_name: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Response for `GET /leaderboards/:name/top` and `/page`.
#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard_name: String,
    pub total_players: usize,
    pub offset: usize,
    pub entries: Vec<EntryResponse>,
}

/// One row of a context listing.
#[derive(Debug, Serialize)]
pub struct ContextEntry {
    #[serde(flatten)]
    pub entry: EntryResponse,
    pub is_target: bool,
}

/// Response for `GET .../players/:player/context`.
#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub leaderboard_name: String,
    pub target_player: String,
    pub context: Vec<ContextEntry>,
}

/// Response for `GET /leaderboards/:name/range`.
#[derive(Debug, Serialize)]
pub struct RangeResponse {
    pub leaderboard_name: String,
    pub score_range: String,
    pub players_found: usize,
    pub players: Vec<EntryResponse>,
}

/// Response for `GET /leaderboards/:name/stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub leaderboard_name: String,
    pub total_players: usize,
    pub highest_score: Option<i64>,
    pub lowest_score: Option<i64>,
    pub average_score: Option<f64>,
    pub total_score: i128,
    pub top_3: Vec<EntryResponse>,
}

/// Response for `GET /leaderboards/:name/analytics`.
#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub leaderboard_name: String,
    #[serde(flatten)]
    pub analytics: BoardAnalytics,
}

/// Response for `GET /leaderboards/:name/snapshots`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub leaderboard_name: String,
    pub snapshots: Vec<BoardSnapshot>,
}

/// Response for `POST /leaderboards/:name/trim`.
#[derive(Debug, Serialize)]
pub struct TrimResponse {
    pub leaderboard_name: String,
    pub players_removed: usize,
    pub removed: Vec<String>,
}

/// Response for `DELETE /leaderboards/:name`.
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub leaderboard_name: String,
    pub players_removed: usize,
}

/// A running power-up with the time it has left.
#[derive(Debug, Serialize)]
pub struct ActivePowerUpResponse {
    pub id: String,
    pub name: Option<&'static str>,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
}

impl ActivePowerUpResponse {
    pub fn new(active: &ActivePowerUp, now: DateTime<Utc>) -> Self {
        Self {
            id: active.id.clone(),
            name: active.power_up().map(|p| p.name),
            activated_at: active.activated_at,
            expires_at: active.expires_at,
            remaining_seconds: (active.expires_at - now).num_seconds().max(0),
        }
    }
}

/// Response for `POST .../players/:player/power-ups`.
#[derive(Debug, Serialize)]
pub struct PowerUpResponse {
    pub message: String,
    pub leaderboard: String,
    pub player_name: String,
    pub power_up: ActivePowerUpResponse,
}

/// Catalogue row returned by `GET /power-ups`.
#[derive(Debug, Serialize)]
pub struct PowerUpInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub effect: Effect,
    pub duration_minutes: i64,
    pub cost_points: u32,
    pub icon: &'static str,
    pub rarity: &'static str,
}

impl From<&PowerUp> for PowerUpInfo {
    fn from(p: &PowerUp) -> Self {
        Self {
            id: p.id,
            name: p.name,
            description: p.description,
            effect: p.effect,
            duration_minutes: p.duration_minutes,
            cost_points: p.cost_points,
            icon: p.icon,
            rarity: p.rarity,
        }
    }
}

/// Response for `GET .../players/:player/stats`.
#[derive(Debug, Serialize)]
pub struct PlayerStatsResponse {
    pub leaderboard_name: String,
    pub player_name: String,
    pub current_score: i64,
    pub rank: usize,
    pub position: usize,
    pub games_played: u64,
    pub total_score_earned: u64,
    pub highest_score: Option<i64>,
    pub lowest_score: Option<i64>,
    pub average_score: f64,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub level: u32,
    pub title: &'static str,
    pub experience: u64,
    pub next_level_at: Option<u64>,
    pub score_streak: Streak,
    pub daily_streak: Streak,
    pub active_power_ups: Vec<ActivePowerUpResponse>,
    pub recent_activity: Vec<Activity>,
}

impl PlayerStatsResponse {
    pub fn new(
        leaderboard: &str,
        entry: RankedEntry,
        profile: &PlayerProfile,
        activity_limit: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            leaderboard_name: leaderboard.to_string(),
            position: entry.position(),
            player_name: entry.entity,
            current_score: entry.score,
            rank: entry.rank,
            games_played: profile.games_played,
            total_score_earned: profile.total_score_earned,
            highest_score: profile.highest_score,
            lowest_score: profile.lowest_score,
            average_score: (profile.average_score() * 100.0).round() / 100.0,
            joined_at: profile.joined_at,
            last_active: profile.last_active,
            level: profile.level(),
            title: profile.title(),
            experience: profile.experience,
            next_level_at: profile.next_level_at(),
            score_streak: profile.score_streak,
            daily_streak: profile.daily_streak,
            active_power_ups: profile
                .active_power_ups(now)
                .iter()
                .map(|p| ActivePowerUpResponse::new(p, now))
                .collect(),
            recent_activity: profile.recent(activity_limit),
        }
    }
}

/// Board summary returned by `GET /leaderboards`.
#[derive(Debug, Serialize)]
pub struct BoardInfo {
    pub name: String,
    pub total_players: usize,
}

/// Response for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub boards_count: usize,
    pub total_entities: usize,
    pub memory_used_bytes: usize,
    pub memory_reserved_bytes: usize,
    pub memory_limit_bytes: usize,
    pub wal_size_bytes: u64,
    pub disk_available_bytes: u64,
    pub warnings: Vec<String>,
}
