//! Terminal formatting for board listings and reports.

use leaderboard_core::achievements::{self, Achievement};
use leaderboard_core::analytics::{BoardAnalytics, BoardStats};
use chrono::{DateTime, Utc};
use leaderboard_core::history::BoardSnapshot;
use leaderboard_core::powerups::{ActivePowerUp, PowerUp};
use leaderboard_core::profile::{Activity, ActivityKind};
use leaderboard_core::{Metadata, MetadataValue, PlayerProfile, RankedEntry, ScoreChange};
use std::fmt::Write;

const WIDE_RULE: usize = 50;
const NARROW_RULE: usize = 40;

fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// Medal for the podium, blank padding otherwise.
pub fn medal(position: usize) -> &'static str {
    match position {
        1 => "🥇",
        2 => "🥈",
        3 => "🥉",
        _ => "  ",
    }
}

/// One ranked row: `🥇 # 1. alice                    1800 pts`.
pub fn entry_row(entry: &RankedEntry) -> String {
    let position = entry.position();
    format!(
        "{} #{:2}. {:<20} {:>8} pts",
        medal(position),
        position,
        entry.entity,
        entry.score
    )
}

fn empty_board(board: &str) -> String {
    format!("📭 No players in '{}'\n", board)
}

pub fn top(board: &str, entries: &[RankedEntry]) -> String {
    if entries.is_empty() {
        return empty_board(board);
    }
    let mut out = format!("🏆 Top {} players in '{}':\n", entries.len(), board);
    let _ = writeln!(out, "{}", rule(WIDE_RULE));
    for entry in entries {
        let _ = writeln!(out, "{}", entry_row(entry));
    }
    out
}

/// Entries around `target`, with the target row marked.
pub fn context(board: &str, target: &str, entries: &[RankedEntry]) -> String {
    let mut out = format!("👥 Players around {} in '{}':\n", target, board);
    let _ = writeln!(out, "{}", rule(WIDE_RULE));
    for entry in entries {
        let marker = if entry.entity == target { " ← YOU" } else { "" };
        let _ = writeln!(out, "{}{}", entry_row(entry), marker);
    }
    out
}

pub fn player(board: &str, entry: &RankedEntry, metadata: &Metadata) -> String {
    let mut out = format!("📊 {} in '{}'\n", entry.entity, board);
    let _ = writeln!(out, "   Rank:  #{}", entry.position());
    let _ = writeln!(out, "   Score: {}", entry.score);

    let earned = achievements::earned(entry.score, entry.position());
    if !earned.is_empty() {
        let badges: Vec<String> = earned.iter().map(|a| badge(a)).collect();
        let _ = writeln!(out, "   Achievements: {}", badges.join(", "));
    }

    if !metadata.is_empty() {
        let mut keys: Vec<&String> = metadata.keys().collect();
        keys.sort();
        let _ = writeln!(out, "   Metadata:");
        for key in keys {
            let _ = writeln!(out, "     {}: {}", key, metadata_value(&metadata[key]));
        }
    }
    out
}

fn badge(achievement: &Achievement) -> String {
    format!("{} {}", achievement.icon, achievement.name)
}

fn metadata_value(value: &MetadataValue) -> String {
    match value {
        MetadataValue::Boolean(b) => b.to_string(),
        MetadataValue::Integer(i) => i.to_string(),
        MetadataValue::Float(f) => f.to_string(),
        MetadataValue::String(s) => s.clone(),
    }
}

/// Outcome of an add, update, or set.
pub fn score_change(board: &str, change: &ScoreChange) -> String {
    let mut out = match change.previous {
        None => format!(
            "✅ Added {} to {} with score {}\n",
            change.entity, board, change.score
        ),
        Some(previous) => format!(
            "✅ {} in {}: {} → {} (rank #{})\n",
            change.entity,
            board,
            previous,
            change.score,
            change.rank + 1
        ),
    };
    match change.rank_delta() {
        0 => {}
        d if d > 0 => {
            let _ = writeln!(out, "   ⬆️  Up {} place(s)", d);
        }
        d => {
            let _ = writeln!(out, "   ⬇️  Down {} place(s)", -d);
        }
    }
    for achievement in achievements::unlocked(change) {
        let _ = writeln!(
            out,
            "   🎉 Achievement unlocked: {} (+{} pts)",
            badge(achievement),
            achievement.points
        );
    }
    out
}

pub fn stats(board: &str, stats: &BoardStats) -> String {
    if stats.total_entities == 0 {
        return empty_board(board);
    }
    let mut out = format!("📈 Statistics for '{}':\n", board);
    let _ = writeln!(out, "{}", rule(NARROW_RULE));
    let _ = writeln!(out, "Total players: {}", stats.total_entities);
    if let Some(highest) = stats.highest {
        let _ = writeln!(out, "Highest score: {}", highest);
    }
    if let Some(lowest) = stats.lowest {
        let _ = writeln!(out, "Lowest score:  {}", lowest);
    }
    if let Some(average) = stats.average {
        let _ = writeln!(out, "Average score: {:.2}", average);
    }
    let _ = writeln!(out, "Total score:   {}", stats.total_score);
    if !stats.top_3.is_empty() {
        let _ = writeln!(out, "\nPodium:");
        for entry in &stats.top_3 {
            let _ = writeln!(out, "{}", entry_row(entry));
        }
    }
    out
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

pub fn analytics(board: &str, report: &BoardAnalytics) -> String {
    if report.stats.total_entities == 0 {
        return empty_board(board);
    }
    let mut out = stats(board, &report.stats);
    let _ = writeln!(out, "\nPercentiles:");
    let _ = writeln!(out, "  p25:    {}", optional(report.p25));
    let _ = writeln!(out, "  median: {}", optional(report.median));
    let _ = writeln!(out, "  p75:    {}", optional(report.p75));
    let _ = writeln!(out, "  p90:    {}", optional(report.p90));
    let _ = writeln!(out, "  p99:    {}", optional(report.p99));

    let _ = writeln!(out, "\nDistribution:");
    for bucket in &report.distribution {
        let _ = writeln!(
            out,
            "  {:>12.1} .. {:<12.1} {}",
            bucket.lower, bucket.upper, bucket.count
        );
    }

    match &report.growth {
        Some(growth) => {
            let _ = writeln!(out, "\nGrowth over {} snapshots:", growth.snapshots);
            let _ = writeln!(out, "  players:       {:+.2}%", growth.entity_growth_pct);
            let _ = writeln!(
                out,
                "  average score: {:+.2}%",
                growth.average_score_growth_pct
            );
        }
        None => {
            let _ = writeln!(out, "\nGrowth: needs at least two snapshots");
        }
    }
    out
}

pub fn range(board: &str, min: i64, max: i64, entries: &[RankedEntry]) -> String {
    let mut out = format!(
        "🔎 {} player(s) in '{}' scoring {}..={}\n",
        entries.len(),
        board,
        min,
        max
    );
    for entry in entries {
        let _ = writeln!(out, "{}", entry_row(entry));
    }
    out
}

pub fn history(board: &str, snapshots: &[BoardSnapshot]) -> String {
    if snapshots.is_empty() {
        return format!("🕰️  No snapshots recorded for '{}'\n", board);
    }
    let mut out = format!("🕰️  History for '{}' (newest first):\n", board);
    let _ = writeln!(out, "{}", rule(WIDE_RULE));
    for snapshot in snapshots {
        let leader = snapshot
            .top
            .first()
            .map(|(entity, score)| format!("{} ({})", entity, score))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{}  {:<20} players={} avg={:.2} leader={}",
            snapshot.taken_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.description,
            snapshot.total_entities,
            snapshot.average_score,
            leader
        );
    }
    out
}

/// Lifetime statistics, progression, running power-ups, and the newest
/// `activity_limit` score writes of one player.
pub fn profile(
    board: &str,
    entry: &RankedEntry,
    profile: &PlayerProfile,
    activity_limit: usize,
    now: DateTime<Utc>,
) -> String {
    let mut out = format!("🎮 {} in '{}'\n", entry.entity, board);
    let _ = writeln!(out, "{}", rule(NARROW_RULE));
    let _ = writeln!(out, "Rank:          #{} ({} pts)", entry.position(), entry.score);
    let _ = writeln!(
        out,
        "Level:         {} {} ({} xp{})",
        profile.level(),
        profile.title(),
        profile.experience,
        profile
            .next_level_at()
            .map(|next| format!(", next at {}", next))
            .unwrap_or_default()
    );
    let _ = writeln!(out, "Games played:  {}", profile.games_played);
    let _ = writeln!(out, "Score earned:  {}", profile.total_score_earned);
    let _ = writeln!(out, "Average:       {:.2}", profile.average_score());
    if let (Some(high), Some(low)) = (profile.highest_score, profile.lowest_score) {
        let _ = writeln!(out, "Best / worst:  {} / {}", high, low);
    }
    let _ = writeln!(
        out,
        "Gain streak:   {} (best {})",
        profile.score_streak.current, profile.score_streak.best
    );
    let _ = writeln!(
        out,
        "Daily streak:  {} (best {})",
        profile.daily_streak.current, profile.daily_streak.best
    );
    let _ = writeln!(out, "Joined:        {}", timestamp(profile.joined_at));
    let _ = writeln!(out, "Last active:   {}", timestamp(profile.last_active));

    let running = profile.active_power_ups(now);
    if !running.is_empty() {
        let _ = writeln!(out, "\nPower-ups:");
        for active in &running {
            let _ = writeln!(out, "  {}", running_power_up(active, now));
        }
    }

    let recent = profile.recent(activity_limit);
    if !recent.is_empty() {
        let _ = writeln!(out, "\nRecent activity:");
        for activity in &recent {
            let _ = writeln!(out, "  {}", activity_row(activity));
        }
    }
    out
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn activity_row(activity: &Activity) -> String {
    let kind = match activity.kind {
        ActivityKind::Set => "set",
        ActivityKind::Increment => "update",
        ActivityKind::Batch => "load",
    };
    format!(
        "{}  {:<7} {:>+8} → {}",
        timestamp(activity.at),
        kind,
        activity.score_change,
        activity.score
    )
}

fn running_power_up(active: &ActivePowerUp, now: DateTime<Utc>) -> String {
    let minutes = (active.expires_at - now).num_minutes().max(0);
    match active.power_up() {
        Some(p) => format!("{} {} ({} min left)", p.icon, p.name, minutes),
        None => format!("{} ({} min left)", active.id, minutes),
    }
}

pub fn power_up_activated(board: &str, entity: &str, active: &ActivePowerUp) -> String {
    let name = active.power_up().map_or(active.id.as_str(), |p| p.name);
    format!(
        "⚡ {} active for {} in '{}' until {}\n",
        name,
        entity,
        board,
        timestamp(active.expires_at)
    )
}

pub fn power_ups(catalogue: &[PowerUp]) -> String {
    let mut out = "🛒 Power-ups:\n".to_string();
    let _ = writeln!(out, "{}", rule(WIDE_RULE));
    for p in catalogue {
        let _ = writeln!(
            out,
            "{} {:<14} {:<14} {:>3} min  {:>5} pts  {}",
            p.icon, p.id, p.rarity, p.duration_minutes, p.cost_points, p.description
        );
    }
    out
}

pub fn boards(listing: &[(String, usize)]) -> String {
    if listing.is_empty() {
        return "📭 No leaderboards\n".to_string();
    }
    let mut out = String::new();
    for (name, size) in listing {
        let _ = writeln!(out, "{:<30} {:>8} players", name, size);
    }
    out
}
