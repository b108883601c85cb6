//! Command execution against a data directory.
//!
//! Each command returns the text to print, so the whole surface can be
//! exercised without a terminal.

use crate::cli::Commands;
use crate::{demo, display};
use chrono::Utc;
use leaderboard_core::config::{MAX_BATCH_SIZE, MAX_RECENT_ACTIVITY};
use leaderboard_core::powerups;
use leaderboard_core::{DurableEngine, Metadata, MetadataValue, RankError, ScoreChange};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Window used by `rank`: two entries either side of the player.
const RANK_CONTEXT_RADIUS: usize = 2;

/// Runs `command`, then checkpoints if the WAL outgrew `checkpoint_wal_bytes`
/// (0 never does). `demo` never touches `data_dir`.
pub fn execute(
    data_dir: &str,
    command: Commands,
    checkpoint_wal_bytes: u64,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> CliResult<String> {
    if let Commands::Demo = command {
        return demo::run();
    }
    let db = DurableEngine::open(data_dir)?;
    let output = run(&db, command, confirm)?;
    checkpoint_if_large(&db, checkpoint_wal_bytes);
    Ok(output)
}

/// Checkpoints once the WAL is larger than `threshold` bytes. A failure is
/// logged and leaves the WAL in place. Returns whether a checkpoint completed.
pub fn checkpoint_if_large(db: &DurableEngine, threshold: u64) -> bool {
    let wal_bytes = db.wal_size_bytes();
    if threshold == 0 || wal_bytes <= threshold {
        return false;
    }
    match db.checkpoint() {
        Ok(saved) => {
            tracing::info!(wal_bytes, boards = saved, "Automatic checkpoint complete");
            true
        }
        Err(e) => {
            tracing::warn!(wal_bytes, "Automatic checkpoint failed, WAL kept: {}", e);
            false
        }
    }
}

pub fn run(
    db: &DurableEngine,
    command: Commands,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> CliResult<String> {
    let engine = db.engine();
    let output = match command {
        Commands::Add {
            board,
            player,
            score,
        } => {
            let change = db.insert(&board, &player, score)?;
            stamp(db, &board, &change);
            display::score_change(&board, &change)
        }
        Commands::Update {
            board,
            player,
            increment,
        } => {
            let change = db.increment(&board, &player, increment)?;
            stamp(db, &board, &change);
            display::score_change(&board, &change)
        }
        Commands::Set {
            board,
            player,
            score,
        } => {
            let change = db.insert(&board, &player, score)?;
            stamp(db, &board, &change);
            display::score_change(&board, &change)
        }
        Commands::Top { board, count } => display::top(&board, &engine.top(&board, count)),
        Commands::Rank { board, player } => {
            let entry = engine.rank(&board, &player)?;
            let metadata = engine.metadata(&board, &player)?;
            let around = engine.neighbors(&board, &player, RANK_CONTEXT_RADIUS)?;
            let mut out = display::player(&board, &entry, &metadata);
            out.push('\n');
            out.push_str(&display::context(&board, &player, &around));
            out
        }
        Commands::Around {
            board,
            player,
            radius,
        } => {
            let around = engine.neighbors(&board, &player, radius)?;
            display::context(&board, &player, &around)
        }
        Commands::Profile {
            board,
            player,
            activity,
        } => {
            let entry = engine.rank(&board, &player)?;
            let profile = db.profile(&board, &player)?;
            display::profile(
                &board,
                &entry,
                &profile,
                activity.min(MAX_RECENT_ACTIVITY),
                Utc::now(),
            )
        }
        Commands::Boost {
            board,
            player,
            power_up,
        } => {
            let active = db.activate_power_up(&board, &player, &power_up)?;
            display::power_up_activated(&board, &player, &active)
        }
        Commands::PowerUps => display::power_ups(powerups::CATALOGUE),
        Commands::Remove { board, player } => {
            if db.remove(&board, &player)? {
                format!("🗑️  Removed {} from {}\n", player, board)
            } else {
                return Err(RankError::NotFound {
                    board,
                    entity: player,
                }
                .into());
            }
        }
        Commands::Clear { board, yes } => {
            let prompt = format!(
                "Remove all {} players from '{}'? [y/N] ",
                engine.len(&board),
                board
            );
            if !yes && !confirm(&prompt) {
                return Ok("Cancelled\n".to_string());
            }
            let removed = db.clear(&board)?;
            format!("🧹 Cleared {} players from '{}'\n", removed, board)
        }
        Commands::Delete { board } => {
            if db.delete_board(&board)? {
                format!("🗑️  Deleted leaderboard '{}'\n", board)
            } else {
                return Err(RankError::BoardNotFound(board).into());
            }
        }
        Commands::Stats { board } => display::stats(&board, &engine.stats(&board)),
        Commands::Analytics { board } => display::analytics(&board, &engine.analytics(&board)),
        Commands::Range { board, min, max } => {
            if min > max {
                return Err(RankError::InvalidArgument(format!(
                    "min ({}) must not exceed max ({})",
                    min, max
                ))
                .into());
            }
            display::range(&board, min, max, &engine.range_by_score(&board, min, max))
        }
        Commands::Load { board, file } => {
            let players = read_players(&file)?;
            let mut loaded = 0;
            for chunk in players.chunks(MAX_BATCH_SIZE) {
                loaded += db.batch_insert(&board, chunk)?;
            }
            tracing::info!(board = %board, players = loaded, file = %file.display(), "Loaded players");
            format!(
                "📥 Loaded {} players into '{}' ({} now on the board)\n",
                loaded,
                board,
                engine.len(&board)
            )
        }
        Commands::Snapshot { board, description } => {
            let snapshot = db.record_snapshot(&board, &description)?;
            format!(
                "📸 Snapshot of '{}' recorded at {} ({} players)\n",
                board,
                snapshot.taken_at.to_rfc3339(),
                snapshot.total_entities
            )
        }
        Commands::History { board, limit } => {
            display::history(&board, &engine.history(&board, limit))
        }
        Commands::Checkpoint => {
            let saved = db.checkpoint()?;
            format!("💾 Saved {} leaderboards, write-ahead log truncated\n", saved)
        }
        Commands::Boards => {
            let listing: Vec<(String, usize)> = engine
                .list_boards()
                .into_iter()
                .map(|name| {
                    let size = engine.len(&name);
                    (name, size)
                })
                .collect();
            display::boards(&listing)
        }
        Commands::Demo => demo::run()?,
    };
    Ok(output)
}

/// Records when and at what score the player was last written.
/// Skipped when the metadata bag has no room left.
fn stamp(db: &DurableEngine, board: &str, change: &ScoreChange) {
    let mut attributes = Metadata::new();
    attributes.insert(
        "last_updated".to_string(),
        MetadataValue::String(Utc::now().to_rfc3339()),
    );
    attributes.insert(
        "current_score".to_string(),
        MetadataValue::Integer(change.score),
    );
    if let Err(e) = db.set_metadata(board, &change.entity, attributes) {
        tracing::debug!(entity = %change.entity, "Score stamp skipped: {}", e);
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlayerFile {
    Map(BTreeMap<String, i64>),
    List(Vec<PlayerRecord>),
}

#[derive(Deserialize)]
struct PlayerRecord {
    name: String,
    score: i64,
}

/// Parses `{"name": score}` or `[{"name": .., "score": ..}]`. In a list a
/// repeated name keeps its last score.
pub fn parse_players(json: &str) -> CliResult<Vec<(String, i64)>> {
    let parsed: PlayerFile = serde_json::from_str(json).map_err(|e| {
        RankError::InvalidArgument(format!(
            "expected an object of name -> score or a list of {{name, score}}: {}",
            e
        ))
    })?;
    Ok(match parsed {
        PlayerFile::Map(map) => map.into_iter().collect(),
        PlayerFile::List(records) => records.into_iter().map(|r| (r.name, r.score)).collect(),
    })
}

fn read_players(path: &Path) -> CliResult<Vec<(String, i64)>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse_players(&json)
}
