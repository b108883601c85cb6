//! HTTP request handlers and shared application state.
//!
//! Every mutation follows the same path: validate, take a write ticket for the
//! board, re-check state-dependent preconditions, log to the WAL (group commit),
//! then apply to the engine. A request rejected before the append leaves no trace.

use crate::api::errors::ApiError;
use crate::api::metrics;
use crate::api::models::*;
use crate::sequencer::WriteCoordinator;
use crate::wal_async::WriteAheadLog;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use leaderboard_core::config;
use leaderboard_core::history::BoardSnapshot;
use leaderboard_core::storage::wal::WalEntry;
use leaderboard_core::storage::{
    prune_snapshots, save_board, validate_board_name, validate_entity_id, validate_metadata, Board,
};
use leaderboard_core::{powerups, Engine, Metadata, MetadataValue, RankError, ScoreChange};
use metrics_exporter_prometheus::PrometheusHandle;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub data_dir: String,
    pub wal: Arc<WriteAheadLog>,
    pub writes: Arc<WriteCoordinator>,
    pub api_key: Option<String>,
    pub prometheus_handle: PrometheusHandle,
    /// 0 disables the limit.
    pub max_memory_bytes: usize,
    pub start_time: Instant,
    /// Tracks in-flight memory reservations from concurrent write requests.
    pub memory_reserved: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        engine: Engine,
        data_dir: String,
        wal: Arc<WriteAheadLog>,
        api_key: Option<String>,
        prometheus_handle: PrometheusHandle,
        max_memory_bytes: usize,
    ) -> Self {
        Self {
            engine,
            data_dir,
            wal,
            writes: Arc::new(WriteCoordinator::new()),
            api_key,
            prometheus_handle,
            max_memory_bytes,
            start_time: Instant::now(),
            memory_reserved: Arc::new(AtomicUsize::new(0)),
        }
    }
}

// ── Write path helpers ──────────────────────────────────────────────────

/// Appends entries to the WAL. Fails with 503 without applying anything.
async fn log_entries(state: &AppState, entries: &[WalEntry]) -> Result<(), ApiError> {
    state
        .wal
        .append_all(entries)
        .await
        .map(|_| ())
        .map_err(|e| {
            tracing::error!("WAL append failed: {}", e);
            ApiError::ServiceUnavailable("Write failed".into())
        })
}

/// Builds the `SetMetadata` entry that stamps `last_updated` and `current_score`
/// alongside `extra`, after checking the merged bag still fits the limits.
fn stamp_entry(
    state: &AppState,
    board: &str,
    entity: &str,
    score: i64,
    at: DateTime<Utc>,
    mut extra: Metadata,
) -> Result<WalEntry, RankError> {
    extra.insert(
        "last_updated".to_string(),
        MetadataValue::String(at.to_rfc3339()),
    );
    extra.insert("current_score".to_string(), MetadataValue::Integer(score));
    let mut merged = state.engine.metadata(board, entity).unwrap_or_default();
    merged.extend(extra.clone());
    validate_metadata(&merged)?;
    Ok(WalEntry::SetMetadata {
        board: board.to_string(),
        entity: entity.to_string(),
        metadata: extra,
    })
}

/// Logs and applies a score write plus its metadata stamp.
///
/// The caller holds the board's write ticket.
async fn commit_score(
    state: &AppState,
    score_entry: WalEntry,
    stamp: Option<WalEntry>,
) -> Result<ScoreChange, ApiError> {
    let mut entries = vec![score_entry];
    entries.extend(stamp);
    log_entries(state, &entries).await?;

    let change = match &entries[0] {
        WalEntry::Insert {
            board,
            entity,
            score,
            at,
        } => state.engine.insert_at(board, entity, *score, *at)?,
        WalEntry::Increment {
            board,
            entity,
            delta,
            at,
        } => state.engine.increment_at(board, entity, *delta, *at)?,
        other => {
            return Err(ApiError::Internal(format!(
                "unexpected score entry: {}",
                other.kind()
            )))
        }
    };
    if let Some(WalEntry::SetMetadata {
        board,
        entity,
        metadata,
    }) = entries.get(1)
    {
        state.engine.set_metadata(board, entity, metadata.clone())?;
    }
    Ok(change)
}

/// RAII guard that releases a memory reservation when dropped.
struct MemoryReservation {
    reserved: Arc<AtomicUsize>,
    amount: usize,
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.reserved.fetch_sub(self.amount, Ordering::Relaxed);
    }
}

/// Check memory limit and atomically reserve `extra_bytes` for this request.
/// Returns a guard that releases the reservation on drop (success or error).
fn check_memory_limit_reserve(
    state: &AppState,
    extra_bytes: usize,
) -> Result<MemoryReservation, ApiError> {
    if state.max_memory_bytes == 0 {
        return Ok(MemoryReservation {
            reserved: state.memory_reserved.clone(),
            amount: 0,
        });
    }

    let prev_reserved = state
        .memory_reserved
        .fetch_add(extra_bytes, Ordering::Relaxed);
    let used = state.engine.total_memory_bytes();
    let total = used + prev_reserved + extra_bytes;

    if total > state.max_memory_bytes {
        state
            .memory_reserved
            .fetch_sub(extra_bytes, Ordering::Relaxed);
        return Err(ApiError::InsufficientStorage(format!(
            "Memory limit exceeded: {} bytes committed + {} bytes reserved, {} bytes allowed",
            used,
            prev_reserved + extra_bytes,
            state.max_memory_bytes
        )));
    }

    Ok(MemoryReservation {
        reserved: state.memory_reserved.clone(),
        amount: extra_bytes,
    })
}

/// Rough per-entity cost of a new entry: id, index node, map slot, metadata stamp.
fn estimate_entry_bytes(entity: &str) -> usize {
    entity.len() * 2 + 256
}

fn require_board(state: &AppState, name: &str) -> Result<Board, ApiError> {
    state
        .engine
        .get_board(name)
        .ok_or_else(|| ApiError::NotFound(format!("Leaderboard '{}' not found", name)))
}

// ── Checkpoints and history ─────────────────────────────────────────────

/// Saves every board, removes snapshots of deleted boards, and truncates the WAL.
///
/// Waits for in-flight writes to finish and blocks new ones until done. Each
/// snapshot is stamped with the last logged sequence number, so records left in
/// a WAL that fails to truncate are skipped on the next replay. The WAL is kept
/// when any board fails to save. Returns the number of boards saved.
pub async fn checkpoint(state: &AppState) -> io::Result<usize> {
    let _exclusive = state.writes.exclusive().await;
    let _gate = state.wal.freeze();
    state.engine.mark_covered(state.wal.last_seq());

    let mut boards: Vec<(String, Board)> = state
        .engine
        .boards
        .read()
        .iter()
        .map(|(name, board)| (name.clone(), board.clone()))
        .collect();
    boards.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, board) in &boards {
        if let Err(e) = save_board(board, &state.data_dir) {
            tracing::error!(board = %name, "Snapshot failed, WAL preserved: {}", e);
            return Err(e);
        }
    }
    let live: Vec<String> = boards.into_iter().map(|(name, _)| name).collect();
    prune_snapshots(&state.data_dir, &live)?;
    state.wal.truncate()?;
    state.writes.prune(&live);

    tracing::info!(boards = live.len(), "Checkpoint complete, WAL truncated");
    Ok(live.len())
}

/// Logs and records a history snapshot of `name`.
pub async fn record_history(
    state: &AppState,
    name: &str,
    description: &str,
) -> Result<BoardSnapshot, ApiError> {
    let _ticket = state.writes.acquire(name).await;
    require_board(state, name)?;
    let taken_at = Utc::now();
    log_entries(
        state,
        &[WalEntry::RecordSnapshot {
            board: name.to_string(),
            description: description.to_string(),
            taken_at,
        }],
    )
    .await?;
    let snapshot = state.engine.record_snapshot(name, description, taken_at)?;
    metrics::record_write_operation(name, "snapshot");
    Ok(snapshot)
}

// ── Health and metrics ──────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let boards_count = state.engine.boards.read().len();
    let total_entities = state.engine.total_entities();
    let memory_used = state.engine.total_memory_bytes();
    let memory_reserved = state.memory_reserved.load(Ordering::Relaxed);
    let wal_size = state.wal.size_bytes();
    let uptime = state.start_time.elapsed().as_secs();
    let disk_available = disk_available_bytes(&state.data_dir);

    let mut warnings = Vec::new();

    let memory_degraded = state.max_memory_bytes > 0
        && memory_used + memory_reserved >= state.max_memory_bytes * 9 / 10;
    if memory_degraded {
        warnings.push(format!(
            "Memory usage at {}% of limit",
            (memory_used + memory_reserved) * 100 / state.max_memory_bytes
        ));
    }

    let disk_low = disk_available < 100 * 1024 * 1024;
    if disk_low {
        warnings.push(format!(
            "Low disk space: {} MB available",
            disk_available / (1024 * 1024)
        ));
    }

    if wal_size > 1024 * 1024 * 1024 {
        warnings.push(format!(
            "Large WAL: {} MB (consider compacting)",
            wal_size / (1024 * 1024)
        ));
    }

    let degraded = memory_degraded || disk_low;
    let status_code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            boards_count,
            total_entities,
            memory_used_bytes: memory_used,
            memory_reserved_bytes: memory_reserved,
            memory_limit_bytes: state.max_memory_bytes,
            wal_size_bytes: wal_size,
            disk_available_bytes: disk_available,
            warnings,
        }),
    )
}

/// Get available disk space for the data directory.
#[allow(clippy::unnecessary_cast)]
fn disk_available_bytes(data_dir: &str) -> u64 {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        if let Ok(path) = CString::new(data_dir) {
            // SAFETY: `path` is a valid NUL-terminated string and `stat` is a
            // zeroed plain-old-data struct that statvfs fills in.
            unsafe {
                let mut stat: libc::statvfs = std::mem::zeroed();
                if libc::statvfs(path.as_ptr(), &mut stat) == 0 {
                    // f_bavail/f_frsize are u32 on macOS, u64 on Linux
                    return stat.f_bavail as u64 * stat.f_frsize as u64;
                }
            }
        }
    }
    u64::MAX
}

/// `GET /metrics`
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

// ── Boards ──────────────────────────────────────────────────────────────

/// `GET /leaderboards`
pub async fn list_boards(State(state): State<AppState>) -> Json<Vec<BoardInfo>> {
    let infos = state
        .engine
        .list_boards()
        .into_iter()
        .map(|name| BoardInfo {
            total_players: state.engine.len(&name),
            name,
        })
        .collect();
    Json(infos)
}

/// `DELETE /leaderboards/:name`
///
/// Removes every player; the board and its history remain.
pub async fn clear_board(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let _ticket = state.writes.acquire(&name).await;
    let removed = if state.engine.get_board(&name).is_some() {
        log_entries(&state, &[WalEntry::ClearBoard { name: name.clone() }]).await?;
        state.engine.clear(&name)
    } else {
        0
    };
    metrics::record_write_operation(&name, "clear");
    tracing::info!(board = %name, removed, "Leaderboard cleared");
    Ok(Json(ClearResponse {
        message: "Leaderboard cleared successfully".into(),
        leaderboard_name: name,
        players_removed: removed,
    }))
}

/// `DELETE /admin/boards/:name`
pub async fn delete_board(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let _ticket = state.writes.acquire(&name).await;
    require_board(&state, &name)?;
    log_entries(&state, &[WalEntry::DeleteBoard { name: name.clone() }]).await?;
    state.engine.delete_board(&name);
    metrics::record_write_operation(&name, "drop");
    tracing::info!(board = %name, "Leaderboard deleted");
    Ok(Json(MessageResponse {
        message: format!("Leaderboard '{}' deleted", name),
    }))
}

/// `POST /admin/compact`
pub async fn compact(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    let count = checkpoint(&state).await.map_err(|e| {
        tracing::error!("Compaction failed: {}", e);
        ApiError::ServiceUnavailable("Compaction failed".into())
    })?;
    Ok(Json(MessageResponse {
        message: format!("Compaction complete, {} leaderboards saved", count),
    }))
}

// ── Player writes ───────────────────────────────────────────────────────

/// `POST /leaderboards/:name/players`
pub async fn add_player(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<AddPlayerRequest>,
) -> Result<Json<ScoreChangeResponse>, ApiError> {
    validate_board_name(&name)?;
    validate_entity_id(&req.player_name)?;
    let attributes = json_to_metadata(req.metadata);
    validate_metadata(&attributes)?;
    let _mem_guard = check_memory_limit_reserve(&state, estimate_entry_bytes(&req.player_name))?;

    let _ticket = state.writes.acquire(&name).await;
    let at = Utc::now();
    let stamp = stamp_entry(&state, &name, &req.player_name, req.score, at, attributes)?;
    let entry = WalEntry::Insert {
        board: name.clone(),
        entity: req.player_name.clone(),
        score: req.score,
        at,
    };
    let change = commit_score(&state, entry, Some(stamp)).await?;

    metrics::record_write_operation(&name, "insert");
    tracing::info!(board = %name, player = %req.player_name, score = req.score, rank = change.rank, "Player added");
    Ok(Json(ScoreChangeResponse::new(
        format!("Player {} added successfully", req.player_name),
        &name,
        change,
    )))
}

/// `POST /leaderboards/:name/players/batch`
pub async fn add_players_batch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<BatchPlayersRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    validate_board_name(&name)?;
    if req.players.is_empty() {
        return Err(ApiError::BadRequest("Batch must not be empty".into()));
    }
    if req.players.len() > config::MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest(format!(
            "Batch size exceeds maximum of {}",
            config::MAX_BATCH_SIZE
        )));
    }
    for player in req.players.keys() {
        validate_entity_id(player)?;
    }
    let estimated_bytes: usize = req.players.keys().map(|p| estimate_entry_bytes(p)).sum();
    let _mem_guard = check_memory_limit_reserve(&state, estimated_bytes)?;

    let entries: Vec<(String, i64)> = req.players.into_iter().collect();
    let submitted = entries.len();

    let _ticket = state.writes.acquire(&name).await;
    let at = Utc::now();
    log_entries(
        &state,
        &[WalEntry::BatchInsert {
            board: name.clone(),
            entries: entries.clone(),
            at,
        }],
    )
    .await?;
    let added = state.engine.batch_insert_at(&name, &entries, at)?;

    metrics::record_write_operation(&name, "batch_insert");
    tracing::info!(board = %name, submitted, added, "Batch inserted");
    Ok(Json(BatchResponse {
        message: format!("Added {} players successfully", added),
        leaderboard: name,
        players_submitted: submitted,
        players_added: added,
    }))
}

/// `PUT /leaderboards/:name/players/:player/score`
pub async fn increment_score(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
    Json(req): Json<ScoreIncrementRequest>,
) -> Result<Json<ScoreChangeResponse>, ApiError> {
    validate_board_name(&name)?;
    validate_entity_id(&player)?;
    let _mem_guard = check_memory_limit_reserve(&state, estimate_entry_bytes(&player))?;

    let _ticket = state.writes.acquire(&name).await;
    let at = Utc::now();
    // Power-ups active at `at` are already applied to the preview.
    let new_score = state
        .engine
        .preview_increment(&name, &player, req.score_increment, at)?;
    let stamp = stamp_entry(&state, &name, &player, new_score, at, Metadata::new()).ok();
    let entry = WalEntry::Increment {
        board: name.clone(),
        entity: player.clone(),
        delta: req.score_increment,
        at,
    };
    let change = commit_score(&state, entry, stamp).await?;

    metrics::record_write_operation(&name, "increment");
    tracing::info!(board = %name, player = %player, delta = req.score_increment, score = change.score, "Score updated");
    Ok(Json(ScoreChangeResponse::new(
        "Score updated successfully".into(),
        &name,
        change,
    )))
}

/// `PUT /leaderboards/:name/players/:player/score/absolute`
pub async fn set_score(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
    Json(req): Json<SetScoreRequest>,
) -> Result<Json<ScoreChangeResponse>, ApiError> {
    validate_board_name(&name)?;
    validate_entity_id(&player)?;
    let _mem_guard = check_memory_limit_reserve(&state, estimate_entry_bytes(&player))?;

    let _ticket = state.writes.acquire(&name).await;
    let at = Utc::now();
    let stamp = stamp_entry(&state, &name, &player, req.score, at, Metadata::new()).ok();
    let entry = WalEntry::Insert {
        board: name.clone(),
        entity: player.clone(),
        score: req.score,
        at,
    };
    let change = commit_score(&state, entry, stamp).await?;

    metrics::record_write_operation(&name, "set");
    tracing::info!(board = %name, player = %player, score = req.score, "Score set");
    Ok(Json(ScoreChangeResponse::new(
        "Score set successfully".into(),
        &name,
        change,
    )))
}

/// `DELETE /leaderboards/:name/players/:player`
pub async fn remove_player(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
) -> Result<Json<RemoveResponse>, ApiError> {
    validate_entity_id(&player)?;
    let _ticket = state.writes.acquire(&name).await;
    if state.engine.score(&name, &player).is_err() {
        return Err(ApiError::NotFound("Player not found".into()));
    }
    log_entries(
        &state,
        &[WalEntry::Remove {
            board: name.clone(),
            entity: player.clone(),
        }],
    )
    .await?;
    state.engine.remove(&name, &player)?;

    metrics::record_write_operation(&name, "remove");
    tracing::info!(board = %name, player = %player, "Player removed");
    Ok(Json(RemoveResponse {
        message: format!("Player {} removed successfully", player),
        leaderboard: name,
    }))
}

/// `PUT /leaderboards/:name/players/:player/metadata`
pub async fn set_player_metadata(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
    Json(req): Json<SetMetadataRequest>,
) -> Result<Json<MetadataResponse>, ApiError> {
    validate_board_name(&name)?;
    validate_entity_id(&player)?;
    let attributes = json_to_metadata(req.metadata);
    validate_metadata(&attributes)?;

    let _ticket = state.writes.acquire(&name).await;
    let mut merged = state.engine.metadata(&name, &player).unwrap_or_default();
    merged.extend(attributes.clone());
    validate_metadata(&merged)?;
    log_entries(
        &state,
        &[WalEntry::SetMetadata {
            board: name.clone(),
            entity: player.clone(),
            metadata: attributes.clone(),
        }],
    )
    .await?;
    let merged = state.engine.set_metadata(&name, &player, attributes)?;

    metrics::record_write_operation(&name, "metadata");
    Ok(Json(MetadataResponse {
        leaderboard_name: name,
        player_name: player,
        metadata: metadata_to_json(&merged),
    }))
}

/// `POST /leaderboards/:name/trim`
pub async fn trim_board(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<TrimRequest>,
) -> Result<Json<TrimResponse>, ApiError> {
    let _ticket = state.writes.acquire(&name).await;
    let removed = if req.count > 0 && state.engine.len(&name) > 0 {
        log_entries(
            &state,
            &[WalEntry::TrimBottom {
                board: name.clone(),
                count: req.count,
            }],
        )
        .await?;
        state.engine.trim_bottom(&name, req.count)?
    } else {
        Vec::new()
    };

    metrics::record_write_operation(&name, "trim");
    tracing::info!(board = %name, removed = removed.len(), "Leaderboard trimmed");
    Ok(Json(TrimResponse {
        leaderboard_name: name,
        players_removed: removed.len(),
        removed,
    }))
}

/// `POST /leaderboards/:name/players/:player/power-ups`
pub async fn activate_power_up(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
    Json(req): Json<PowerUpRequest>,
) -> Result<Json<PowerUpResponse>, ApiError> {
    validate_entity_id(&player)?;
    let power_up = powerups::find(&req.power_up)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown power-up '{}'", req.power_up)))?;

    let _ticket = state.writes.acquire(&name).await;
    if state.engine.score(&name, &player).is_err() {
        return Err(ApiError::NotFound("Player not found".into()));
    }
    let at = Utc::now();
    log_entries(
        &state,
        &[WalEntry::ActivatePowerUp {
            board: name.clone(),
            entity: player.clone(),
            power_up: power_up.id.to_string(),
            at,
        }],
    )
    .await?;
    let active = state
        .engine
        .activate_power_up(&name, &player, power_up.id, at)?;

    metrics::record_write_operation(&name, "power_up");
    tracing::info!(board = %name, player = %player, power_up = power_up.id, expires_at = %active.expires_at, "Power-up activated");
    Ok(Json(PowerUpResponse {
        message: format!("{} activated for {}", power_up.name, player),
        leaderboard: name,
        player_name: player,
        power_up: ActivePowerUpResponse::new(&active, at),
    }))
}

/// `POST /leaderboards/:name/snapshots`
pub async fn create_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<SnapshotRequest>>,
) -> Result<Json<BoardSnapshot>, ApiError> {
    let description = body
        .and_then(|Json(req)| req.description)
        .unwrap_or_else(|| "Manual snapshot".to_string());
    let snapshot = record_history(&state, &name, &description).await?;
    tracing::info!(board = %name, entities = snapshot.total_entities, "Snapshot recorded");
    Ok(Json(snapshot))
}

// ── Player reads ────────────────────────────────────────────────────────

/// `GET /leaderboards/:name/players/:player`
pub async fn get_player(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
) -> Result<Json<PlayerResponse>, ApiError> {
    let board = state
        .engine
        .get_board(&name)
        .ok_or_else(|| ApiError::NotFound("Player not found".into()))?;
    let entry = board
        .rank(&player)
        .map_err(|_| ApiError::NotFound("Player not found".into()))?;
    let metadata = board.metadata(&player).unwrap_or_default();
    metrics::record_query(&name, "player");

    let position = entry.position();
    let achievements = leaderboard_core::achievements::earned(entry.score, position)
        .into_iter()
        .map(AchievementResponse::from)
        .collect();
    Ok(Json(PlayerResponse {
        player_name: entry.entity,
        score: entry.score,
        rank: entry.rank,
        position,
        metadata: metadata_to_json(&metadata),
        achievements,
    }))
}

/// `GET /leaderboards/:name/players/:player/stats`
pub async fn get_player_stats(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
    Query(query): Query<PlayerStatsQuery>,
) -> Result<Json<PlayerStatsResponse>, ApiError> {
    let activity_limit = query
        .activity_limit
        .unwrap_or(config::DEFAULT_ACTIVITY_LIMIT);
    if activity_limit > config::MAX_RECENT_ACTIVITY {
        return Err(ApiError::BadRequest(format!(
            "activity_limit must be 0-{}",
            config::MAX_RECENT_ACTIVITY
        )));
    }
    let not_found = |_: RankError| ApiError::NotFound("Player not found".into());
    let board = state
        .engine
        .get_board(&name)
        .ok_or_else(|| ApiError::NotFound("Player not found".into()))?;
    let entry = board.rank(&player).map_err(not_found)?;
    let profile = board.profile(&player).map_err(not_found)?;
    metrics::record_query(&name, "player_stats");

    Ok(Json(PlayerStatsResponse::new(
        &name,
        entry,
        &profile,
        activity_limit,
        Utc::now(),
    )))
}

/// `GET /leaderboards/:name/players/:player/metadata`
pub async fn get_player_metadata(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let metadata = state.engine.metadata(&name, &player)?;
    Ok(Json(MetadataResponse {
        leaderboard_name: name,
        player_name: player,
        metadata: metadata_to_json(&metadata),
    }))
}

/// `GET /leaderboards/:name/players/:player/context`
pub async fn get_player_context(
    State(state): State<AppState>,
    Path((name, player)): Path<(String, String)>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<ContextResponse>, ApiError> {
    let radius = query.radius.unwrap_or(config::DEFAULT_NEIGHBOR_RADIUS);
    if radius > config::MAX_NEIGHBOR_RADIUS {
        return Err(ApiError::BadRequest(format!(
            "radius must be 0-{}",
            config::MAX_NEIGHBOR_RADIUS
        )));
    }
    let around = state
        .engine
        .neighbors(&name, &player, radius)
        .map_err(|_| ApiError::NotFound("Player not found".into()))?;
    metrics::record_query(&name, "context");

    let context = around
        .into_iter()
        .map(|entry| ContextEntry {
            is_target: entry.entity == player,
            entry: entry.into(),
        })
        .collect();
    Ok(Json(ContextResponse {
        leaderboard_name: name,
        target_player: player,
        context,
    }))
}

// ── Board reads ─────────────────────────────────────────────────────────

/// `GET /leaderboards/:name/top`
pub async fn get_top(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<TopQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let count = query.count.unwrap_or(config::DEFAULT_TOP_COUNT);
    if count == 0 || count > config::MAX_TOP_COUNT {
        return Err(ApiError::BadRequest(format!(
            "count must be 1-{}",
            config::MAX_TOP_COUNT
        )));
    }
    metrics::record_query(&name, "top");
    Ok(Json(listing(&state, name, 0, count)))
}

/// `GET /leaderboards/:name/page`
pub async fn get_page(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let offset = query.offset.unwrap_or(0);
    let count = query.count.unwrap_or(config::DEFAULT_TOP_COUNT);
    if count == 0 || count > config::MAX_TOP_COUNT {
        return Err(ApiError::BadRequest(format!(
            "count must be 1-{}",
            config::MAX_TOP_COUNT
        )));
    }
    metrics::record_query(&name, "page");
    Ok(Json(listing(&state, name, offset, count)))
}

fn listing(state: &AppState, name: String, offset: usize, count: usize) -> LeaderboardResponse {
    let (total_players, entries) = match state.engine.get_board(&name) {
        Some(board) => (board.len(), board.page(offset, count)),
        None => (0, Vec::new()),
    };
    LeaderboardResponse {
        leaderboard_name: name,
        total_players,
        offset,
        entries: entries.into_iter().map(EntryResponse::from).collect(),
    }
}

/// `GET /leaderboards/:name/range`
pub async fn get_range(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<RangeResponse>, ApiError> {
    if query.min_score > query.max_score {
        return Err(ApiError::BadRequest(
            "min_score cannot be greater than max_score".into(),
        ));
    }
    let players: Vec<EntryResponse> = state
        .engine
        .range_by_score(&name, query.min_score, query.max_score)
        .into_iter()
        .map(EntryResponse::from)
        .collect();
    metrics::record_query(&name, "range");
    Ok(Json(RangeResponse {
        leaderboard_name: name,
        score_range: format!("{} - {}", query.min_score, query.max_score),
        players_found: players.len(),
        players,
    }))
}

/// `GET /leaderboards/:name/stats`
pub async fn get_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<StatsResponse> {
    let stats = state.engine.stats(&name);
    metrics::record_query(&name, "stats");
    Json(StatsResponse {
        leaderboard_name: name,
        total_players: stats.total_entities,
        highest_score: stats.highest,
        lowest_score: stats.lowest,
        average_score: stats.average.map(|a| (a * 100.0).round() / 100.0),
        total_score: stats.total_score,
        top_3: stats.top_3.into_iter().map(EntryResponse::from).collect(),
    })
}

/// `GET /leaderboards/:name/analytics`
pub async fn get_analytics(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<AnalyticsResponse> {
    let analytics = state.engine.analytics(&name);
    metrics::record_query(&name, "analytics");
    Json(AnalyticsResponse {
        leaderboard_name: name,
        analytics,
    })
}

/// `GET /leaderboards/:name/snapshots`
pub async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(config::MAX_HISTORY_SNAPSHOTS);
    let snapshots = require_board(&state, &name)?.history(limit);
    Ok(Json(HistoryResponse {
        leaderboard_name: name,
        snapshots,
    }))
}

// ── Catalogue ───────────────────────────────────────────────────────────

/// `GET /power-ups`
pub async fn list_power_ups() -> Json<Vec<PowerUpInfo>> {
    Json(powerups::CATALOGUE.iter().map(PowerUpInfo::from).collect())
}
