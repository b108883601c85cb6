//! Board and engine data structures.
//!
//! A [`Board`] pairs a direct `entity → score` map with a [`RankIndex`] ordered by
//! descending score (ties by ascending entity id), plus per-entity metadata,
//! per-entity activity profiles and a bounded snapshot history. [`Engine`] manages named boards with thread-safe
//! concurrent access.
//!
//! Every mutation runs entirely under the board's write lock, so readers never see
//! the map and the index disagree. No operation here performs I/O.

use crate::analytics::{self, BoardAnalytics, BoardStats};
use crate::config::{
    MAX_BATCH_SIZE, MAX_BOARD_NAME_LEN, MAX_ENTITY_ID_LEN, MAX_METADATA_BYTES, MAX_METADATA_KEYS,
};
use crate::entity::{Metadata, RankedEntry, ScoreChange};
use crate::error::{RankError, Result};
use crate::history::{BoardSnapshot, History};
use crate::index::RankIndex;
use crate::powerups::{self, ActivePowerUp, PowerUp};
use crate::profile::{Activity, ActivityKind, PlayerProfile};
use crate::storage::wal::{WalEntry, WalRecord};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Checks a board name: 1 to [`MAX_BOARD_NAME_LEN`] characters of `[A-Za-z0-9_-]`.
///
/// Board names become snapshot file names, so anything else is rejected.
pub fn validate_board_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RankError::InvalidArgument(
            "board name must not be empty".into(),
        ));
    }
    if name.len() > MAX_BOARD_NAME_LEN {
        return Err(RankError::InvalidArgument(format!(
            "board name exceeds {} characters",
            MAX_BOARD_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RankError::InvalidArgument(format!(
            "board name '{}' may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// Checks an entity id: non-empty, at most [`MAX_ENTITY_ID_LEN`] bytes.
pub fn validate_entity_id(entity: &str) -> Result<()> {
    if entity.is_empty() {
        return Err(RankError::InvalidArgument(
            "entity id must not be empty".into(),
        ));
    }
    if entity.len() > MAX_ENTITY_ID_LEN {
        return Err(RankError::InvalidArgument(format!(
            "entity id exceeds {} bytes",
            MAX_ENTITY_ID_LEN
        )));
    }
    Ok(())
}

/// Checks key count and encoded size of a metadata bag.
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(RankError::InvalidArgument(format!(
            "metadata has {} keys (max {})",
            metadata.len(),
            MAX_METADATA_KEYS
        )));
    }
    if metadata.keys().any(|k| k.is_empty()) {
        return Err(RankError::InvalidArgument(
            "metadata keys must not be empty".into(),
        ));
    }
    let size = bincode::serialized_size(metadata)
        .map_err(|e| RankError::InvalidArgument(e.to_string()))?;
    if size as usize > MAX_METADATA_BYTES {
        return Err(RankError::InvalidArgument(format!(
            "metadata is {} bytes (max {})",
            size, MAX_METADATA_BYTES
        )));
    }
    Ok(())
}

/// Internal data for a board, protected by a `RwLock`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BoardData {
    pub name: String,
    /// Direct lookup. Always holds exactly the keys of `index`.
    pub scores: HashMap<String, i64>,
    pub index: RankIndex,
    pub metadata: HashMap<String, Metadata>,
    pub history: History,
    /// Activity and progression per scored entity.
    pub profiles: HashMap<String, PlayerProfile>,
    /// Highest WAL sequence number whose effect this state already contains.
    pub wal_seq: u64,
    /// Set once the board is removed from its engine; such a handle is stale.
    #[serde(skip)]
    pub retired: bool,
}

impl BoardData {
    /// Creates a new empty board.
    pub fn new(name: String) -> Self {
        Self {
            name,
            scores: HashMap::new(),
            index: RankIndex::new(),
            metadata: HashMap::new(),
            history: History::new(),
            profiles: HashMap::new(),
            wal_seq: 0,
            retired: false,
        }
    }

    /// Validate internal invariants after deserialization.
    ///
    /// Checks the index structure, that the index and the score map hold the
    /// same entries, that every profile belongs to a scored entity, and that
    /// history is within bounds.
    pub fn validate(&self) -> Result<(), String> {
        validate_board_name(&self.name).map_err(|e| e.to_string())?;
        self.index.validate()?;

        if self.index.len() != self.scores.len() {
            return Err(format!(
                "index holds {} entries but score map holds {}",
                self.index.len(),
                self.scores.len()
            ));
        }
        for (_, entity, score) in self.index.iter() {
            match self.scores.get(entity) {
                Some(&s) if s == score => {}
                Some(&s) => {
                    return Err(format!(
                        "entity '{}' indexed at {} but scored {}",
                        entity, score, s
                    ))
                }
                None => return Err(format!("indexed entity '{}' missing from score map", entity)),
            }
        }
        if let Some(orphan) = self.profiles.keys().find(|e| !self.scores.contains_key(*e)) {
            return Err(format!("profile for unscored entity '{}'", orphan));
        }

        self.history.validate()
    }

    fn upsert(&mut self, entity: &str, score: i64) -> ScoreChange {
        let (previous, previous_rank) = match self.scores.get(entity).copied() {
            Some(old) => {
                let rank = self.index.rank_of(old, entity);
                self.index.remove(old, entity);
                (Some(old), rank)
            }
            None => (None, None),
        };
        let rank = self.index.insert(score, entity.to_string());
        self.scores.insert(entity.to_string(), score);

        ScoreChange {
            entity: entity.to_string(),
            previous,
            score,
            previous_rank,
            rank,
        }
    }

    /// Upserts and records the write in the entity's profile.
    fn write_score(
        &mut self,
        entity: &str,
        score: i64,
        kind: ActivityKind,
        at: DateTime<Utc>,
    ) -> ScoreChange {
        let change = self.upsert(entity, score);
        let activity = Activity {
            at,
            kind,
            score_change: change.score.saturating_sub(change.previous.unwrap_or(0)),
            score: change.score,
        };
        self.profiles
            .entry(entity.to_string())
            .or_insert_with(|| PlayerProfile::new(at))
            .record(activity);
        change
    }

    /// Score after adding `delta` with the entity's power-ups applied.
    fn incremented(&self, entity: &str, delta: i64, at: DateTime<Utc>) -> Result<i64> {
        let overflow = || {
            RankError::InvalidArgument(format!("score overflow: {} boosted for '{}'", delta, entity))
        };
        let effective = match self.profiles.get(entity) {
            Some(profile) => profile.boost(delta, at).ok_or_else(overflow)?,
            None => delta,
        };
        match self.scores.get(entity) {
            Some(&current) => current.checked_add(effective).ok_or_else(|| {
                RankError::InvalidArgument(format!(
                    "score overflow: {} + {} for '{}'",
                    current, effective, entity
                ))
            }),
            None => Ok(effective),
        }
    }

    fn add_score(&mut self, entity: &str, delta: i64, at: DateTime<Utc>) -> Result<ScoreChange> {
        let score = self.incremented(entity, delta, at)?;
        Ok(self.write_score(entity, score, ActivityKind::Increment, at))
    }

    fn write_batch(&mut self, entries: &[(String, i64)], at: DateTime<Utc>) -> usize {
        let mut created = 0;
        for (entity, score) in entries {
            if self.write_score(entity, *score, ActivityKind::Batch, at).created() {
                created += 1;
            }
        }
        created
    }

    fn merge_metadata(&mut self, entity: &str, attributes: Metadata) -> Result<Metadata> {
        let mut merged = self.metadata.get(entity).cloned().unwrap_or_default();
        merged.extend(attributes);
        validate_metadata(&merged)?;
        self.metadata.insert(entity.to_string(), merged.clone());
        Ok(merged)
    }

    fn activate(
        &mut self,
        entity: &str,
        power_up: &PowerUp,
        at: DateTime<Utc>,
    ) -> Result<ActivePowerUp> {
        if !self.scores.contains_key(entity) {
            return Err(RankError::not_found(&self.name, entity));
        }
        Ok(self
            .profiles
            .entry(entity.to_string())
            .or_insert_with(|| PlayerProfile::new(at))
            .activate(power_up, at))
    }

    fn delete(&mut self, entity: &str) -> bool {
        self.metadata.remove(entity);
        self.profiles.remove(entity);
        match self.scores.remove(entity) {
            Some(score) => {
                self.index.remove(score, entity);
                true
            }
            None => false,
        }
    }

    fn window(&self, start: usize, count: usize) -> Vec<RankedEntry> {
        self.index
            .iter_from(start)
            .take(count)
            .map(|(rank, entity, score)| RankedEntry {
                entity: entity.to_string(),
                score,
                rank,
            })
            .collect()
    }

    fn ranked(&self, entity: &str) -> Result<RankedEntry> {
        let score = *self
            .scores
            .get(entity)
            .ok_or_else(|| RankError::not_found(&self.name, entity))?;
        let rank = self
            .index
            .rank_of(score, entity)
            .ok_or_else(|| RankError::not_found(&self.name, entity))?;
        Ok(RankedEntry {
            entity: entity.to_string(),
            score,
            rank,
        })
    }
}

/// A thread-safe leaderboard.
///
/// All operations acquire either a read or write lock on the internal [`BoardData`].
/// Cloning a `Board` produces a new handle to the same shared data. A handle
/// outlives [`Engine::delete_board`]: writes made through a stale handle land in
/// the retired board and are never seen again, so long-lived callers should go
/// through [`Engine`] instead.
#[derive(Debug, Clone)]
pub struct Board {
    pub data: Arc<RwLock<BoardData>>,
}

impl Board {
    /// Creates a new empty board.
    pub fn new(name: String) -> Self {
        Self::from_data(BoardData::new(name))
    }

    pub fn from_data(data: BoardData) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    /// `true` once the board has been deleted from its engine.
    pub fn is_retired(&self) -> bool {
        self.data.read().retired
    }

    /// Write access for fallible writes; a retired board is `BoardNotFound`.
    fn writable(&self) -> Result<RwLockWriteGuard<'_, BoardData>> {
        let data = self.data.write();
        if data.retired {
            return Err(RankError::BoardNotFound(data.name.clone()));
        }
        Ok(data)
    }

    /// Sets an absolute score, creating the entity if absent.
    pub fn insert(&self, entity: &str, score: i64) -> ScoreChange {
        self.insert_at(entity, score, Utc::now())
    }

    pub fn insert_at(&self, entity: &str, score: i64, at: DateTime<Utc>) -> ScoreChange {
        self.data
            .write()
            .write_score(entity, score, ActivityKind::Set, at)
    }

    /// Adds `delta` to the entity's score, creating it with `delta` if absent.
    ///
    /// Active power-ups scale the delta. Fails with `InvalidArgument` on
    /// overflow; nothing is applied then.
    pub fn increment(&self, entity: &str, delta: i64) -> Result<ScoreChange> {
        self.increment_at(entity, delta, Utc::now())
    }

    pub fn increment_at(&self, entity: &str, delta: i64, at: DateTime<Utc>) -> Result<ScoreChange> {
        self.writable()?.add_score(entity, delta, at)
    }

    /// Removes an entity with its metadata and profile. Returns `true` if it had a score.
    pub fn remove(&self, entity: &str) -> bool {
        self.data.write().delete(entity)
    }

    pub fn rank(&self, entity: &str) -> Result<RankedEntry> {
        self.data.read().ranked(entity)
    }

    pub fn score(&self, entity: &str) -> Option<i64> {
        self.data.read().scores.get(entity).copied()
    }

    /// Up to `count` entries, highest first.
    pub fn top(&self, count: usize) -> Vec<RankedEntry> {
        self.data.read().window(0, count)
    }

    /// Entries at ranks `[offset, offset + count)`.
    pub fn page(&self, offset: usize, count: usize) -> Vec<RankedEntry> {
        self.data.read().window(offset, count)
    }

    /// All entries with `min <= score <= max`, highest first.
    pub fn range_by_score(&self, min: i64, max: i64) -> Vec<RankedEntry> {
        if min > max {
            return Vec::new();
        }
        let data = self.data.read();
        let start = data.index.count_above(max);
        let end = data.index.count_at_least(min);
        data.window(start, end.saturating_sub(start))
    }

    /// Entries within `radius` ranks of the entity, clipped at both ends.
    pub fn neighbors(&self, entity: &str, radius: usize) -> Result<Vec<RankedEntry>> {
        let data = self.data.read();
        let center = data.ranked(entity)?;
        let start = center.rank.saturating_sub(radius);
        let end = center
            .rank
            .saturating_add(radius)
            .saturating_add(1)
            .min(data.index.len());
        Ok(data.window(start, end - start))
    }

    /// Removes every entity with its metadata and profile. History is kept.
    pub fn clear(&self) -> usize {
        let mut data = self.data.write();
        let removed = data.scores.len();
        data.scores.clear();
        data.index.clear();
        data.metadata.clear();
        data.profiles.clear();
        removed
    }

    /// Upserts every entry in one critical section. Returns the number of new entities.
    pub fn batch_insert(&self, entries: &[(String, i64)]) -> usize {
        self.data.write().write_batch(entries, Utc::now())
    }

    /// Removes the `count` lowest-ranked entities, returned in rank order.
    pub fn trim_bottom(&self, count: usize) -> Vec<String> {
        let mut data = self.data.write();
        let start = data.index.len().saturating_sub(count);
        let victims: Vec<String> = data
            .index
            .iter_from(start)
            .map(|(_, entity, _)| entity.to_string())
            .collect();
        for entity in &victims {
            data.delete(entity);
        }
        victims
    }

    pub fn len(&self) -> usize {
        self.data.read().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges `attributes` into the entity's metadata and returns the result.
    pub fn set_metadata(&self, entity: &str, attributes: Metadata) -> Result<Metadata> {
        self.writable()?.merge_metadata(entity, attributes)
    }

    /// Metadata for an entity. Empty if the entity is scored but has none.
    pub fn metadata(&self, entity: &str) -> Result<Metadata> {
        let data = self.data.read();
        if let Some(m) = data.metadata.get(entity) {
            return Ok(m.clone());
        }
        if data.scores.contains_key(entity) {
            return Ok(Metadata::new());
        }
        Err(RankError::not_found(&data.name, entity))
    }

    /// Activity statistics and progression of a scored entity.
    pub fn profile(&self, entity: &str) -> Result<PlayerProfile> {
        let data = self.data.read();
        data.profiles
            .get(entity)
            .cloned()
            .ok_or_else(|| RankError::not_found(&data.name, entity))
    }

    pub fn activate_power_up(
        &self,
        entity: &str,
        power_up: &PowerUp,
        at: DateTime<Utc>,
    ) -> Result<ActivePowerUp> {
        self.writable()?.activate(entity, power_up, at)
    }

    pub fn stats(&self) -> BoardStats {
        analytics::stats(&self.data.read().index)
    }

    pub fn analytics(&self) -> BoardAnalytics {
        let data = self.data.read();
        analytics::analytics(&data.index, &data.history)
    }

    /// Captures and stores a history snapshot.
    pub fn record_snapshot(&self, description: &str, taken_at: DateTime<Utc>) -> BoardSnapshot {
        let mut data = self.data.write();
        let snapshot = BoardSnapshot::capture(&data.index, description, taken_at);
        data.history.record(snapshot.clone());
        snapshot
    }

    pub fn history(&self, limit: usize) -> Vec<BoardSnapshot> {
        self.data.read().history.recent(limit)
    }

    /// WAL sequence number this board's state is known to contain.
    pub fn covered_seq(&self) -> u64 {
        self.data.read().wal_seq
    }

    /// Records that every WAL record up to `seq` is reflected in this board.
    pub fn mark_covered(&self, seq: u64) {
        let mut data = self.data.write();
        data.wal_seq = data.wal_seq.max(seq);
    }

    /// Estimates the total memory usage of this board in bytes.
    pub fn estimate_memory_bytes(&self) -> usize {
        let data = self.data.read();
        let mut total = data.index.estimate_memory_bytes();

        // Score map: key string + i64 + hash slot overhead
        for entity in data.scores.keys() {
            total += entity.capacity() + 8 + 16;
        }

        for (entity, bag) in &data.metadata {
            total += entity.capacity() + 48;
            total += bag.len() * 64; // rough estimate per metadata entry
        }

        for (entity, profile) in &data.profiles {
            total += entity.capacity() + 160;
            total += profile.recent_len() * 40 + profile.power_ups.len() * 48;
        }

        total += data.history.len() * 512;
        total
    }
}

/// Engine holds all boards.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    pub boards: Arc<RwLock<HashMap<String, Board>>>,
}

impl Engine {
    /// Creates a new empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine from boards loaded off disk.
    pub fn from_boards(boards: Vec<Board>) -> Self {
        let engine = Self::new();
        {
            let mut map = engine.boards.write();
            for board in boards {
                map.insert(board.name(), board);
            }
        }
        engine
    }

    /// Returns a cloned handle to the named board, or `None` if not found.
    ///
    /// The handle goes stale if the board is deleted; see [`Board`].
    pub fn get_board(&self, name: &str) -> Option<Board> {
        self.boards.read().get(name).cloned()
    }

    /// Returns the named board, creating it if absent.
    pub fn board_or_create(&self, name: &str) -> Result<Board> {
        if let Some(board) = self.get_board(name) {
            return Ok(board);
        }
        validate_board_name(name)?;
        let mut boards = self.boards.write();
        let board = boards
            .entry(name.to_string())
            .or_insert_with(|| Board::new(name.to_string()));
        Ok(board.clone())
    }

    /// Runs `op` on the live board under its write lock, creating the board if needed.
    ///
    /// A board deleted between lookup and lock is retired; the lookup is retried so
    /// the write lands in the board that replaced it.
    fn write_live<T>(&self, name: &str, op: impl FnOnce(&mut BoardData) -> Result<T>) -> Result<T> {
        loop {
            let board = self.board_or_create(name)?;
            let mut data = board.data.write();
            if data.retired {
                continue;
            }
            return op(&mut data);
        }
    }

    /// Creates an empty board. Returns `false` if it already existed.
    pub fn create_board(&self, name: &str) -> Result<bool> {
        validate_board_name(name)?;
        let mut boards = self.boards.write();
        if boards.contains_key(name) {
            return Ok(false);
        }
        boards.insert(name.to_string(), Board::new(name.to_string()));
        Ok(true)
    }

    /// Deletes a board with its metadata, profiles and history. Returns `true` if it existed.
    ///
    /// Outstanding handles to the board are retired.
    pub fn delete_board(&self, name: &str) -> bool {
        let removed = self.boards.write().remove(name);
        match removed {
            Some(board) => {
                board.data.write().retired = true;
                true
            }
            None => false,
        }
    }

    /// Returns the names of all boards, sorted.
    pub fn list_boards(&self) -> Vec<String> {
        let mut names: Vec<String> = self.boards.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn insert(&self, board: &str, entity: &str, score: i64) -> Result<ScoreChange> {
        self.insert_at(board, entity, score, Utc::now())
    }

    /// Sets a score as of `at`, the time recorded in the entity's activity.
    pub fn insert_at(
        &self,
        board: &str,
        entity: &str,
        score: i64,
        at: DateTime<Utc>,
    ) -> Result<ScoreChange> {
        validate_entity_id(entity)?;
        self.write_live(board, |data| {
            Ok(data.write_score(entity, score, ActivityKind::Set, at))
        })
    }

    pub fn increment(&self, board: &str, entity: &str, delta: i64) -> Result<ScoreChange> {
        self.increment_at(board, entity, delta, Utc::now())
    }

    /// Adds `delta` as of `at`; power-ups active at `at` apply.
    pub fn increment_at(
        &self,
        board: &str,
        entity: &str,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<ScoreChange> {
        validate_entity_id(entity)?;
        self.write_live(board, |data| data.add_score(entity, delta, at))
    }

    /// The score [`increment_at`](Engine::increment_at) would produce, without applying it.
    pub fn preview_increment(
        &self,
        board: &str,
        entity: &str,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        validate_entity_id(entity)?;
        match self.get_board(board) {
            Some(b) => b.data.read().incremented(entity, delta, at),
            None => Ok(delta),
        }
    }

    /// Returns `Ok(false)` when the entity (or board) is absent.
    pub fn remove(&self, board: &str, entity: &str) -> Result<bool> {
        validate_entity_id(entity)?;
        Ok(self
            .get_board(board)
            .map(|b| b.remove(entity))
            .unwrap_or(false))
    }

    pub fn rank(&self, board: &str, entity: &str) -> Result<RankedEntry> {
        self.get_board(board)
            .ok_or_else(|| RankError::not_found(board, entity))?
            .rank(entity)
    }

    pub fn score(&self, board: &str, entity: &str) -> Result<i64> {
        self.get_board(board)
            .and_then(|b| b.score(entity))
            .ok_or_else(|| RankError::not_found(board, entity))
    }

    pub fn top(&self, board: &str, count: usize) -> Vec<RankedEntry> {
        self.get_board(board)
            .map(|b| b.top(count))
            .unwrap_or_default()
    }

    pub fn page(&self, board: &str, offset: usize, count: usize) -> Vec<RankedEntry> {
        self.get_board(board)
            .map(|b| b.page(offset, count))
            .unwrap_or_default()
    }

    pub fn range_by_score(&self, board: &str, min: i64, max: i64) -> Vec<RankedEntry> {
        self.get_board(board)
            .map(|b| b.range_by_score(min, max))
            .unwrap_or_default()
    }

    pub fn neighbors(&self, board: &str, entity: &str, radius: usize) -> Result<Vec<RankedEntry>> {
        self.get_board(board)
            .ok_or_else(|| RankError::not_found(board, entity))?
            .neighbors(entity, radius)
    }

    /// Empties a board, keeping it. Returns the number of entities removed.
    pub fn clear(&self, board: &str) -> usize {
        self.get_board(board).map(|b| b.clear()).unwrap_or(0)
    }

    /// Upserts many entries atomically. Any invalid id rejects the whole batch.
    pub fn batch_insert(&self, board: &str, entries: &[(String, i64)]) -> Result<usize> {
        self.batch_insert_at(board, entries, Utc::now())
    }

    pub fn batch_insert_at(
        &self,
        board: &str,
        entries: &[(String, i64)],
        at: DateTime<Utc>,
    ) -> Result<usize> {
        if entries.len() > MAX_BATCH_SIZE {
            return Err(RankError::InvalidArgument(format!(
                "batch of {} entries exceeds {}",
                entries.len(),
                MAX_BATCH_SIZE
            )));
        }
        for (entity, _) in entries {
            validate_entity_id(entity)?;
        }
        if entries.is_empty() {
            return Ok(0);
        }
        self.write_live(board, |data| Ok(data.write_batch(entries, at)))
    }

    /// Number of entities in a board; 0 for an unknown board.
    pub fn len(&self, board: &str) -> usize {
        self.get_board(board).map(|b| b.len()).unwrap_or(0)
    }

    pub fn trim_bottom(&self, board: &str, count: usize) -> Result<Vec<String>> {
        Ok(self
            .get_board(board)
            .map(|b| b.trim_bottom(count))
            .unwrap_or_default())
    }

    pub fn set_metadata(&self, board: &str, entity: &str, attributes: Metadata) -> Result<Metadata> {
        validate_entity_id(entity)?;
        validate_metadata(&attributes)?;
        self.write_live(board, |data| data.merge_metadata(entity, attributes))
    }

    pub fn metadata(&self, board: &str, entity: &str) -> Result<Metadata> {
        self.get_board(board)
            .ok_or_else(|| RankError::not_found(board, entity))?
            .metadata(entity)
    }

    pub fn profile(&self, board: &str, entity: &str) -> Result<PlayerProfile> {
        self.get_board(board)
            .ok_or_else(|| RankError::not_found(board, entity))?
            .profile(entity)
    }

    /// Starts a catalogue power-up for a scored entity at `at`.
    pub fn activate_power_up(
        &self,
        board: &str,
        entity: &str,
        power_up: &str,
        at: DateTime<Utc>,
    ) -> Result<ActivePowerUp> {
        let power_up = find_power_up(power_up)?;
        self.get_board(board)
            .ok_or_else(|| RankError::not_found(board, entity))?
            .activate_power_up(entity, power_up, at)
    }

    /// Headline figures; an unknown board reports as empty.
    pub fn stats(&self, board: &str) -> BoardStats {
        self.get_board(board).map(|b| b.stats()).unwrap_or_default()
    }

    pub fn analytics(&self, board: &str) -> BoardAnalytics {
        self.get_board(board)
            .map(|b| b.analytics())
            .unwrap_or_default()
    }

    pub fn record_snapshot(
        &self,
        board: &str,
        description: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<BoardSnapshot> {
        let board = self
            .get_board(board)
            .ok_or_else(|| RankError::BoardNotFound(board.to_string()))?;
        Ok(board.record_snapshot(description, taken_at))
    }

    pub fn history(&self, board: &str, limit: usize) -> Vec<BoardSnapshot> {
        self.get_board(board)
            .map(|b| b.history(limit))
            .unwrap_or_default()
    }

    /// Applies one logged mutation.
    pub fn apply(&self, entry: &WalEntry) -> Result<()> {
        match entry {
            WalEntry::CreateBoard { name } => {
                self.create_board(name)?;
            }
            WalEntry::DeleteBoard { name } => {
                self.delete_board(name);
            }
            WalEntry::ClearBoard { name } => {
                self.clear(name);
            }
            WalEntry::Insert {
                board,
                entity,
                score,
                at,
            } => {
                self.insert_at(board, entity, *score, *at)?;
            }
            WalEntry::Increment {
                board,
                entity,
                delta,
                at,
            } => {
                self.increment_at(board, entity, *delta, *at)?;
            }
            WalEntry::Remove { board, entity } => {
                self.remove(board, entity)?;
            }
            WalEntry::BatchInsert { board, entries, at } => {
                self.batch_insert_at(board, entries, *at)?;
            }
            WalEntry::TrimBottom { board, count } => {
                self.trim_bottom(board, *count)?;
            }
            WalEntry::SetMetadata {
                board,
                entity,
                metadata,
            } => {
                self.set_metadata(board, entity, metadata.clone())?;
            }
            WalEntry::RecordSnapshot {
                board,
                description,
                taken_at,
            } => {
                self.record_snapshot(board, description, *taken_at)?;
            }
            WalEntry::ActivatePowerUp {
                board,
                entity,
                power_up,
                at,
            } => {
                self.activate_power_up(board, entity, power_up, *at)?;
            }
        }
        Ok(())
    }

    /// Applies replayed records in order. Returns how many applied cleanly.
    ///
    /// A record whose sequence number is at or below its board's loaded
    /// `wal_seq` is already part of that snapshot and is skipped. Coverage is
    /// taken from the boards present before replay starts.
    pub fn replay_wal(&self, records: &[WalRecord]) -> usize {
        let covered: HashMap<String, u64> = self
            .boards
            .read()
            .iter()
            .map(|(name, board)| (name.clone(), board.covered_seq()))
            .collect();

        let mut applied = 0;
        let mut already_saved = 0;
        for record in records {
            let entry = &record.entry;
            if record.seq <= covered.get(entry.board()).copied().unwrap_or(0) {
                already_saved += 1;
                continue;
            }
            match self.apply(entry) {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!(
                        board = %entry.board(),
                        op = entry.kind(),
                        seq = record.seq,
                        "WAL entry not applied: {}",
                        e
                    );
                }
            }
        }
        if already_saved > 0 {
            tracing::info!(already_saved, "Skipped WAL records contained in snapshots");
        }
        applied
    }

    /// Highest `wal_seq` across boards; WAL numbering must resume above it.
    pub fn max_covered_seq(&self) -> u64 {
        self.boards
            .read()
            .values()
            .map(|b| b.covered_seq())
            .max()
            .unwrap_or(0)
    }

    /// Marks every board as containing all WAL records up to `seq`.
    ///
    /// Only valid while no write can be logged or applied concurrently.
    pub fn mark_covered(&self, seq: u64) {
        for board in self.boards.read().values() {
            board.mark_covered(seq);
        }
    }

    /// Sum of entities across all boards.
    pub fn total_entities(&self) -> usize {
        self.boards.read().values().map(|b| b.len()).sum()
    }

    /// Returns the estimated total memory usage across all boards.
    pub fn total_memory_bytes(&self) -> usize {
        self.boards
            .read()
            .values()
            .map(|b| b.estimate_memory_bytes())
            .sum()
    }
}

/// Looks up a catalogue power-up, rejecting unknown ids.
pub fn find_power_up(id: &str) -> Result<&'static PowerUp> {
    powerups::find(id)
        .ok_or_else(|| RankError::InvalidArgument(format!("unknown power-up '{}'", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::MetadataValue;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn names(entries: &[RankedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.entity.as_str()).collect()
    }

    fn pairs(entries: &[RankedEntry]) -> Vec<(&str, i64)> {
        entries.iter().map(|e| (e.entity.as_str(), e.score)).collect()
    }

    fn seeded() -> Engine {
        let engine = Engine::new();
        engine.insert("game", "A", 100).unwrap();
        engine.insert("game", "B", 200).unwrap();
        engine.insert("game", "C", 150).unwrap();
        engine
    }

    // ── Scenarios ──────────────────────────────────────────────────────

    #[test]
    fn test_basic_scenario() {
        let engine = seeded();
        assert_eq!(names(&engine.top("game", 2)), vec!["B", "C"]);
        assert_eq!(engine.rank("game", "A").unwrap().rank, 2);

        let change = engine.increment("game", "A", 60).unwrap();
        assert_eq!(change.score, 160);
        assert_eq!(change.previous, Some(100));
        assert_eq!(change.previous_rank, Some(2));
        assert_eq!(change.rank, 1);
        assert_eq!(engine.score("game", "A").unwrap(), 160);
        assert_eq!(names(&engine.top("game", 1)), vec!["B"]);
        assert_eq!(engine.rank("game", "A").unwrap().rank, 1);

        assert_eq!(
            pairs(&engine.range_by_score("game", 120, 160)),
            vec![("A", 160), ("C", 150)]
        );
    }

    #[test]
    fn test_empty_board_queries() {
        let engine = Engine::new();
        assert!(engine.top("nothing", 5).is_empty());
        let err = engine.rank("nothing", "X").unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.score("nothing", "X").unwrap_err().is_not_found());
        assert!(engine.neighbors("nothing", "X", 2).unwrap_err().is_not_found());
        assert_eq!(engine.len("nothing"), 0);
        assert_eq!(engine.clear("nothing"), 0);
        assert!(!engine.remove("nothing", "X").unwrap());
        // Reads never create boards
        assert!(engine.list_boards().is_empty());
    }

    // ── Board operations ───────────────────────────────────────────────

    #[test]
    fn test_insert_is_upsert() {
        let board = Board::new("b".into());
        assert!(board.insert("alice", 10).created());
        let change = board.insert("alice", 5);
        assert!(!change.created());
        assert_eq!(change.previous, Some(10));
        assert_eq!(board.len(), 1);
        assert_eq!(board.score("alice"), Some(5));
    }

    #[test]
    fn test_insert_same_score_keeps_rank() {
        let board = Board::new("b".into());
        board.insert("a", 10);
        board.insert("b", 20);
        let change = board.insert("a", 10);
        assert_eq!(change.previous_rank, Some(1));
        assert_eq!(change.rank, 1);
        assert_eq!(change.rank_delta(), 0);
    }

    #[test]
    fn test_tie_break_by_entity_id() {
        let board = Board::new("b".into());
        board.insert("zed", 50);
        board.insert("amy", 50);
        board.insert("mia", 50);
        assert_eq!(names(&board.top(3)), vec!["amy", "mia", "zed"]);
        assert_eq!(board.rank("zed").unwrap().rank, 2);
    }

    #[test]
    fn test_increment_creates_and_subtracts() {
        let board = Board::new("b".into());
        let created = board.increment("p", -30).unwrap();
        assert!(created.created());
        assert_eq!(created.score, -30);
        let change = board.increment("p", 40).unwrap();
        assert_eq!(change.score, 10);
    }

    #[test]
    fn test_increment_overflow_applies_nothing() {
        let board = Board::new("b".into());
        board.insert("p", i64::MAX - 1);
        let err = board.increment("p", 5).unwrap_err();
        assert!(matches!(err, RankError::InvalidArgument(_)));
        assert_eq!(board.score("p"), Some(i64::MAX - 1));
        assert!(board.data.read().validate().is_ok());
    }

    #[test]
    fn test_remove() {
        let engine = seeded();
        engine
            .set_metadata("game", "A", Metadata::from([("k".to_string(), MetadataValue::Integer(1))]))
            .unwrap();
        assert!(engine.remove("game", "A").unwrap());
        assert!(!engine.remove("game", "A").unwrap());
        assert_eq!(engine.len("game"), 2);
        assert!(engine.metadata("game", "A").unwrap_err().is_not_found());
    }

    #[test]
    fn test_top_count_zero_and_oversized() {
        let engine = seeded();
        assert!(engine.top("game", 0).is_empty());
        assert_eq!(engine.top("game", 100).len(), 3);
    }

    #[test]
    fn test_page() {
        let board = Board::new("b".into());
        for i in 0..10 {
            board.insert(&format!("p{}", i), i * 10);
        }
        let page = board.page(3, 4);
        assert_eq!(page.len(), 4);
        assert_eq!(page[0].rank, 3);
        assert_eq!(page[0].score, 60);
        assert!(board.page(10, 5).is_empty());
    }

    #[test]
    fn test_range_by_score_edges() {
        let engine = seeded();
        assert!(engine.range_by_score("game", 300, 100).is_empty());
        assert_eq!(names(&engine.range_by_score("game", 150, 150)), vec!["C"]);
        assert_eq!(engine.range_by_score("game", i64::MIN, i64::MAX).len(), 3);
        assert!(engine.range_by_score("game", 201, 1000).is_empty());
    }

    #[test]
    fn test_neighbors_clipped() {
        let board = Board::new("b".into());
        for i in 0..6 {
            board.insert(&format!("p{}", i), 100 - i);
        }
        // p0 at rank 0: window clipped at the top
        assert_eq!(names(&board.neighbors("p0", 2).unwrap()), vec!["p0", "p1", "p2"]);
        assert_eq!(
            names(&board.neighbors("p3", 2).unwrap()),
            vec!["p1", "p2", "p3", "p4", "p5"]
        );
        assert_eq!(names(&board.neighbors("p5", 0).unwrap()), vec!["p5"]);
        assert_eq!(board.neighbors("p2", usize::MAX).unwrap().len(), 6);
    }

    #[test]
    fn test_clear_keeps_board() {
        let engine = seeded();
        engine
            .set_metadata("game", "A", Metadata::from([("k".to_string(), MetadataValue::Integer(1))]))
            .unwrap();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        engine.record_snapshot("game", "before clear", t0).unwrap();

        assert_eq!(engine.clear("game"), 3);
        assert_eq!(engine.clear("game"), 0);
        assert_eq!(engine.list_boards(), vec!["game".to_string()]);
        assert!(engine.top("game", 5).is_empty());
        assert!(engine.metadata("game", "A").unwrap_err().is_not_found());
        assert!(engine.profile("game", "A").unwrap_err().is_not_found());
        assert_eq!(engine.history("game", 10).len(), 1);
        assert!(engine.get_board("game").unwrap().data.read().validate().is_ok());
    }

    #[test]
    fn test_batch_insert_counts_new() {
        let engine = seeded();
        let batch = vec![("A".to_string(), 1), ("D".to_string(), 2), ("E".to_string(), 3)];
        assert_eq!(engine.batch_insert("game", &batch).unwrap(), 2);
        assert_eq!(engine.len("game"), 5);
        assert_eq!(engine.score("game", "A").unwrap(), 1);
    }

    #[test]
    fn test_batch_insert_rejects_invalid_id_atomically() {
        let engine = seeded();
        let batch = vec![("D".to_string(), 1), (String::new(), 2)];
        assert!(engine.batch_insert("game", &batch).is_err());
        assert_eq!(engine.len("game"), 3);
        assert!(engine.score("game", "D").is_err());
    }

    #[test]
    fn test_batch_insert_size_limit() {
        let engine = Engine::new();
        let batch: Vec<(String, i64)> = (0..=MAX_BATCH_SIZE).map(|i| (format!("p{}", i), 1)).collect();
        assert!(matches!(
            engine.batch_insert("b", &batch),
            Err(RankError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_trim_bottom() {
        let engine = seeded();
        let removed = engine.trim_bottom("game", 2).unwrap();
        assert_eq!(removed, vec!["C".to_string(), "A".to_string()]);
        assert_eq!(names(&engine.top("game", 10)), vec!["B"]);
        assert_eq!(engine.trim_bottom("game", 10).unwrap().len(), 1);
        assert!(engine.trim_bottom("game", 10).unwrap().is_empty());
    }

    // ── Metadata ───────────────────────────────────────────────────────

    #[test]
    fn test_metadata_merge() {
        let engine = seeded();
        engine
            .set_metadata(
                "game",
                "A",
                Metadata::from([("name".to_string(), MetadataValue::String("Alice".into()))]),
            )
            .unwrap();
        let merged = engine
            .set_metadata(
                "game",
                "A",
                Metadata::from([("level".to_string(), MetadataValue::Integer(3))]),
            )
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(engine.metadata("game", "A").unwrap(), merged);
        // Scored without metadata
        assert!(engine.metadata("game", "B").unwrap().is_empty());
        assert!(engine.metadata("game", "nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn test_metadata_limits() {
        let engine = Engine::new();
        let too_many: Metadata = (0..=MAX_METADATA_KEYS)
            .map(|i| (format!("k{}", i), MetadataValue::Boolean(true)))
            .collect();
        assert!(engine.set_metadata("b", "p", too_many).is_err());

        let huge = Metadata::from([(
            "blob".to_string(),
            MetadataValue::String("x".repeat(MAX_METADATA_BYTES)),
        )]);
        assert!(engine.set_metadata("b", "p", huge).is_err());
    }

    // ── Validation ─────────────────────────────────────────────────────

    #[test]
    fn test_invalid_arguments() {
        let engine = Engine::new();
        assert!(matches!(
            engine.insert("game", "", 1),
            Err(RankError::InvalidArgument(_))
        ));
        assert!(engine.insert("game", &"x".repeat(MAX_ENTITY_ID_LEN + 1), 1).is_err());
        assert!(engine.insert("bad name", "p", 1).is_err());
        assert!(engine.insert("../etc", "p", 1).is_err());
        assert!(engine.insert(&"b".repeat(MAX_BOARD_NAME_LEN + 1), "p", 1).is_err());
        assert!(engine.create_board("").is_err());
        // Rejected input must not leave a board behind
        assert!(engine.list_boards().is_empty());
    }

    #[test]
    fn test_validate_detects_map_mismatch() {
        let board = Board::new("v".into());
        board.insert("a", 1);
        let mut data = board.data.write();
        assert!(data.validate().is_ok());
        data.scores.insert("a".into(), 99);
        assert!(data.validate().is_err());
    }

    // ── Board lifecycle ────────────────────────────────────────────────

    #[test]
    fn test_create_delete_list() {
        let engine = Engine::new();
        assert!(engine.create_board("b2").unwrap());
        assert!(!engine.create_board("b2").unwrap());
        engine.insert("b1", "p", 1).unwrap();
        assert_eq!(engine.list_boards(), vec!["b1".to_string(), "b2".to_string()]);
        assert!(engine.delete_board("b1"));
        assert!(!engine.delete_board("b1"));
        assert_eq!(engine.list_boards(), vec!["b2".to_string()]);
    }

    #[test]
    fn test_snapshots_and_history() {
        let engine = seeded();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_003_600, 0).unwrap();
        engine.record_snapshot("game", "first", t0).unwrap();
        engine.insert("game", "D", 400).unwrap();
        let snap = engine.record_snapshot("game", "second", t1).unwrap();
        assert_eq!(snap.total_entities, 4);
        assert_eq!(snap.highest_score, Some(400));

        let history = engine.history("game", 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].description, "second");

        let report = engine.analytics("game");
        let growth = report.growth.unwrap();
        assert!((growth.entity_growth_pct - 100.0 / 3.0).abs() < 1e-9);

        assert!(matches!(
            engine.record_snapshot("missing", "", t0),
            Err(RankError::BoardNotFound(_))
        ));
    }

    #[test]
    fn test_stats() {
        let engine = seeded();
        let stats = engine.stats("game");
        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.highest, Some(200));
        assert_eq!(engine.stats("missing").total_entities, 0);
    }

    // ── WAL apply / replay ─────────────────────────────────────────────

    fn numbered(entries: Vec<WalEntry>) -> Vec<WalRecord> {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| WalRecord {
                seq: i as u64 + 1,
                entry,
            })
            .collect()
    }

    #[test]
    fn test_replay_reconstructs_state() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let records = numbered(vec![
            WalEntry::CreateBoard { name: "g".into() },
            WalEntry::Insert {
                board: "g".into(),
                entity: "a".into(),
                score: 10,
                at: t0,
            },
            WalEntry::Increment {
                board: "g".into(),
                entity: "a".into(),
                delta: 5,
                at: t0,
            },
            WalEntry::BatchInsert {
                board: "g".into(),
                entries: vec![("b".into(), 30), ("c".into(), 1)],
                at: t0,
            },
            WalEntry::TrimBottom {
                board: "g".into(),
                count: 1,
            },
            WalEntry::RecordSnapshot {
                board: "g".into(),
                description: "s".into(),
                taken_at: t0,
            },
            WalEntry::Remove {
                board: "g".into(),
                entity: "b".into(),
            },
            // Fails: board was never created
            WalEntry::RecordSnapshot {
                board: "ghost".into(),
                description: "".into(),
                taken_at: t0,
            },
        ]);
        let engine = Engine::new();
        assert_eq!(engine.replay_wal(&records), records.len() - 1);
        assert_eq!(pairs(&engine.top("g", 10)), vec![("a", 15)]);
        assert_eq!(engine.history("g", 10)[0].total_entities, 2);
        assert_eq!(engine.profile("g", "a").unwrap().games_played, 2);
    }

    #[test]
    fn test_replay_skips_records_already_in_snapshot() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let increment = |board: &str, delta| WalEntry::Increment {
            board: board.into(),
            entity: "p".into(),
            delta,
            at: t0,
        };
        let records = numbered(vec![
            increment("saved", 10),
            increment("fresh", 1),
            increment("saved", 5),
            increment("fresh", 2),
        ]);

        // "saved" was snapshotted after record 2, with p at 10.
        let saved = Board::new("saved".into());
        saved.insert_at("p", 10, t0);
        saved.mark_covered(2);
        let engine = Engine::from_boards(vec![saved]);

        assert_eq!(engine.replay_wal(&records), 3);
        assert_eq!(engine.score("saved", "p").unwrap(), 15);
        assert_eq!(engine.score("fresh", "p").unwrap(), 3);
        assert_eq!(engine.max_covered_seq(), 2);
    }

    #[test]
    fn test_replay_after_delete_recreates_board() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let old = Board::new("g".into());
        old.insert_at("gone", 1, t0);
        old.mark_covered(4);
        let engine = Engine::from_boards(vec![old]);

        let records = vec![
            WalRecord {
                seq: 5,
                entry: WalEntry::DeleteBoard { name: "g".into() },
            },
            WalRecord {
                seq: 6,
                entry: WalEntry::Insert {
                    board: "g".into(),
                    entity: "new".into(),
                    score: 2,
                    at: t0,
                },
            },
        ];
        assert_eq!(engine.replay_wal(&records), 2);
        assert_eq!(pairs(&engine.top("g", 10)), vec![("new", 2)]);
    }

    #[test]
    fn test_mark_covered_only_moves_forward() {
        let engine = seeded();
        engine.mark_covered(9);
        engine.mark_covered(3);
        assert_eq!(engine.max_covered_seq(), 9);
        assert_eq!(Engine::new().max_covered_seq(), 0);
    }

    #[test]
    fn test_replay_rebuilds_profiles_and_power_ups() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(1);
        let t2 = t0 + chrono::Duration::minutes(20);
        let live = Engine::new();
        live.insert_at("g", "a", 100, t0).unwrap();
        live.activate_power_up("g", "a", "double_points", t0).unwrap();
        live.increment_at("g", "a", 10, t1).unwrap();
        live.increment_at("g", "a", 10, t2).unwrap();
        assert_eq!(live.score("g", "a").unwrap(), 130);

        let records = numbered(vec![
            WalEntry::Insert {
                board: "g".into(),
                entity: "a".into(),
                score: 100,
                at: t0,
            },
            WalEntry::ActivatePowerUp {
                board: "g".into(),
                entity: "a".into(),
                power_up: "double_points".into(),
                at: t0,
            },
            WalEntry::Increment {
                board: "g".into(),
                entity: "a".into(),
                delta: 10,
                at: t1,
            },
            WalEntry::Increment {
                board: "g".into(),
                entity: "a".into(),
                delta: 10,
                at: t2,
            },
        ]);
        let replayed = Engine::new();
        assert_eq!(replayed.replay_wal(&records), 4);
        assert_eq!(replayed.score("g", "a").unwrap(), 130);
        assert_eq!(
            replayed.profile("g", "a").unwrap(),
            live.profile("g", "a").unwrap()
        );
    }

    // ── Profiles and power-ups ─────────────────────────────────────────

    #[test]
    fn test_profile_follows_score_writes() {
        let engine = Engine::new();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        engine.insert_at("g", "p", 100, t0).unwrap();
        engine.increment_at("g", "p", -30, t0).unwrap();
        engine
            .batch_insert_at("g", &[("p".to_string(), 200)], t0)
            .unwrap();

        let profile = engine.profile("g", "p").unwrap();
        assert_eq!(profile.games_played, 3);
        assert_eq!(profile.total_score_earned, 100 + 30 + 130);
        assert_eq!(profile.highest_score, Some(200));
        assert_eq!(profile.lowest_score, Some(70));
        assert_eq!(profile.joined_at, t0);
        let kinds: Vec<ActivityKind> = profile.recent(10).iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActivityKind::Batch, ActivityKind::Increment, ActivityKind::Set]
        );
        assert!(engine.profile("g", "nobody").unwrap_err().is_not_found());
        assert!(engine.profile("none", "p").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_and_trim_drop_profiles() {
        let engine = seeded();
        assert!(engine.remove("game", "A").unwrap());
        assert!(engine.profile("game", "A").is_err());
        engine.trim_bottom("game", 1).unwrap();
        assert!(engine.profile("game", "C").is_err());
        assert!(engine.profile("game", "B").is_ok());
        assert!(engine.get_board("game").unwrap().data.read().validate().is_ok());
    }

    #[test]
    fn test_power_up_scales_increment() {
        let engine = seeded();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let started = engine.activate_power_up("game", "A", "mega_boost", t0).unwrap();
        assert_eq!(started.expires_at, t0 + chrono::Duration::minutes(5));

        let t1 = t0 + chrono::Duration::minutes(1);
        assert_eq!(engine.preview_increment("game", "A", 10, t1).unwrap(), 130);
        let change = engine.increment_at("game", "A", 10, t1).unwrap();
        assert_eq!(change.score, 130);
        // Expired
        let change = engine
            .increment_at("game", "A", 10, t0 + chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(change.score, 140);
    }

    #[test]
    fn test_power_up_needs_scored_entity_and_known_id() {
        let engine = seeded();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(engine
            .activate_power_up("game", "nobody", "shield", t0)
            .unwrap_err()
            .is_not_found());
        assert!(engine
            .activate_power_up("missing", "A", "shield", t0)
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            engine.activate_power_up("game", "A", "warp", t0),
            Err(RankError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_boosted_overflow_applies_nothing() {
        let engine = Engine::new();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        engine.insert_at("g", "p", 1, t0).unwrap();
        engine.activate_power_up("g", "p", "mega_boost", t0).unwrap();
        assert!(engine.preview_increment("g", "p", i64::MAX / 2, t0).is_err());
        assert!(matches!(
            engine.increment_at("g", "p", i64::MAX / 2, t0),
            Err(RankError::InvalidArgument(_))
        ));
        assert_eq!(engine.score("g", "p").unwrap(), 1);
        assert_eq!(engine.profile("g", "p").unwrap().games_played, 1);
    }

    #[test]
    fn test_validate_detects_orphan_profile() {
        let board = Board::new("v".into());
        board.insert("a", 1);
        let mut data = board.data.write();
        let profile = data.profiles["a"].clone();
        data.profiles.insert("ghost".into(), profile);
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_deleted_board_handle_is_retired() {
        let engine = seeded();
        let stale = engine.get_board("game").unwrap();
        assert!(engine.delete_board("game"));
        assert!(stale.is_retired());

        // Engine writes never land in the retired board
        engine.insert("game", "Z", 5).unwrap();
        let live = engine.get_board("game").unwrap();
        assert!(!live.is_retired());
        assert_eq!(pairs(&live.top(10)), vec![("Z", 5)]);
        assert_eq!(stale.score("Z"), None);

        // Fallible writes through the stale handle are refused
        let err = stale.increment("A", 1).unwrap_err();
        assert!(matches!(err, RankError::BoardNotFound(_)));
        assert!(stale.set_metadata("A", Metadata::new()).is_err());
        let shield = powerups::find("shield").unwrap();
        assert!(stale.activate_power_up("A", shield, Utc::now()).is_err());
        assert_eq!(stale.score("A"), Some(100));
    }

    #[test]
    fn test_concurrent_delete_and_insert_stay_consistent() {
        let engine = Engine::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    engine.delete_board("churn");
                }
            });
            s.spawn(|| {
                for i in 0..200 {
                    engine.insert("churn", "last", i).unwrap();
                }
            });
        });
        if let Some(board) = engine.get_board("churn") {
            assert!(!board.is_retired());
            assert!(board.data.read().validate().is_ok());
        }
        engine.insert("churn", "after", 1).unwrap();
        assert_eq!(engine.score("churn", "after").unwrap(), 1);
    }

    // ── Concurrency ────────────────────────────────────────────────────

    #[test]
    fn test_concurrent_increments_are_additive() {
        let engine = Engine::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let engine = &engine;
                s.spawn(move || {
                    for i in 0..250 {
                        engine.increment("race", "shared", 1).unwrap();
                        engine.increment("race", &format!("own{}", t), i % 3).unwrap();
                    }
                });
            }
        });
        assert_eq!(engine.score("race", "shared").unwrap(), 2000);
        let board = engine.get_board("race").unwrap();
        assert!(board.data.read().validate().is_ok());
        assert_eq!(board.len(), 9);
    }

    #[test]
    fn test_readers_see_consistent_state() {
        let engine = seeded();
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..500 {
                    engine.insert("game", "A", i).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..500 {
                    let top = engine.top("game", 10);
                    assert_eq!(top.len(), 3);
                    for pair in top.windows(2) {
                        assert!(pair[0].score >= pair[1].score);
                    }
                }
            });
        });
    }

    // ── Properties ─────────────────────────────────────────────────────

    fn board_strategy() -> impl Strategy<Value = Vec<(u8, i64)>> {
        proptest::collection::vec((0u8..40, -20i64..20), 0..120)
    }

    fn load(entries: &[(u8, i64)]) -> Board {
        let board = Board::new("p".into());
        for (e, s) in entries {
            board.insert(&format!("e{:02}", e), *s);
        }
        board
    }

    proptest! {
        #[test]
        fn prop_rank_consistency(entries in board_strategy()) {
            let board = load(&entries);
            let all = board.top(usize::MAX);
            prop_assert_eq!(all.len(), board.len());
            for (i, entry) in all.iter().enumerate() {
                prop_assert_eq!(entry.rank, i);
                let ranked = board.rank(&entry.entity).unwrap();
                prop_assert_eq!(ranked.rank, i);
                prop_assert_eq!(ranked.score, entry.score);
            }
            for pair in all.windows(2) {
                prop_assert!(
                    pair[0].score > pair[1].score
                        || (pair[0].score == pair[1].score && pair[0].entity < pair[1].entity)
                );
            }
        }

        #[test]
        fn prop_range_matches_filter(entries in board_strategy(), a in -25i64..25, b in -25i64..25) {
            let board = load(&entries);
            let (min, max) = (a.min(b), a.max(b));
            let expected: Vec<RankedEntry> = board
                .top(usize::MAX)
                .into_iter()
                .filter(|e| e.score >= min && e.score <= max)
                .collect();
            prop_assert_eq!(board.range_by_score(min, max), expected);
        }

        #[test]
        fn prop_neighbors_window(entries in board_strategy(), pick in 0usize..200, radius in 0usize..6) {
            let board = load(&entries);
            let all = board.top(usize::MAX);
            prop_assume!(!all.is_empty());
            let center = &all[pick % all.len()];
            let window = board.neighbors(&center.entity, radius).unwrap();
            let lo = center.rank.saturating_sub(radius);
            let hi = (center.rank + radius + 1).min(all.len());
            prop_assert_eq!(window, all[lo..hi].to_vec());
        }
    }
}
