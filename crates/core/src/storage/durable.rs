//! Durable engine: an [`Engine`] backed by the synchronous WAL and board snapshots.
//!
//! Every mutation is validated, appended to the WAL (fsync), and only then applied
//! in memory. A single mutex serializes the append-then-apply pair so WAL order is
//! apply order. Reads go straight to the engine.
//!
//! Snapshots record the last WAL sequence number they contain, so a checkpoint that
//! fails halfway, or a crash between saving and truncating, never replays a record
//! into a board that already holds it.

use crate::config::MAX_BATCH_SIZE;
use crate::entity::{Metadata, ScoreChange};
use crate::error::{RankError, Result};
use crate::history::BoardSnapshot;
use crate::powerups::ActivePowerUp;
use crate::profile::PlayerProfile;
use crate::storage::board::{
    find_power_up, validate_board_name, validate_entity_id, validate_metadata, Board, Engine,
};
use crate::storage::persistence::{load_all_boards, prune_snapshots, save_board};
use crate::storage::wal::{ReplayStats, SyncWriteAheadLog, WalEntry};
use chrono::Utc;
use parking_lot::Mutex;

pub struct DurableEngine {
    engine: Engine,
    wal: SyncWriteAheadLog,
    data_dir: String,
    write_lock: Mutex<()>,
    replay_stats: ReplayStats,
}

impl DurableEngine {
    /// Loads all board snapshots from `data_dir`, then replays the WAL on top.
    pub fn open(data_dir: &str) -> Result<Self> {
        let engine = Engine::from_boards(load_all_boards(data_dir)?);
        let wal = SyncWriteAheadLog::new(data_dir)?;
        let (records, replay_stats) = wal.replay()?;
        if replay_stats.has_errors() {
            tracing::warn!(
                "WAL replay stats: {} ok, {} skipped, {} CRC errors, truncated={}",
                replay_stats.success,
                replay_stats.skipped,
                replay_stats.crc_errors,
                replay_stats.truncated
            );
        }
        if !records.is_empty() {
            let applied = engine.replay_wal(&records);
            tracing::info!("WAL replay complete: {applied}/{} entries applied", records.len());
        }
        wal.resume_after(replay_stats.last_seq.max(engine.max_covered_seq()));

        Ok(Self {
            engine,
            wal,
            data_dir: data_dir.to_string(),
            write_lock: Mutex::new(()),
            replay_stats,
        })
    }

    /// Read access to the in-memory engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    pub fn replay_stats(&self) -> &ReplayStats {
        &self.replay_stats
    }

    /// Logs `entry`, then runs `apply`. Both happen under the write lock.
    fn commit<T>(&self, entry: WalEntry, apply: impl FnOnce(&Engine) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        self.wal.append(&entry)?;
        apply(&self.engine)
    }

    pub fn insert(&self, board: &str, entity: &str, score: i64) -> Result<ScoreChange> {
        validate_board_name(board)?;
        validate_entity_id(entity)?;
        let at = Utc::now();
        let entry = WalEntry::Insert {
            board: board.to_string(),
            entity: entity.to_string(),
            score,
            at,
        };
        self.commit(entry, |e| e.insert_at(board, entity, score, at))
    }

    /// Adds `delta`, scaled by the entity's active power-ups.
    pub fn increment(&self, board: &str, entity: &str, delta: i64) -> Result<ScoreChange> {
        validate_board_name(board)?;
        validate_entity_id(entity)?;
        let _guard = self.write_lock.lock();
        let at = Utc::now();
        // State cannot change between this check and the apply below.
        self.engine.preview_increment(board, entity, delta, at)?;
        self.wal.append(&WalEntry::Increment {
            board: board.to_string(),
            entity: entity.to_string(),
            delta,
            at,
        })?;
        self.engine.increment_at(board, entity, delta, at)
    }

    /// Removes an entity. Absent entities are not logged.
    pub fn remove(&self, board: &str, entity: &str) -> Result<bool> {
        validate_entity_id(entity)?;
        let _guard = self.write_lock.lock();
        if self.engine.metadata(board, entity).is_err() {
            return Ok(false);
        }
        self.wal.append(&WalEntry::Remove {
            board: board.to_string(),
            entity: entity.to_string(),
        })?;
        self.engine.remove(board, entity)
    }

    pub fn batch_insert(&self, board: &str, entries: &[(String, i64)]) -> Result<usize> {
        validate_board_name(board)?;
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
        let at = Utc::now();
        let entry = WalEntry::BatchInsert {
            board: board.to_string(),
            entries: entries.to_vec(),
            at,
        };
        self.commit(entry, |e| e.batch_insert_at(board, entries, at))
    }

    pub fn trim_bottom(&self, board: &str, count: usize) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock();
        if self.engine.len(board) == 0 || count == 0 {
            return Ok(Vec::new());
        }
        self.wal.append(&WalEntry::TrimBottom {
            board: board.to_string(),
            count,
        })?;
        self.engine.trim_bottom(board, count)
    }

    pub fn set_metadata(&self, board: &str, entity: &str, attributes: Metadata) -> Result<Metadata> {
        validate_board_name(board)?;
        validate_entity_id(entity)?;
        validate_metadata(&attributes)?;
        let _guard = self.write_lock.lock();
        // The merged bag must fit too, or replay would reject the entry.
        let mut merged = self.engine.metadata(board, entity).unwrap_or_default();
        merged.extend(attributes.clone());
        validate_metadata(&merged)?;
        self.wal.append(&WalEntry::SetMetadata {
            board: board.to_string(),
            entity: entity.to_string(),
            metadata: attributes.clone(),
        })?;
        self.engine.set_metadata(board, entity, attributes)
    }

    /// Starts a power-up for a scored entity, effective from now.
    pub fn activate_power_up(
        &self,
        board: &str,
        entity: &str,
        power_up: &str,
    ) -> Result<ActivePowerUp> {
        validate_entity_id(entity)?;
        find_power_up(power_up)?;
        let _guard = self.write_lock.lock();
        self.engine.score(board, entity)?;
        let at = Utc::now();
        self.wal.append(&WalEntry::ActivatePowerUp {
            board: board.to_string(),
            entity: entity.to_string(),
            power_up: power_up.to_string(),
            at,
        })?;
        self.engine.activate_power_up(board, entity, power_up, at)
    }

    pub fn profile(&self, board: &str, entity: &str) -> Result<PlayerProfile> {
        self.engine.profile(board, entity)
    }

    pub fn clear(&self, board: &str) -> Result<usize> {
        let _guard = self.write_lock.lock();
        if self.engine.get_board(board).is_none() {
            return Ok(0);
        }
        self.wal.append(&WalEntry::ClearBoard {
            name: board.to_string(),
        })?;
        Ok(self.engine.clear(board))
    }

    pub fn create_board(&self, board: &str) -> Result<bool> {
        validate_board_name(board)?;
        let entry = WalEntry::CreateBoard {
            name: board.to_string(),
        };
        self.commit(entry, |e| e.create_board(board))
    }

    pub fn delete_board(&self, board: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.engine.get_board(board).is_none() {
            return Ok(false);
        }
        self.wal.append(&WalEntry::DeleteBoard {
            name: board.to_string(),
        })?;
        Ok(self.engine.delete_board(board))
    }

    /// Records a history snapshot stamped with the current time.
    pub fn record_snapshot(&self, board: &str, description: &str) -> Result<BoardSnapshot> {
        let _guard = self.write_lock.lock();
        if self.engine.get_board(board).is_none() {
            return Err(RankError::BoardNotFound(board.to_string()));
        }
        let taken_at = Utc::now();
        self.wal.append(&WalEntry::RecordSnapshot {
            board: board.to_string(),
            description: description.to_string(),
            taken_at,
        })?;
        self.engine.record_snapshot(board, description, taken_at)
    }

    /// Saves every board, removes snapshots of deleted boards, and truncates the WAL.
    ///
    /// Each snapshot is stamped with the last logged sequence number. The WAL is
    /// only truncated when every board saved. Returns the number of boards saved.
    pub fn checkpoint(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let _gate = self.wal.freeze();
        self.engine.mark_covered(self.wal.last_seq());

        let mut boards: Vec<(String, Board)> = self
            .engine
            .boards
            .read()
            .iter()
            .map(|(name, board)| (name.clone(), board.clone()))
            .collect();
        boards.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, board) in &boards {
            save_board(board, &self.data_dir).map_err(|e| {
                tracing::error!(board = %name, "Snapshot failed, WAL kept: {}", e);
                RankError::from(e)
            })?;
        }
        let live: Vec<String> = boards.iter().map(|(name, _)| name.clone()).collect();
        prune_snapshots(&self.data_dir, &live)?;
        self.wal.truncate()?;

        tracing::info!(boards = boards.len(), "Checkpoint complete, WAL truncated");
        Ok(boards.len())
    }

    /// Current WAL file size in bytes.
    pub fn wal_size_bytes(&self) -> u64 {
        std::fs::metadata(self.wal.path())
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::MetadataValue;

    fn open(dir: &tempfile::TempDir) -> DurableEngine {
        DurableEngine::open(&dir.path().to_string_lossy()).unwrap()
    }

    #[test]
    fn test_reopen_replays_wal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.insert("g", "a", 100).unwrap();
            db.increment("g", "a", 20).unwrap();
            db.batch_insert("g", &[("b".into(), 50), ("c".into(), 500)])
                .unwrap();
            db.remove("g", "c").unwrap();
            db.record_snapshot("g", "after batch").unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.replay_stats().success, 5);
        let engine = db.engine();
        assert_eq!(engine.score("g", "a").unwrap(), 120);
        assert_eq!(engine.len("g"), 2);
        assert_eq!(engine.history("g", 10).len(), 1);
    }

    #[test]
    fn test_checkpoint_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.insert("g", "a", 1).unwrap();
            db.set_metadata(
                "g",
                "a",
                Metadata::from([("name".to_string(), MetadataValue::String("Ann".into()))]),
            )
            .unwrap();
            assert_eq!(db.checkpoint().unwrap(), 1);
            assert_eq!(db.wal_size_bytes(), 0);
            db.insert("g", "b", 2).unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.replay_stats().success, 1);
        assert_eq!(db.engine().len("g"), 2);
        assert_eq!(db.engine().metadata("g", "a").unwrap().len(), 1);
    }

    #[test]
    fn test_deleted_board_stays_deleted_after_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.insert("keep", "a", 1).unwrap();
            db.insert("drop", "a", 1).unwrap();
            db.checkpoint().unwrap();
            assert!(db.delete_board("drop").unwrap());
            db.checkpoint().unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.engine().list_boards(), vec!["keep".to_string()]);
    }

    #[test]
    fn test_rejected_mutations_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        assert!(db.insert("g", "", 1).is_err());
        assert!(db.insert("bad/name", "a", 1).is_err());
        db.insert("g", "a", i64::MAX).unwrap();
        assert!(matches!(
            db.increment("g", "a", 1),
            Err(RankError::InvalidArgument(_))
        ));
        assert!(!db.remove("g", "nobody").unwrap());
        assert_eq!(db.clear("missing").unwrap(), 0);
        assert_eq!(db.wal.replay().unwrap().0.len(), 1);
    }

    #[test]
    fn test_clear_and_trim_are_durable() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            let batch: Vec<(String, i64)> = (0..10).map(|i| (format!("p{}", i), i)).collect();
            db.batch_insert("g", &batch).unwrap();
            assert_eq!(db.trim_bottom("g", 3).unwrap().len(), 3);
            db.insert("other", "x", 1).unwrap();
            assert_eq!(db.clear("other").unwrap(), 1);
        }
        let db = open(&dir);
        assert_eq!(db.engine().len("g"), 7);
        assert_eq!(db.engine().len("other"), 0);
        assert!(db.engine().list_boards().contains(&"other".to_string()));
    }

    // ── Checkpoint recovery ──

    #[test]
    fn test_failed_checkpoint_does_not_double_apply() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.increment("a", "p", 10).unwrap();
            db.increment("z", "q", 1).unwrap();
            // "a" saves first, then "z" cannot write its temp file.
            std::fs::create_dir(dir.path().join("z.board.tmp")).unwrap();
            assert!(db.checkpoint().is_err());
            assert!(db.wal_size_bytes() > 0);
        }
        let db = open(&dir);
        assert_eq!(db.engine().score("a", "p").unwrap(), 10);
        assert_eq!(db.engine().score("z", "q").unwrap(), 1);

        // Once the obstacle is gone the next checkpoint goes through.
        std::fs::remove_dir(dir.path().join("z.board.tmp")).unwrap();
        db.increment("a", "p", 1).unwrap();
        assert_eq!(db.checkpoint().unwrap(), 2);
        drop(db);
        let db = open(&dir);
        assert_eq!(db.engine().score("a", "p").unwrap(), 11);
        assert_eq!(db.engine().score("z", "q").unwrap(), 1);
    }

    #[test]
    fn test_wal_left_behind_by_checkpoint_is_not_reapplied() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join(crate::config::WAL_FILE_NAME);
        {
            let db = open(&dir);
            db.increment("g", "p", 10).unwrap();
            db.set_metadata(
                "g",
                "p",
                Metadata::from([("k".to_string(), MetadataValue::Integer(1))]),
            )
            .unwrap();
            let logged = std::fs::read(&wal_path).unwrap();
            db.checkpoint().unwrap();
            // As if the process died after saving but before truncating.
            std::fs::write(&wal_path, &logged).unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.engine().score("g", "p").unwrap(), 10);
        assert_eq!(db.profile("g", "p").unwrap().games_played, 1);

        db.increment("g", "p", 5).unwrap();
        drop(db);
        let db = open(&dir);
        assert_eq!(db.engine().score("g", "p").unwrap(), 15);
    }

    #[test]
    fn test_numbering_resumes_above_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.insert("g", "a", 1).unwrap();
            db.insert("g", "b", 2).unwrap();
            db.checkpoint().unwrap();
        }
        {
            // Empty WAL: numbering continues from the snapshot's coverage.
            let db = open(&dir);
            db.increment("g", "a", 10).unwrap();
            assert_eq!(db.wal.last_seq(), 3);
        }
        let db = open(&dir);
        assert_eq!(db.engine().score("g", "a").unwrap(), 11);
    }

    // ── Profiles and power-ups ──

    #[test]
    fn test_power_up_and_profile_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.insert("g", "a", 100).unwrap();
            db.activate_power_up("g", "a", "double_points").unwrap();
            assert_eq!(db.increment("g", "a", 25).unwrap().score, 150);
        }
        let db = open(&dir);
        assert_eq!(db.engine().score("g", "a").unwrap(), 150);
        let profile = db.profile("g", "a").unwrap();
        assert_eq!(profile.games_played, 2);
        assert_eq!(profile.power_ups.len(), 1);
        assert_eq!(profile.highest_score, Some(150));
    }

    #[test]
    fn test_power_up_rejections_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.insert("g", "a", 1).unwrap();
        assert!(db
            .activate_power_up("g", "nobody", "shield")
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            db.activate_power_up("g", "a", "warp"),
            Err(RankError::InvalidArgument(_))
        ));
        assert_eq!(db.wal.replay().unwrap().0.len(), 1);
    }
}
