//! Storage layer: boards, engine, write-ahead log, and disk persistence.
//!
//! Data lives in-memory in `Board` instances grouped by an `Engine`.
//! Durability is provided by a `SyncWriteAheadLog` (CRC32 + fsync) and
//! bincode snapshots (atomic temp-file + rename), combined in `DurableEngine`.

/// Board and engine data structures.
pub mod board;
/// Engine + WAL + snapshots with log-before-apply mutations.
pub mod durable;
/// Disk persistence: snapshot save/load with atomic writes.
pub mod persistence;
/// Write-Ahead Log with CRC32 checksums.
pub mod wal;

pub use board::{
    find_power_up, validate_board_name, validate_entity_id, validate_metadata, Board, BoardData,
    Engine,
};
pub use durable::DurableEngine;
pub use persistence::{load_all_boards, load_board, prune_snapshots, save_board};
pub use wal::{LogWriter, ReplayStats, SyncWriteAheadLog, WalEntry, WalRecord};
