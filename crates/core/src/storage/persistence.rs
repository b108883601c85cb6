//! Disk persistence for boards using bincode serialization.
//!
//! Boards are serialized to `<name>.board` files using bincode. Writes use
//! atomic temp-file + rename to prevent corruption on crash.
//! A CRC32 checksum is appended as a footer for integrity verification.

use crate::config::SNAPSHOT_EXTENSION;
use crate::storage::board::{Board, BoardData};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Magic bytes appended before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"LBR1";

/// Path of the snapshot file for `name` inside `dir`.
pub fn snapshot_path(dir: &str, name: &str) -> PathBuf {
    Path::new(dir).join(format!("{}.{}", name, SNAPSHOT_EXTENSION))
}

/// Save a board to disk using bincode serialization with atomic write.
/// Appends a CRC32 checksum footer: [magic "LBR1"][u32 CRC32 BE].
pub fn save_board(board: &Board, dir: &str) -> io::Result<()> {
    let data = board.data.read();
    let bytes = bincode::serialize(&*data).map_err(|e| io::Error::other(e.to_string()))?;
    let crc = crc32fast::hash(&bytes);

    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    let path = snapshot_path(dir, &data.name);
    let tmp_path = Path::new(dir).join(format!("{}.{}.tmp", data.name, SNAPSHOT_EXTENSION));

    // Write: [bincode payload][magic 4 bytes][CRC32 4 bytes BE]
    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    fs::write(&tmp_path, &output)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp_path, &path)?;

    tracing::info!(
        board = %data.name,
        entities = data.scores.len(),
        wal_seq = data.wal_seq,
        bytes = bytes.len(),
        "Saved board snapshot (CRC32={:#010x})",
        crc
    );
    Ok(())
}

/// Load a board from disk, verifying the CRC32 footer and internal invariants.
pub fn load_board(path: &Path) -> io::Result<Board> {
    let raw = fs::read(path)?;

    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Snapshot {:?} has no CRC32 footer", path),
        ));
    }
    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Snapshot CRC32 mismatch: expected {:#010x}, got {:#010x}. File may be corrupted: {:?}",
                stored_crc, computed_crc, path
            ),
        ));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored_crc);

    let data: BoardData = bincode::deserialize(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    data.validate().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot validation failed: {}", e),
        )
    })?;

    tracing::info!(
        board = %data.name,
        entities = data.scores.len(),
        "Loaded board snapshot"
    );

    Ok(Board::from_data(data))
}

/// Load all `.board` files from a directory. Unreadable files are skipped with a warning.
pub fn load_all_boards(dir: &str) -> io::Result<Vec<Board>> {
    let path = Path::new(dir);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut boards = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();
        if file_path.extension().and_then(|s| s.to_str()) == Some(SNAPSHOT_EXTENSION) {
            match load_board(&file_path) {
                Ok(board) => boards.push(board),
                Err(e) => {
                    tracing::warn!("Failed to load {:?}: {}", file_path, e);
                }
            }
        }
    }
    Ok(boards)
}

/// Removes a board's snapshot file if present.
pub fn remove_board_snapshot(dir: &str, name: &str) -> io::Result<()> {
    match fs::remove_file(snapshot_path(dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Deletes `.board` files whose board is not in `live`. Returns how many were removed.
pub fn prune_snapshots(dir: &str, live: &[String]) -> io::Result<usize> {
    let path = Path::new(dir);
    if !path.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(path)? {
        let file_path = entry?.path();
        if file_path.extension().and_then(|s| s.to_str()) != Some(SNAPSHOT_EXTENSION) {
            continue;
        }
        let Some(stem) = file_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !live.iter().any(|name| name == stem) {
            remove_board_snapshot(dir, stem)?;
            tracing::info!(board = %stem, "Removed snapshot of deleted board");
            removed += 1;
        }
    }
    Ok(removed)
}
