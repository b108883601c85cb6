//! Synchronous Write-Ahead Log (WAL) for crash recovery.
//!
//! Every mutation is appended to the WAL before being applied in memory.
//! Each record is framed as `[u32 length BE][u32 CRC32 BE][bincode payload]`
//! and durably flushed with `fsync`. The payload is a [`WalRecord`]: the entry
//! plus a sequence number that keeps increasing across truncations, so a board
//! snapshot can state exactly which records it already contains.
//!
//! This is the synchronous variant used by the embeddable core (no tokio
//! dependency). The server's group-commit log shares the frame format and the
//! append path through [`LogWriter`] and [`read_entries`].

use crate::config::WAL_FILE_NAME;
use crate::entity::Metadata;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A single mutation entry in the write-ahead log.
///
/// Each variant is one engine operation and is replayed through
/// [`Engine::apply`](crate::storage::Engine::apply). Score writes carry the time
/// they were made, so activity and power-up expiry replay identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    /// Create an empty board.
    CreateBoard { name: String },
    /// Destroy a board and its history.
    DeleteBoard { name: String },
    /// Remove every entity, keeping the board.
    ClearBoard { name: String },
    /// Set an absolute score.
    Insert {
        board: String,
        entity: String,
        score: i64,
        at: DateTime<Utc>,
    },
    /// Add a signed delta to a score, before power-up effects.
    Increment {
        board: String,
        entity: String,
        delta: i64,
        at: DateTime<Utc>,
    },
    /// Remove one entity with its metadata and profile.
    Remove { board: String, entity: String },
    /// Upsert many scores atomically.
    BatchInsert {
        board: String,
        entries: Vec<(String, i64)>,
        at: DateTime<Utc>,
    },
    /// Remove the `count` lowest-ranked entities.
    TrimBottom { board: String, count: usize },
    /// Merge attributes into an entity's metadata.
    SetMetadata {
        board: String,
        entity: String,
        metadata: Metadata,
    },
    /// Append a history snapshot taken at `taken_at`.
    RecordSnapshot {
        board: String,
        description: String,
        taken_at: DateTime<Utc>,
    },
    /// Start a power-up for a scored entity.
    ActivatePowerUp {
        board: String,
        entity: String,
        power_up: String,
        at: DateTime<Utc>,
    },
}

impl WalEntry {
    /// Name of the board the entry mutates.
    pub fn board(&self) -> &str {
        match self {
            WalEntry::CreateBoard { name }
            | WalEntry::DeleteBoard { name }
            | WalEntry::ClearBoard { name } => name,
            WalEntry::Insert { board, .. }
            | WalEntry::Increment { board, .. }
            | WalEntry::Remove { board, .. }
            | WalEntry::BatchInsert { board, .. }
            | WalEntry::TrimBottom { board, .. }
            | WalEntry::SetMetadata { board, .. }
            | WalEntry::RecordSnapshot { board, .. }
            | WalEntry::ActivatePowerUp { board, .. } => board,
        }
    }

    /// Short operation label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WalEntry::CreateBoard { .. } => "create_board",
            WalEntry::DeleteBoard { .. } => "delete_board",
            WalEntry::ClearBoard { .. } => "clear",
            WalEntry::Insert { .. } => "insert",
            WalEntry::Increment { .. } => "increment",
            WalEntry::Remove { .. } => "remove",
            WalEntry::BatchInsert { .. } => "batch_insert",
            WalEntry::TrimBottom { .. } => "trim",
            WalEntry::SetMetadata { .. } => "set_metadata",
            WalEntry::RecordSnapshot { .. } => "snapshot",
            WalEntry::ActivatePowerUp { .. } => "power_up",
        }
    }
}

/// A logged entry with its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Strictly increasing, starting at 1. Never reused after truncation.
    pub seq: u64,
    pub entry: WalEntry,
}

/// Borrowed twin of [`WalRecord`]; serializes to the same bytes.
#[derive(Serialize)]
struct RecordRef<'a> {
    seq: u64,
    entry: &'a WalEntry,
}

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Number of entries successfully deserialized.
    pub success: usize,
    /// Number of entries skipped due to deserialization errors (CRC was valid).
    pub skipped: usize,
    /// Number of CRC mismatches encountered (replay stopped).
    pub crc_errors: usize,
    /// Whether replay was terminated by a truncated entry.
    pub truncated: bool,
    /// Highest sequence number read, 0 for an empty log.
    pub last_seq: u64,
}

impl ReplayStats {
    pub fn has_errors(&self) -> bool {
        self.skipped > 0 || self.crc_errors > 0 || self.truncated
    }
}

/// Append side of a log file: numbers records and makes each append all-or-nothing.
///
/// A failed append discards whatever it buffered and cuts the file back to its
/// previous length, so bytes of a rejected write can never reach disk with a later
/// successful one. If that rollback itself fails the writer refuses further
/// appends until [`truncate`](LogWriter::truncate).
#[derive(Debug)]
pub struct LogWriter {
    out: BufWriter<File>,
    path: PathBuf,
    last_seq: u64,
    broken: bool,
}

impl LogWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(open_append(path)?),
            path: path.to_path_buf(),
            last_seq: 0,
            broken: false,
        })
    }

    /// Sequence number of the last record written, or resumed from.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Continues numbering after `seq` if it is ahead of the writer.
    pub fn resume_after(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }

    /// Frames `entries` with consecutive sequence numbers, writes them in one go
    /// and fsyncs. Returns the sequence number of the last one.
    pub fn append<'a, I>(&mut self, entries: I) -> io::Result<u64>
    where
        I: IntoIterator<Item = &'a WalEntry>,
    {
        if self.broken {
            return Err(io::Error::other(
                "WAL is unusable after a failed rollback; checkpoint or restart",
            ));
        }
        let mut seq = self.last_seq;
        let mut framed = Vec::new();
        for entry in entries {
            seq += 1;
            framed.extend_from_slice(&frame_entry(seq, entry)?);
        }
        if framed.is_empty() {
            return Ok(self.last_seq);
        }

        // Buffer is always empty here, so the file length is the committed length.
        let committed = self.out.get_ref().metadata()?.len();
        let written = self
            .out
            .write_all(&framed)
            .and_then(|()| self.out.flush())
            .and_then(|()| self.out.get_ref().sync_all());
        match written {
            Ok(()) => {
                self.last_seq = seq;
                Ok(seq)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback(committed) {
                    tracing::error!(
                        path = %self.path.display(),
                        "WAL rollback failed, refusing further appends: {}",
                        rollback
                    );
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    /// Swaps in an empty buffer over the same file, returning the file handle
    /// whose unwritten bytes were dropped. Dropping a `BufWriter` would flush them.
    fn discard_buffer(&mut self) -> io::Result<File> {
        let fresh = BufWriter::new(self.out.get_ref().try_clone()?);
        let (file, _unwritten) = std::mem::replace(&mut self.out, fresh).into_parts();
        Ok(file)
    }

    /// Drops unwritten bytes and restores the file to `len`.
    fn rollback(&mut self, len: u64) -> io::Result<()> {
        let file = self.discard_buffer()?;
        file.set_len(len)?;
        file.sync_all()?;
        tracing::warn!(path = %self.path.display(), len, "WAL rolled back after failed append");
        Ok(())
    }

    /// Empties the file. Numbering continues where it was.
    pub fn truncate(&mut self) -> io::Result<()> {
        let file = self.discard_buffer()?;
        file.set_len(0)?;
        file.sync_all()?;
        self.broken = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Synchronous append-only write-ahead log with CRC32 integrity checks.
///
/// Thread-safe via `parking_lot::Mutex`. Each [`append`](SyncWriteAheadLog::append)
/// call serializes, writes, flushes, and fsyncs the entry to disk before returning.
pub struct SyncWriteAheadLog {
    /// Mutex-protected writer for the WAL file.
    writer: Mutex<LogWriter>,
    /// Write gate: freeze() takes exclusive, append() takes shared.
    write_gate: parking_lot::RwLock<()>,
    /// Path to WAL file (needed for replay/truncate).
    path: PathBuf,
}

impl SyncWriteAheadLog {
    /// Open or create the WAL file in append mode.
    pub fn new(data_dir: &str) -> io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = PathBuf::from(data_dir).join(WAL_FILE_NAME);
        let writer = LogWriter::open(&path)?;

        Ok(Self {
            writer: Mutex::new(writer),
            write_gate: parking_lot::RwLock::new(()),
            path,
        })
    }

    /// Append a WAL entry synchronously. Returns its sequence number.
    ///
    /// Serializes the entry, writes, flushes, and fsyncs to disk before returning.
    pub fn append(&self, entry: &WalEntry) -> io::Result<u64> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Appends several entries with a single fsync; all land or none do.
    pub fn append_all(&self, entries: &[WalEntry]) -> io::Result<u64> {
        let _gate = self.write_gate.read();
        self.writer.lock().append(entries)
    }

    /// Read all records from the WAL file sequentially, verifying CRC32 checksums.
    pub fn replay(&self) -> io::Result<(Vec<WalRecord>, ReplayStats)> {
        replay_file(&self.path)
    }

    /// Sequence number of the last appended record.
    pub fn last_seq(&self) -> u64 {
        self.writer.lock().last_seq()
    }

    /// Continues numbering after `seq` (at least the highest seq on disk or in a snapshot).
    pub fn resume_after(&self, seq: u64) {
        self.writer.lock().resume_after(seq);
    }

    /// Acquire an exclusive write gate, blocking all [`append`](SyncWriteAheadLog::append) calls.
    ///
    /// Hold the returned guard while performing snapshot + truncate.
    pub fn freeze(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    /// Truncate the WAL file, fsync, and reopen in append mode.
    pub fn truncate(&self) -> io::Result<()> {
        self.writer.lock().truncate()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Opens `path` for appending with owner-only permissions on unix.
pub fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Serialize a numbered WAL entry into its on-disk frame format:
/// `[u32 len BE][u32 crc32 BE][bincode payload]`.
pub fn frame_entry(seq: u64, entry: &WalEntry) -> io::Result<Vec<u8>> {
    let bytes = bincode::serialize(&RecordRef { seq, entry })
        .map_err(|e| io::Error::other(e.to_string()))?;
    let len = bytes.len() as u32;
    let crc = crc32fast::hash(&bytes);

    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}

/// Replays a WAL file. A missing file is an empty log.
pub fn replay_file(path: &Path) -> io::Result<(Vec<WalRecord>, ReplayStats)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok((Vec::new(), ReplayStats::default()))
        }
        Err(e) => return Err(e),
    };
    read_entries(BufReader::new(file))
}

/// Reads framed records until EOF.
///
/// Stops at the first CRC mismatch or truncated frame; skips frames whose CRC
/// is valid but whose payload does not decode.
pub fn read_entries<R: Read>(mut reader: R) -> io::Result<(Vec<WalRecord>, ReplayStats)> {
    let mut records = Vec::new();
    let mut stats = ReplayStats::default();
    let mut header_buf = [0u8; 8];

    loop {
        match reader.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_be_bytes([header_buf[0], header_buf[1], header_buf[2], header_buf[3]])
            as usize;
        let stored_crc =
            u32::from_be_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);
        let mut data = vec![0u8; len];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!("WAL truncated mid-entry, stopping replay");
                stats.truncated = true;
                break;
            }
            Err(e) => return Err(e),
        }
        let computed_crc = crc32fast::hash(&data);
        if computed_crc != stored_crc {
            tracing::warn!("WAL entry CRC mismatch, stopping replay");
            stats.crc_errors += 1;
            break;
        }
        match bincode::deserialize::<WalRecord>(&data) {
            Ok(record) => {
                stats.last_seq = stats.last_seq.max(record.seq);
                records.push(record);
                stats.success += 1;
            }
            Err(e) => {
                tracing::warn!("WAL entry deserialization failed, skipping: {}", e);
                stats.skipped += 1;
            }
        }
    }

    Ok((records, stats))
}
