//! Async Write-Ahead Log (WAL) with group commit for the HTTP server.
//!
//! Uses tokio channels + a background task to batch multiple concurrent
//! appends into a single write + fsync cycle. Records are numbered and framed by
//! the core's [`LogWriter`], so either side can replay the other's file, and a
//! failed batch is cut back out of the file before any caller hears about it.

use leaderboard_core::config;
use leaderboard_core::storage::wal::{replay_file, LogWriter, WalEntry, WalRecord};
use leaderboard_core::storage::ReplayStats;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A request from a caller to append one or more entries.
struct GroupCommitRequest {
    entries: Vec<WalEntry>,
    /// Receives the sequence number of the request's last entry.
    result_tx: oneshot::Sender<io::Result<u64>>,
}

/// Async append-only write-ahead log with CRC32 integrity checks and group commit.
pub struct WriteAheadLog {
    submit_tx: mpsc::Sender<GroupCommitRequest>,
    write_gate: Arc<parking_lot::RwLock<()>>,
    path: PathBuf,
    writer: Arc<Mutex<LogWriter>>,
}

impl WriteAheadLog {
    /// Open or create the WAL file and spawn the background batch writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(data_dir: &str) -> io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        Self::open(PathBuf::from(data_dir).join(config::WAL_FILE_NAME))
    }

    fn open(path: PathBuf) -> io::Result<Self> {
        let writer = Arc::new(Mutex::new(LogWriter::open(&path)?));
        let write_gate = Arc::new(parking_lot::RwLock::new(()));

        let (submit_tx, submit_rx) = mpsc::channel::<GroupCommitRequest>(4096);

        let task_writer = Arc::clone(&writer);
        let task_gate = Arc::clone(&write_gate);
        tokio::spawn(async move {
            batch_writer_loop(submit_rx, task_writer, task_gate).await;
        });

        Ok(Self {
            submit_tx,
            write_gate,
            path,
            writer,
        })
    }

    /// Append a WAL entry using group commit. Resolves once the entry is fsynced.
    pub async fn append(&self, entry: &WalEntry) -> io::Result<u64> {
        self.submit(vec![entry.clone()]).await
    }

    /// Append several entries as one contiguous write, fsynced together.
    pub async fn append_all(&self, entries: &[WalEntry]) -> io::Result<u64> {
        self.submit(entries.to_vec()).await
    }

    async fn submit(&self, entries: Vec<WalEntry>) -> io::Result<u64> {
        let (result_tx, result_rx) = oneshot::channel();
        self.submit_tx
            .send(GroupCommitRequest { entries, result_tx })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "WAL batch writer stopped"))?;

        result_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "WAL batch result lost"))?
    }

    /// Read all records from the WAL file, verifying integrity.
    pub fn replay(&self) -> io::Result<(Vec<WalRecord>, ReplayStats)> {
        replay_file(&self.path)
    }

    /// Sequence number of the last record written.
    pub fn last_seq(&self) -> u64 {
        self.writer.lock().last_seq()
    }

    /// Continues numbering after `seq`; call once after replay, before serving.
    pub fn resume_after(&self, seq: u64) {
        self.writer.lock().resume_after(seq);
    }

    /// Freeze the WAL, blocking all flushes.
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

    /// Current file size in bytes, 0 if unreadable.
    pub fn size_bytes(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

/// Background task that batches WAL entries and writes them together.
async fn batch_writer_loop(
    mut rx: mpsc::Receiver<GroupCommitRequest>,
    writer: Arc<Mutex<LogWriter>>,
    write_gate: Arc<parking_lot::RwLock<()>>,
) {
    let max_batch = config::WAL_GROUP_COMMIT_MAX_BATCH;
    let max_wait = Duration::from_micros(config::WAL_GROUP_COMMIT_MAX_WAIT_US);
    let mut batch: Vec<GroupCommitRequest> = Vec::with_capacity(max_batch);

    loop {
        let first = match rx.recv().await {
            Some(req) => req,
            None => break,
        };
        batch.push(first);

        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(req) => batch.push(req),
                Err(_) => break,
            }
        }

        // Under contention, linger briefly so late arrivals share the fsync.
        if batch.len() > 1 && batch.len() < max_batch {
            let deadline = tokio::time::Instant::now() + max_wait;
            while batch.len() < max_batch {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(req)) => batch.push(req),
                    _ => break,
                }
            }
        }

        flush_batch(&mut batch, &writer, &write_gate);
    }
}

/// Write all entries in the batch, fsync once, and notify all callers.
///
/// On failure the writer rolls the file back, so none of the batch survives
/// into a later successful flush.
fn flush_batch(
    batch: &mut Vec<GroupCommitRequest>,
    writer: &Arc<Mutex<LogWriter>>,
    write_gate: &Arc<parking_lot::RwLock<()>>,
) {
    let _gate = write_gate.read();
    let mut w = writer.lock();
    let first_seq = w.last_seq() + 1;

    match w.append(batch.iter().flat_map(|req| req.entries.iter())) {
        Ok(_) => {
            metrics::counter!("leaderboard_wal_flushes_total").increment(1);
            metrics::histogram!("leaderboard_wal_batch_size").record(batch.len() as f64);
            let mut next = first_seq;
            for req in batch.drain(..) {
                next += req.entries.len() as u64;
                let _ = req.result_tx.send(Ok(next - 1));
            }
        }
        Err(e) => {
            metrics::counter!("leaderboard_wal_flush_failures_total").increment(1);
            tracing::error!(entries = batch.len(), "WAL flush failed, batch discarded: {}", e);
            for req in batch.drain(..) {
                let _ = req
                    .result_tx
                    .send(Err(io::Error::new(e.kind(), e.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn insert(entity: &str, score: i64) -> WalEntry {
        WalEntry::Insert {
            board: "g".into(),
            entity: entity.into(),
            score,
            at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::new(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(wal.append(&insert("a", 1)).await.unwrap(), 1);
        assert_eq!(
            wal.append_all(&[insert("b", 2), insert("c", 3)]).await.unwrap(),
            3
        );

        let (records, stats) = wal.replay().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(stats.success, 3);
        assert_eq!(stats.last_seq, 3);
        assert!(!stats.has_errors());
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Arc::new(WriteAheadLog::new(&dir.path().to_string_lossy()).unwrap());
        let mut handles = Vec::new();
        for i in 0..64 {
            let wal = Arc::clone(&wal);
            handles.push(tokio::spawn(async move {
                wal.append(&insert(&format!("p{}", i), i)).await
            }));
        }
        let mut seqs = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap().unwrap());
        }
        seqs.sort();
        assert_eq!(seqs, (1..=64).collect::<Vec<u64>>());
        let (records, _) = wal.replay().unwrap();
        assert_eq!(records.len(), 64);
        assert!(records.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_truncate_resets_file() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::new(&dir.path().to_string_lossy()).unwrap();
        wal.append(&insert("a", 1)).await.unwrap();
        assert!(wal.size_bytes() > 0);
        {
            let _gate = wal.freeze();
            wal.truncate().unwrap();
        }
        assert_eq!(wal.size_bytes(), 0);
        assert_eq!(wal.append(&insert("b", 2)).await.unwrap(), 2);
        assert_eq!(wal.replay().unwrap().0.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_after_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::new(&dir.path().to_string_lossy()).unwrap();
        wal.resume_after(10);
        assert_eq!(wal.append(&insert("a", 1)).await.unwrap(), 11);
        assert_eq!(wal.last_seq(), 11);
    }

    #[tokio::test]
    async fn test_readable_by_sync_log() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().to_string();
        {
            let wal = WriteAheadLog::new(&dir_str).unwrap();
            wal.append(&insert("a", 7)).await.unwrap();
        }
        let sync = leaderboard_core::storage::SyncWriteAheadLog::new(&dir_str).unwrap();
        let (records, _) = sync.replay().unwrap();
        assert!(matches!(&records[0].entry, WalEntry::Insert { score: 7, .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_flush_is_reported_to_every_caller() {
        // Every write to /dev/full fails with ENOSPC.
        let full = PathBuf::from("/dev/full");
        if !full.exists() {
            return;
        }
        let wal = match WriteAheadLog::open(full) {
            Ok(wal) => Arc::new(wal),
            Err(_) => return,
        };
        let mut handles = Vec::new();
        for i in 0..8 {
            let wal = Arc::clone(&wal);
            handles.push(tokio::spawn(async move {
                wal.append(&insert(&format!("p{}", i), i)).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_err());
        }
        assert_eq!(wal.last_seq(), 0);
    }
}
