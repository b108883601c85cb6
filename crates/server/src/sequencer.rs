//! Write sequencing for the HTTP server.
//!
//! A mutation holds a [`WriteTicket`] from before its WAL append until after its
//! engine apply. Tickets on the same board are serialized, so per-board WAL order
//! equals apply order. Every ticket also shares the commit gate, which a
//! checkpoint takes exclusively: a snapshot never observes a write that is
//! logged but not yet applied.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

/// Held for the duration of one logged mutation.
pub struct WriteTicket {
    _board: OwnedMutexGuard<()>,
    _gate: OwnedRwLockReadGuard<()>,
}

/// Hands out per-board write tickets and exclusive checkpoint access.
#[derive(Default)]
pub struct WriteCoordinator {
    commit_gate: Arc<RwLock<()>>,
    boards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WriteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the right to mutate `board`.
    pub async fn acquire(&self, board: &str) -> WriteTicket {
        let gate = Arc::clone(&self.commit_gate).read_owned().await;
        let lock = {
            let mut boards = self.boards.lock();
            Arc::clone(boards.entry(board.to_string()).or_default())
        };
        WriteTicket {
            _board: lock.lock_owned().await,
            _gate: gate,
        }
    }

    /// Waits until no ticket is outstanding and blocks new ones until dropped.
    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.commit_gate).write_owned().await
    }

    /// Drops per-board locks nobody holds for boards not in `live`.
    pub fn prune(&self, live: &[String]) {
        self.boards
            .lock()
            .retain(|name, lock| Arc::strong_count(lock) > 1 || live.iter().any(|l| l == name));
    }

    /// Number of boards with a tracked lock.
    pub fn tracked_boards(&self) -> usize {
        self.boards.lock().len()
    }
}
