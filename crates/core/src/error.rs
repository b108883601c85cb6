//! Error taxonomy for engine operations.
//!
//! `NotFound` is an expected read-side outcome, `InvalidArgument` rejects malformed
//! input before anything is applied, and `Unavailable` reports a storage failure the
//! caller may retry.

use std::io;
use thiserror::Error;

/// Errors returned by [`Engine`](crate::storage::Engine) and the persistence adapter.
#[derive(Debug, Error)]
pub enum RankError {
    /// The entity is not present in the board.
    #[error("entity '{entity}' not found in board '{board}'")]
    NotFound { board: String, entity: String },

    /// The board does not exist (only for operations that require it).
    #[error("board '{0}' not found")]
    BoardNotFound(String),

    /// Malformed input: empty id, bad board name, score overflow, oversized batch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// WAL or snapshot I/O failed. The mutation was not applied.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl RankError {
    pub(crate) fn not_found(board: &str, entity: &str) -> Self {
        Self::NotFound {
            board: board.to_string(),
            entity: entity.to_string(),
        }
    }

    /// Returns `true` for the expected "absent" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::BoardNotFound(_))
    }
}

impl From<io::Error> for RankError {
    fn from(e: io::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Shorthand result type for engine operations.
pub type Result<T, E = RankError> = std::result::Result<T, E>;
