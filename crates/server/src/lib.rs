//! leaderboard-server - HTTP server for leaderboard.db.
//!
//! Provides the REST API, write sequencing, and the async group-commit WAL.
//! Ranking logic lives in `leaderboard-core`.

/// REST API layer: Axum router, HTTP handlers, models, auth, metrics.
pub mod api;
/// Per-board write tickets and the checkpoint gate.
pub mod sequencer;
/// Async Write-Ahead Log with group commit (tokio-based).
pub mod wal_async;
