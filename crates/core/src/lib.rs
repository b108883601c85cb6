//! # leaderboard-core
//!
//! Embeddable in-memory ranking engine. Boards map entity ids to integer scores
//! and answer rank, top-K, score-range, and neighbor queries in logarithmic time
//! through an order-statistics index.
//!
//! This is the core library crate with zero async dependencies. The HTTP server
//! and the command-line tool are thin layers over [`storage::Engine`].

/// Per-entity achievements derived from score and position.
pub mod achievements;
/// Board statistics: percentiles, distribution, and growth.
pub mod analytics;
/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Core entity types: `RankedEntry`, `ScoreChange`, and `MetadataValue`.
pub mod entity;
/// Error type shared by the engine and persistence layers.
pub mod error;
/// Bounded per-board snapshot history.
pub mod history;
/// Order-statistics index: size-augmented treap over `(score desc, entity asc)`.
pub mod index;
/// Time-limited power-ups and their effect on increments.
pub mod powerups;
/// Per-player activity statistics, experience, and streaks.
pub mod profile;
/// Storage layer: boards, engine, write-ahead log, and disk persistence.
pub mod storage;

pub use entity::{Metadata, MetadataValue, RankedEntry, ScoreChange};
pub use error::{RankError, Result};
pub use profile::PlayerProfile;
pub use storage::{Board, DurableEngine, Engine};
