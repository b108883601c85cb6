//! Global configuration constants for leaderboard.db.
//!
//! All input validation limits, history sizes, and server defaults are defined here.
//! These are compile-time constants; runtime configuration is handled via CLI arguments
//! and environment variables in the binaries.

/// Maximum length of a board name in characters.
pub const MAX_BOARD_NAME_LEN: usize = 128;

/// Maximum length of an entity id in bytes.
pub const MAX_ENTITY_ID_LEN: usize = 256;

/// Maximum number of entries returned by a single top / page / range query.
pub const MAX_TOP_COUNT: usize = 1_000;

/// Default number of entries for top queries when the caller does not specify one.
pub const DEFAULT_TOP_COUNT: usize = 10;

/// Maximum neighbor radius (entries above and below the target).
pub const MAX_NEIGHBOR_RADIUS: usize = 50;

/// Default neighbor radius. A radius of 2 yields a window of five entries.
pub const DEFAULT_NEIGHBOR_RADIUS: usize = 2;

/// Maximum number of entries per batch insert request.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Maximum number of metadata keys per entity.
pub const MAX_METADATA_KEYS: usize = 32;

/// Maximum total serialized size of an entity's metadata in bytes (16 KB).
pub const MAX_METADATA_BYTES: usize = 16_384;

/// Number of history snapshots retained per board (newest first).
pub const MAX_HISTORY_SNAPSHOTS: usize = 50;

/// Activity records kept per player profile (newest first).
pub const MAX_RECENT_ACTIVITY: usize = 100;

/// Default number of activity records returned with player stats.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 10;

/// Number of top entries captured in each history snapshot.
pub const SNAPSHOT_TOP_ENTRIES: usize = 10;

/// Number of equal-width buckets in the score distribution.
pub const DISTRIBUTION_BUCKETS: usize = 10;

/// Default HTTP server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default directory for WAL and snapshot files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// File name of the write-ahead log inside the data directory.
pub const WAL_FILE_NAME: &str = "wal.bin";

/// Extension of board snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "board";

/// WAL size past which the CLI checkpoints after a command (4 MB).
pub const CLI_CHECKPOINT_WAL_BYTES: u64 = 4 * 1024 * 1024;

/// Default interval (in seconds) between automatic checkpoints. 0 = disabled.
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;

/// Default interval (in seconds) between automatic history snapshots. 0 = disabled.
pub const DEFAULT_HISTORY_INTERVAL_SECS: u64 = 3_600;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global rate limit in requests per second.
pub const RATE_LIMIT_RPS: u64 = 1_000;

/// Maximum HTTP request body size in bytes (4 MB).
pub const MAX_REQUEST_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Maximum number of concurrent in-flight requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 512;

/// Maximum entries per WAL group commit batch before forcing a flush.
pub const WAL_GROUP_COMMIT_MAX_BATCH: usize = 128;

/// Maximum wait time (microseconds) to accumulate WAL entries before flushing.
pub const WAL_GROUP_COMMIT_MAX_WAIT_US: u64 = 1000;
