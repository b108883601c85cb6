//! Command-line definitions for the `leaderboard` tool.
//!
//! Every command except `demo` opens the data directory through a
//! `DurableEngine`, so changes are logged and survive restarts. `checkpoint`
//! folds the log into board snapshots; any command does so on its own once the
//! log outgrows `--checkpoint-wal-bytes`.

use clap::{Parser, Subcommand};
use leaderboard_core::config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "leaderboard",
    about = "Manage leaderboard.db data directories from the command line",
    version
)]
pub struct Cli {
    /// Data directory holding board snapshots and the write-ahead log
    #[arg(short, long, env = "LEADERBOARD_DATA_DIR", default_value = config::DEFAULT_DATA_DIR, global = true)]
    pub data_dir: String,

    /// Checkpoint after a command once the write-ahead log exceeds this many bytes (0 disables)
    #[arg(long, env = "LEADERBOARD_CHECKPOINT_WAL_BYTES", default_value_t = config::CLI_CHECKPOINT_WAL_BYTES, global = true)]
    pub checkpoint_wal_bytes: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a player with an absolute score
    Add {
        board: String,
        player: String,
        #[arg(allow_hyphen_values = true)]
        score: i64,
    },

    /// Add (or subtract) points from a player's score
    Update {
        board: String,
        player: String,
        #[arg(allow_hyphen_values = true)]
        increment: i64,
    },

    /// Overwrite a player's score
    Set {
        board: String,
        player: String,
        #[arg(allow_hyphen_values = true)]
        score: i64,
    },

    /// Show the top players
    Top {
        board: String,
        /// Number of players to show
        #[arg(short, long, default_value_t = config::DEFAULT_TOP_COUNT)]
        count: usize,
    },

    /// Show a player's rank, score, and the players around them
    Rank { board: String, player: String },

    /// Show the players within `radius` ranks of a player
    Around {
        board: String,
        player: String,
        #[arg(short, long, default_value_t = config::DEFAULT_NEIGHBOR_RADIUS)]
        radius: usize,
    },

    /// Show a player's activity, level, streaks, and running power-ups
    Profile {
        board: String,
        player: String,
        /// Number of recent activity records to show
        #[arg(short, long, default_value_t = config::DEFAULT_ACTIVITY_LIMIT)]
        activity: usize,
    },

    /// Activate a power-up for a player
    Boost {
        board: String,
        player: String,
        /// Power-up id, see `power-ups`
        power_up: String,
    },

    /// List the power-up catalogue
    PowerUps,

    /// Remove a player
    Remove { board: String, player: String },

    /// Remove every player from a board, keeping the board
    Clear {
        board: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete a board with its metadata and history
    Delete { board: String },

    /// Show board statistics
    Stats { board: String },

    /// Show percentiles, score distribution, and growth
    Analytics { board: String },

    /// List players with a score in `[min, max]`
    Range {
        board: String,
        #[arg(allow_hyphen_values = true)]
        min: i64,
        #[arg(allow_hyphen_values = true)]
        max: i64,
    },

    /// Load players from a JSON file
    ///
    /// Accepts `{"name": score, ...}` or `[{"name": ..., "score": ...}, ...]`.
    Load { board: String, file: PathBuf },

    /// Record a history snapshot of a board
    Snapshot {
        board: String,
        #[arg(short, long, default_value = "Manual snapshot")]
        description: String,
    },

    /// Show recorded history snapshots, newest first
    History {
        board: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Save all boards and truncate the write-ahead log
    Checkpoint,

    /// List boards with their sizes
    Boards,

    /// Run a scripted walk-through on a throwaway in-memory board
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_negative_increment() {
        let cli = Cli::try_parse_from(["leaderboard", "update", "g", "alice", "-50"]).unwrap();
        match cli.command {
            Commands::Update { increment, .. } => assert_eq!(increment, -50),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.data_dir, config::DEFAULT_DATA_DIR);
    }

    #[test]
    fn test_parse_top_count_and_data_dir() {
        let cli =
            Cli::try_parse_from(["leaderboard", "top", "g", "-c", "3", "--data-dir", "/tmp/x"])
                .unwrap();
        assert_eq!(cli.data_dir, "/tmp/x");
        assert!(matches!(cli.command, Commands::Top { count: 3, .. }));
    }

    #[test]
    fn test_parse_profile_and_boost() {
        let cli = Cli::try_parse_from(["leaderboard", "profile", "g", "alice", "-a", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Profile { activity: 3, .. }));
        assert_eq!(cli.checkpoint_wal_bytes, config::CLI_CHECKPOINT_WAL_BYTES);

        let cli = Cli::try_parse_from([
            "leaderboard",
            "boost",
            "g",
            "alice",
            "shield",
            "--checkpoint-wal-bytes",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.checkpoint_wal_bytes, 0);
        match cli.command {
            Commands::Boost { power_up, .. } => assert_eq!(power_up, "shield"),
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["leaderboard", "power-ups"]).is_ok());
    }

    #[test]
    fn test_rejects_non_numeric_score() {
        assert!(Cli::try_parse_from(["leaderboard", "add", "g", "alice", "lots"]).is_err());
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
