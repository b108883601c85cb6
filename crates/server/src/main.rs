use clap::Parser;
use leaderboard_core::config;
use leaderboard_core::storage::load_all_boards;
use leaderboard_core::Engine;
use leaderboard_server::api::create_router;
use leaderboard_server::api::handlers::{self, AppState};
use leaderboard_server::api::metrics;
use leaderboard_server::wal_async::WriteAheadLog;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leaderboard-server", about = "In-memory leaderboard ranking server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "LEADERBOARD_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Data directory for persistence
    #[arg(short, long, env = "LEADERBOARD_DATA_DIR", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Maximum memory in MB (0 = unlimited)
    #[arg(long, env = "LEADERBOARD_MAX_MEMORY_MB", default_value_t = 0)]
    max_memory_mb: usize,

    /// Checkpoint interval in seconds (0 = disabled)
    #[arg(long, default_value_t = config::DEFAULT_SNAPSHOT_INTERVAL_SECS)]
    snapshot_interval: u64,

    /// Interval between scheduled history snapshots of every board, in seconds (0 = disabled)
    #[arg(long, default_value_t = config::DEFAULT_HISTORY_INTERVAL_SECS)]
    history_interval: u64,

    /// Graceful shutdown timeout in seconds
    #[arg(long, default_value_t = config::DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    shutdown_timeout: u64,

    /// Fail startup if WAL replay encounters errors (strict mode)
    #[arg(long, default_value_t = false)]
    wal_strict: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("leaderboard_server=info".parse()?)
                .add_directive("leaderboard_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.port == 0 {
        eprintln!("Error: port must be > 0");
        std::process::exit(1);
    }
    let data_path = std::path::Path::new(&args.data_dir);
    if data_path.exists() && !data_path.is_dir() {
        eprintln!(
            "Error: data_dir '{}' exists but is not a directory",
            args.data_dir
        );
        std::process::exit(1);
    }

    // Load existing board snapshots from disk
    let engine = match load_all_boards(&args.data_dir) {
        Ok(boards) => {
            for board in &boards {
                tracing::info!(board = %board.name(), entities = board.len(), "Restored leaderboard");
            }
            Engine::from_boards(boards)
        }
        Err(e) => {
            tracing::warn!("Could not load leaderboards: {}", e);
            Engine::new()
        }
    };

    // Initialize WAL and replay pending entries
    let wal = Arc::new(WriteAheadLog::new(&args.data_dir)?);
    let mut last_logged = 0;

    match wal.replay() {
        Ok((entries, stats)) => {
            last_logged = stats.last_seq;
            if stats.has_errors() {
                tracing::warn!(
                    "WAL replay stats: {} ok, {} skipped, {} CRC errors, truncated={}",
                    stats.success,
                    stats.skipped,
                    stats.crc_errors,
                    stats.truncated
                );
                if args.wal_strict {
                    eprintln!(
                        "Error: WAL replay encountered errors (strict mode). \
                         {} CRC errors, {} skipped, truncated={}. \
                         Fix the WAL or restart without --wal-strict.",
                        stats.crc_errors, stats.skipped, stats.truncated
                    );
                    std::process::exit(1);
                }
            }
            if !entries.is_empty() {
                tracing::info!("Replaying {} WAL entries", entries.len());
                let applied = engine.replay_wal(&entries);
                tracing::info!(
                    "WAL replay complete: {applied}/{} entries applied",
                    entries.len()
                );
            }
        }
        Err(e) => {
            if args.wal_strict {
                eprintln!(
                    "Error: WAL replay failed (strict mode): {}. \
                     Fix the WAL or restart without --wal-strict.",
                    e
                );
                std::process::exit(1);
            }
            tracing::warn!("WAL replay failed: {}", e);
        }
    }
    // New records must sort after both the log and every snapshot.
    wal.resume_after(last_logged.max(engine.max_covered_seq()));

    let api_key = std::env::var("LEADERBOARD_API_KEY").ok();
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::info!("No API key set, running in dev mode (no auth)");
    }

    let prometheus_handle =
        metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = AppState::new(
        engine.clone(),
        args.data_dir.clone(),
        wal.clone(),
        api_key,
        prometheus_handle,
        args.max_memory_mb * 1024 * 1024,
    );

    let app = create_router(state.clone());
    let addr = format!("0.0.0.0:{}", args.port);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        data_dir = %args.data_dir,
        max_memory_mb = args.max_memory_mb,
        snapshot_interval_secs = args.snapshot_interval,
        history_interval_secs = args.history_interval,
        boards = engine.boards.read().len(),
        entities = engine.total_entities(),
        "leaderboard.db ready"
    );

    // Spawn board metrics background task
    let metrics_engine = engine.clone();
    let metrics_wal_path = wal.path().to_path_buf();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            metrics::update_board_metrics(&metrics_engine);
            metrics::update_wal_metrics(&metrics_wal_path);
        }
    });

    // Spawn periodic checkpoint task
    if args.snapshot_interval > 0 {
        let snap_state = state.clone();
        let snap_interval = args.snapshot_interval;
        tracing::info!("Auto-checkpoints enabled every {}s", snap_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(snap_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                tracing::info!("Running periodic checkpoint...");
                if let Err(e) = handlers::checkpoint(&snap_state).await {
                    tracing::error!("Periodic checkpoint failed: {}", e);
                }
            }
        });
    }

    // Spawn scheduled history snapshot task
    if args.history_interval > 0 {
        let hist_state = state.clone();
        let hist_interval = args.history_interval;
        tracing::info!("Scheduled history snapshots every {}s", hist_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(hist_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                for name in hist_state.engine.list_boards() {
                    if let Err(e) =
                        handlers::record_history(&hist_state, &name, "Scheduled snapshot").await
                    {
                        tracing::warn!(board = %name, "Scheduled snapshot skipped: {:?}", e);
                    }
                }
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    flush_and_shutdown(&state, args.shutdown_timeout).await;

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}

/// Final checkpoint. On timeout or failure the WAL is kept for recovery.
async fn flush_and_shutdown(state: &AppState, timeout_secs: u64) {
    tracing::info!("All requests drained, flushing data...");
    let deadline = Duration::from_secs(timeout_secs);
    match tokio::time::timeout(deadline, handlers::checkpoint(state)).await {
        Ok(Ok(boards)) => tracing::info!(boards, "Saved all leaderboards on shutdown"),
        Ok(Err(e)) => {
            tracing::error!("Shutdown checkpoint failed, WAL preserved for recovery: {}", e)
        }
        Err(_) => tracing::error!(
            "Shutdown flush timeout ({}s) exceeded, WAL preserved for recovery",
            timeout_secs
        ),
    }
}
