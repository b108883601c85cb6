//! Prometheus metrics recording and background collection.

use leaderboard_core::Engine;
use metrics::{counter, gauge, histogram};
use std::path::Path;
use std::time::Duration;

/// Records HTTP request metrics.
pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a write operation metric.
pub fn record_write_operation(board: &str, operation: &str) {
    counter!(
        "leaderboard_operations_total",
        "board" => board.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Records a read query metric.
pub fn record_query(board: &str, query: &str) {
    counter!(
        "leaderboard_queries_total",
        "board" => board.to_string(),
        "query" => query.to_string()
    )
    .increment(1);
}

/// Updates board-level Prometheus gauges.
pub fn update_board_metrics(engine: &Engine) {
    let boards = engine.boards.read();
    gauge!("leaderboard_boards_total").set(boards.len() as f64);
    for (name, board) in boards.iter() {
        let labels = [("board", name.clone())];
        gauge!("leaderboard_entities_total", &labels).set(board.len() as f64);
        gauge!("leaderboard_board_memory_bytes", &labels)
            .set(board.estimate_memory_bytes() as f64);
        if let Some(top) = board.top(1).first() {
            gauge!("leaderboard_top_score", &labels).set(top.score as f64);
        }
    }
}

/// Updates the `leaderboard_wal_size_bytes` gauge.
pub fn update_wal_metrics(wal_path: &Path) {
    if let Ok(meta) = std::fs::metadata(wal_path) {
        gauge!("leaderboard_wal_size_bytes").set(meta.len() as f64);
    }
}
