//! Scripted walk-through on a throwaway in-memory engine.

use crate::commands::CliResult;
use crate::display;
use leaderboard_core::Engine;
use std::fmt::Write;

const BOARD: &str = "game_leaderboard";

const PLAYERS: &[(&str, i64)] = &[
    ("Alice", 1500),
    ("Bob", 1200),
    ("Charlie", 1800),
    ("Diana", 1600),
    ("Eve", 1100),
];

const UPDATES: &[(&str, i64)] = &[("Bob", 300), ("Eve", 600)];

pub fn run() -> CliResult<String> {
    let engine = Engine::new();
    let mut out = String::from("🎮 Leaderboard demo\n\n");

    for (player, score) in PLAYERS {
        let change = engine.insert(BOARD, player, *score)?;
        out.push_str(&display::score_change(BOARD, &change));
    }
    out.push('\n');
    out.push_str(&display::top(BOARD, &engine.top(BOARD, PLAYERS.len())));

    let _ = writeln!(out, "\n🔄 Updating scores...");
    for (player, delta) in UPDATES {
        let change = engine.increment(BOARD, player, *delta)?;
        out.push_str(&display::score_change(BOARD, &change));
    }
    out.push('\n');
    out.push_str(&display::top(BOARD, &engine.top(BOARD, PLAYERS.len())));

    let _ = writeln!(out, "\n🔍 Player details:");
    for player in ["Alice", "Bob", "Eve"] {
        let entry = engine.rank(BOARD, player)?;
        let metadata = engine.metadata(BOARD, player)?;
        out.push_str(&display::player(BOARD, &entry, &metadata));
    }

    out.push('\n');
    out.push_str(&display::context(
        BOARD,
        "Bob",
        &engine.neighbors(BOARD, "Bob", 1)?,
    ));

    out.push('\n');
    out.push_str(&display::stats(BOARD, &engine.stats(BOARD)));

    let _ = writeln!(out, "\n✨ Demo completed");
    Ok(out)
}
