mod cli;
mod commands;
mod demo;
mod display;

use clap::Parser;
use cli::Cli;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn confirm(prompt: &str) -> bool {
    print!("{}", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match commands::execute(
        &cli.data_dir,
        cli.command,
        cli.checkpoint_wal_bytes,
        &mut confirm,
    ) {
        Ok(output) => {
            print!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}
