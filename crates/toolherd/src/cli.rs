use clap::Parser;
use std::path::PathBuf;

/// Event-driven tool supervisor: spawns configured child processes,
/// brokers line events between them, and restarts them under policy.
#[derive(Parser, Debug)]
#[command(name = "herd", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Lower the log threshold to DEBUG regardless of configuration.
    #[arg(long)]
    pub debug: bool,
}
