//! huddle-server: shared activities with friend-scoped feeds and live
//! notification fan-out to connected sessions.

use anyhow::Result;
use clap::Parser;

use huddle_server::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    huddle_server::run_with_cli(Cli::parse()).await
}
