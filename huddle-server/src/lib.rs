//! Library entrypoint for huddle-server so tests and other binaries can build
//! the router without going through the CLI.

pub mod auth;
pub mod cli;
pub mod config;
pub mod server;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::{
    cli::{Command, TokenArgs},
    config::ServerConfig,
};

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn mint_token(args: &TokenArgs) -> Result<()> {
    let token = auth::create_token(
        args.jwt_secret.as_bytes(),
        &args.sub,
        args.admin,
        args.audience.clone(),
        args.expires_in,
    )?;
    println!("{token}");
    Ok(())
}

/// Run huddle-server using CLI args (parsed by the caller).
pub async fn run_with_cli(cli: cli::Cli) -> Result<()> {
    match cli.command {
        Command::Serve(ref args) => {
            init_tracing(cli.verbose)?;
            let cfg = ServerConfig::from_args(args)?;
            server::serve(cfg).await
        }
        Command::Token(ref args) => mint_token(args),
    }
}
