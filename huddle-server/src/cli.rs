use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// CLI for the huddle activity server.
#[derive(Debug, Clone, Parser)]
#[command(name = "huddle-server", version, about = "Shared activities with live session fan-out")]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket server
    Serve(ServeArgs),
    /// Mint a bearer token for local use
    Token(TokenArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Listen address for HTTP/WS endpoints
    #[arg(long, env = "HUDDLE_ADDR", default_value = "127.0.0.1:8787")]
    pub listen_addr: String,

    /// YAML file with users and activities to load at startup
    #[arg(long, env = "HUDDLE_SEED")]
    pub seed: Option<PathBuf>,

    /// Half-width of the wall feed's time window, in days
    #[arg(long, env = "HUDDLE_WALL_DAYS", default_value_t = huddle_core::DEFAULT_WALL_DAYS)]
    pub wall_days: u32,

    /// Maximum number of fan-outs delivering at the same time
    #[arg(long, env = "HUDDLE_FANOUT_CONCURRENCY", default_value_t = huddle_core::DEFAULT_MAX_IN_FLIGHT)]
    pub fanout_concurrency: usize,

    /// Events buffered per session before new ones are dropped
    #[arg(long, env = "HUDDLE_SESSION_BUFFER", default_value_t = huddle_core::DEFAULT_SESSION_BUFFER)]
    pub session_buffer: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "HUDDLE_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,

    // ─────────────────────────────────────────────────────────────────────────
    // Auth options
    // ─────────────────────────────────────────────────────────────────────────

    /// Secret for signing/verifying user JWT tokens (HS256).
    #[arg(long, env = "HUDDLE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Expected JWT audience claim (optional).
    #[arg(long, env = "HUDDLE_AUTH_AUDIENCE")]
    pub auth_audience: Option<String>,

    /// Accepted clock skew when checking token expiry, in seconds.
    #[arg(long, env = "HUDDLE_AUTH_LEEWAY", default_value_t = 60)]
    pub auth_leeway_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct TokenArgs {
    /// User id to put in the `sub` claim
    pub sub: String,

    /// Grant the admin role
    #[arg(long)]
    pub admin: bool,

    /// Signing secret; must match the server's
    #[arg(long, env = "HUDDLE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Audience claim to embed
    #[arg(long, env = "HUDDLE_AUTH_AUDIENCE")]
    pub audience: Option<String>,

    /// Lifetime in seconds
    #[arg(long, default_value_t = 86_400)]
    pub expires_in: u64,
}
