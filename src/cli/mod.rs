//! CLI entry point for Ibtikar.

pub mod auth;
pub mod posts;

use clap::{Parser, Subcommand};

use crate::error::{ErrorCategory, IbtikarError};

/// Ibtikar CLI
#[derive(Parser, Debug)]
#[command(name = "ibtikar", version, about = "Ibtikar: sign in with X and browse analysed posts")]
pub struct Cli {
    /// Path to a config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authentication management
    Auth(AuthArgs),
    /// Show analysed posts for the signed-in account
    Posts(PostsArgs),
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Auth subcommands for login, status, and logout.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Sign in with X
    Login(LoginArgs),
    /// Show authentication status
    Status,
    /// Sign out and forget the stored session
    Logout,
}

/// Arguments for `ibtikar auth login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Print the sign-in URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

/// Arguments for `ibtikar posts`.
#[derive(Parser, Debug)]
pub struct PostsArgs {
    /// Number of posts to fetch (1-200)
    #[arg(short, long, default_value_t = crate::posts::DEFAULT_PAGE_SIZE)]
    pub limit: u32,

    /// Skip this many posts
    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Only show posts with this label (safe, harmful, unknown)
    #[arg(long)]
    pub label: Option<String>,

    /// Pull and classify the latest posts from X before listing
    #[arg(short, long)]
    pub refresh: bool,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Process exit code for a failed command (sysexits values where one fits).
pub fn exit_code(error: &IbtikarError) -> i32 {
    match error.category() {
        ErrorCategory::Configuration => 78,
        ErrorCategory::Authentication => 77,
        ErrorCategory::RateLimit
        | ErrorCategory::Network
        | ErrorCategory::Timeout
        | ErrorCategory::Server => 75,
        ErrorCategory::Api | ErrorCategory::Serialization | ErrorCategory::Unknown => 1,
    }
}

/// Print `error` with its recovery hint and exit.
pub fn exit_with(error: &IbtikarError) -> ! {
    eprintln!("Error: {error}");
    eprintln!("Hint: {}", error.recovery_suggestion().hint());
    std::process::exit(exit_code(error))
}
