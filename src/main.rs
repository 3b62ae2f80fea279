//! Ibtikar CLI binary entry point.

use clap::Parser;
use ibtikar::cli::{exit_with, AuthCommands, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("IBTIKAR_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match ibtikar::cli::auth::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    let result = match cli.command {
        Commands::Auth(auth_args) => match auth_args.command {
            AuthCommands::Login(args) => ibtikar::cli::auth::handle_login(config, args.no_browser).await,
            AuthCommands::Status => ibtikar::cli::auth::handle_status(config).await,
            AuthCommands::Logout => ibtikar::cli::auth::handle_logout(config).await,
        },
        Commands::Posts(args) => ibtikar::cli::posts::handle_posts(config, args).await,
    };

    if let Err(e) = result {
        exit_with(&e);
    }
}
