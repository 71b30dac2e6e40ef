mod auth;
mod config;
mod error;
mod search;
mod server;
mod worker;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::auth::{TokenVerifier, DEFAULT_TOKEN_TTL};
use crate::config::Config;

#[derive(Parser)]
#[command(name = "search-gateway", version, about = "Problem search HTTP gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print a bearer token signed with JWT_SECRET
    IssueToken {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Lifetime in days (default 7)
        #[arg(long)]
        days: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("search_gateway=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::IssueToken {
            user_id,
            username,
            email,
            days,
        } => {
            let ttl = days
                .map(|d| Duration::from_secs(d * 24 * 60 * 60))
                .unwrap_or(DEFAULT_TOKEN_TTL);
            let verifier = TokenVerifier::new(config::jwt_secret_from_env()?);
            let token = verifier.issue(user_id, &username, &email, ttl)?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    info!("Starting Search Gateway...");

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: port={}, query_timeout={}ms",
        config.port,
        config.gateway.timeout_ms()
    );

    server::serve(config).await
}
