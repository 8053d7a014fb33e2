//! FlowDeck CLI
//!
//! Runs the bulk sync server and mints bearer tokens for it.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP sync server
//! - `token` - Mint a bearer token for a user session

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// FlowDeck sync server tools.
#[derive(Parser)]
#[command(name = "flowdeck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP sync server
    Serve(commands::serve::ServeArgs),

    /// Mint a bearer token for a user session
    Token(commands::token::TokenArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await?,
        Commands::Token(args) => commands::token::run(args)?,
    }

    Ok(())
}
