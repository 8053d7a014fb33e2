//! Token command implementation.
//!
//! Tokens carry their issue time; the server decides how long they live.

use clap::Args;
use flowdeck_sync_server::{AuthConfig, Principal, TokenValidator, DEV_SESSION_ID};

/// Options of the `token` command.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// User the token is issued to
    #[arg(long)]
    user: String,

    /// Session (device) of the user
    #[arg(long, default_value = DEV_SESSION_ID)]
    session: String,

    /// Shared secret the server validates tokens with
    #[arg(long, env = "FLOWDECK_AUTH_SECRET", hide_env_values = true)]
    secret: String,
}

fn mint(args: &TokenArgs) -> Result<String, Box<dyn std::error::Error>> {
    let config = AuthConfig::new(args.secret.as_bytes().to_vec());
    let principal = Principal::new(args.user.clone(), args.session.clone());
    Ok(TokenValidator::new(config).create_token(&principal)?)
}

/// Prints a bearer token for the given user session.
pub fn run(args: TokenArgs) -> Result<(), Box<dyn std::error::Error>> {
    let token = mint(&args)?;
    tracing::debug!(user = %args.user, session = %args.session, "minted token");
    println!("{}", token);
    Ok(())
}
