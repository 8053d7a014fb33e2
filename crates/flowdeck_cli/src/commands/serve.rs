//! Serve command implementation.

use clap::Args;
use flowdeck_sync_protocol::ConflictPolicy;
use flowdeck_sync_server::{PersistencePolicy, RetryConfig, ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::time::Duration;

/// Options of the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "FLOWDECK_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Shared secret for bearer tokens; enables authentication
    #[arg(long, env = "FLOWDECK_AUTH_SECRET", hide_env_values = true)]
    auth_secret: Option<String>,

    /// Conflict policy (last_write_wins, client_wins, server_wins)
    #[arg(long, env = "FLOWDECK_CONFLICT_POLICY", default_value = "last_write_wins")]
    conflict_policy: ConflictPolicy,

    /// Maximum operations per batch
    #[arg(long, env = "FLOWDECK_MAX_BATCH_OPERATIONS", default_value_t = 500)]
    max_batch_operations: usize,

    /// Feed page size when the client sends no limit
    #[arg(long, env = "FLOWDECK_FEED_LIMIT", default_value_t = 100)]
    feed_limit: u32,

    /// Largest feed page a client may request
    #[arg(long, env = "FLOWDECK_MAX_FEED_LIMIT", default_value_t = 1000)]
    max_feed_limit: u32,

    /// Request timeout in seconds
    #[arg(long, env = "FLOWDECK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Timeout of a single store call in milliseconds
    #[arg(long, env = "FLOWDECK_STORE_TIMEOUT_MS", default_value_t = 5000)]
    store_timeout_ms: u64,

    /// Attempts per store call, the first one included
    #[arg(long, env = "FLOWDECK_STORE_ATTEMPTS", default_value_t = 3)]
    store_attempts: u32,
}

impl ServeArgs {
    fn into_config(self) -> ServerConfig {
        let persistence = PersistencePolicy::new(Duration::from_millis(self.store_timeout_ms))
            .with_retry(RetryConfig::new(self.store_attempts));

        let mut config = ServerConfig::new(self.bind)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_max_batch_operations(self.max_batch_operations)
            .with_feed_limits(self.feed_limit, self.max_feed_limit)
            .with_conflict_policy(self.conflict_policy)
            .with_persistence(persistence);
        if let Some(secret) = self.auth_secret {
            config = config.with_auth(secret.into_bytes());
        }
        config
    }
}

/// Runs the server until Ctrl-C.
pub async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config();
    if !config.require_auth {
        tracing::warn!("authentication disabled; identity is taken from request headers");
    }

    let server = SyncServer::new(config)?;
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[test]
    fn defaults() {
        let config = Harness::parse_from(["flowdeck"]).serve.into_config();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.max_batch_operations, 500);
        assert_eq!(config.conflict_policy, ConflictPolicy::LastWriteWins);
        assert!(!config.require_auth);
    }

    #[test]
    fn flags_map_onto_config() {
        let config = Harness::parse_from([
            "flowdeck",
            "--bind",
            "0.0.0.0:9000",
            "--auth-secret",
            "s3cret",
            "--conflict-policy",
            "server_wins",
            "--max-feed-limit",
            "50",
            "--store-attempts",
            "1",
        ])
        .serve
        .into_config();

        assert_eq!(config.bind_addr.port(), 9000);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret.as_deref(), Some(&b"s3cret"[..]));
        assert_eq!(config.conflict_policy, ConflictPolicy::ServerWins);
        assert_eq!(config.max_feed_limit, 50);
        assert_eq!(config.persistence.retry.max_attempts, 1);
    }

    #[test]
    fn rejects_unknown_policy() {
        let result = Harness::try_parse_from(["flowdeck", "--conflict-policy", "newest"]);
        assert!(result.is_err());
    }
}
