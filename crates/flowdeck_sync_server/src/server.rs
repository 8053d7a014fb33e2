//! Main sync server.

use crate::clock::{Clock, MonotonicClock};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::routes::build_router;
use crate::store::{EntityStore, MemoryStore};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// The sync server.
///
/// Owns the request handler and exposes it over HTTP.
///
/// # Example
///
/// ```no_run
/// use flowdeck_sync_server::{ServerConfig, SyncServer};
///
/// # async fn run() -> flowdeck_sync_server::ServerResult<()> {
/// let server = SyncServer::new(ServerConfig::default())?;
/// server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await
/// # }
/// ```
pub struct SyncServer {
    handler: Arc<RequestHandler>,
}

impl SyncServer {
    /// Creates a server backed by an in-memory store.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let store = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        Self::with_store(config, store, clock)
    }

    /// Creates a server with an existing store.
    ///
    /// `store` must stamp its changes with `clock`.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> ServerResult<Self> {
        let context = Arc::new(HandlerContext::new(config, store, clock)?);
        Ok(Self {
            handler: Arc::new(RequestHandler::new(context)),
        })
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.handler.context().config
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.handler))
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config().bind_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        tracing::info!(
            %addr,
            auth = self.config().require_auth,
            policy = self.config().conflict_policy.as_str(),
            "sync server listening"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("sync server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::HealthResponse;

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.config().max_batch_operations, 500);
        let _router = server.router();
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(server.serve_on(listener, async {
            let _ = stop_rx.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /health HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, "ok");

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
