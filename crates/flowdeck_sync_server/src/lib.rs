//! # FlowDeck Sync Server
//!
//! Bulk sync reconciliation server for offline-first FlowDeck clients.
//!
//! This crate provides:
//! - HTTP endpoints (bulk sync, status, change feed, site-blocker bulk)
//! - Identity reconciliation between client ids and server ids
//! - Per-kind batch application with partial failure reporting
//! - Last-write-wins conflict resolution
//! - Authentication (HMAC-SHA256 bearer tokens)
//!
//! # Architecture
//!
//! Storage is a collaborator behind [`EntityStore`]; [`MemoryStore`] is the
//! bundled implementation. Every store call goes through [`Persistence`],
//! which applies a timeout and retries transient failures.
//!
//! A bulk sync request flows through:
//! 1. Validation of the wire batch into typed operations
//! 2. Grouping by entity kind, submission order kept inside a kind
//! 3. The `(user, kind)` lock scope from [`KeyedLocks`]
//! 4. [`IdentityReconciler`] to resolve references
//! 5. The conflict policy for updates
//! 6. The store, with failures recorded per operation
//!
//! # Change feed
//!
//! Every change is stamped with the strictly monotonic server [`Clock`].
//! Clients pull changes after the `serverTimestamp` of their previous
//! response; see [`FeedProvider`].
//!
//! # Authentication
//!
//! Authentication is optional but recommended for production:
//!
//! ```rust
//! use flowdeck_sync_server::{AuthConfig, Principal, ServerConfig, TokenValidator};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(&Principal::new("user-1", "laptop")).unwrap();
//! assert_eq!(validator.validate_token(&token).unwrap().user_id, "user-1");
//! # let _ = config;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod applier;
mod auth;
mod clock;
mod config;
mod error;
mod feed;
mod handler;
mod identity;
mod locks;
mod persistence;
mod routes;
mod server;
mod store;

pub use applier::OperationApplier;
pub use auth::{AuthConfig, Credentials, Principal, TokenValidator, DEV_SESSION_ID, DEV_USER_ID};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{PersistencePolicy, RetryConfig, ServerConfig};
pub use error::{ErrorBody, ServerError, ServerResult};
pub use feed::FeedProvider;
pub use handler::{HandlerContext, RequestHandler};
pub use identity::{IdentityError, IdentityReconciler, ResolvedRef};
pub use locks::{KeyedGuard, KeyedLocks, LockKey};
pub use persistence::Persistence;
pub use routes::{build_router, HealthResponse, SESSION_HEADER, USER_HEADER};
pub use server::SyncServer;
pub use store::{EntityStore, MemoryStore, NewEntity, StoreError, StoreResult};
