//! # FlowDeck Testkit
//!
//! Test utilities for the FlowDeck sync server.
//!
//! This crate provides:
//! - Fixtures: fixed timestamps, payload and operation builders, and a
//!   ready-made server over an in-memory store driven by a manual clock
//! - [`FlakyStore`], a store wrapper that injects failures on demand
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flowdeck_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn create_is_echoed() {
//!     let server = TestServer::new();
//!     let batch = SyncBatch::new(vec![create_op("local-1", blocker("a.com"), ts(0))]);
//!     let response = server.bulk_sync(batch).await;
//!     assert!(response.result(EntityKind::SiteBlocker).unwrap().created_for("local-1").is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod flaky;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::flaky::*;
    pub use crate::generators::*;
    pub use flowdeck_sync_protocol::*;
    pub use flowdeck_sync_server::{
        build_router, Clock, EntityStore, ManualClock, MemoryStore, Principal, ServerConfig,
        StoreError,
    };
}

pub use fixtures::*;
pub use flaky::*;
pub use generators::*;
