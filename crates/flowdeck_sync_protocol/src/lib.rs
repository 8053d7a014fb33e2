//! # FlowDeck Sync Protocol
//!
//! Bulk sync protocol types for FlowDeck.
//!
//! This crate provides:
//! - `EntityKind` and the typed `EntityPayload` union for every syncable entity
//! - `SyncOperation` / `SyncBatch` wire shapes and their boundary validation
//! - `BulkSyncResult` and per-operation failure reporting
//! - `ConflictPolicy` (last-write-wins by default)
//! - Feed, cursor and status types for incremental catch-up
//! - The site-blocker bulk payload
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod feed;
mod operation;
mod result;
mod site_blocker;

pub use conflict::{should_apply, ConflictPolicy, Resolution};
pub use entity::{
    EntityKind, EntityPayload, PomodoroTimer, SiteBlocker, SiteCategory, SoundLayer,
    SoundscapePreset,
};
pub use error::{ProtocolError, ProtocolResult};
pub use feed::{FeedCursor, FeedRequest, FeedResponse, KindFeed, KindStatus, StatusResponse};
pub use operation::{
    validate_client_id, Action, EntityRef, OperationKind, SyncBatch, SyncOperation,
    ValidatedBatch, ValidatedOperation, MAX_CLIENT_ID_LEN,
};
pub use result::{
    BulkSyncResponse, BulkSyncResult, ConflictReport, CreatedEntity, OperationError,
    OperationErrorCode, OperationFailure, SyncEntity,
};
pub use site_blocker::{BulkSyncPayload, CreateSiteBlockerInput, DeleteSiteBlockerInput};

/// Version of the bulk sync protocol.
pub const PROTOCOL_VERSION: u16 = 1;
