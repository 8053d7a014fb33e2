//! Conflict resolution between incoming updates and stored state.

use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Last-write-wins decision.
///
/// Applies the incoming write when its timestamp is not older than the
/// stored version. Ties go to the incoming write so that clients with
/// coarse clocks still converge.
pub fn should_apply(incoming: DateTime<Utc>, stored_updated_at: DateTime<Utc>) -> bool {
    incoming >= stored_updated_at
}

/// Outcome of a conflict decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Apply the incoming write.
    ApplyIncoming,
    /// Discard the incoming write and report the stored version.
    KeepStored,
}

/// Policy for resolving update conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Newer timestamp wins; ties favor the incoming write.
    #[default]
    LastWriteWins,
    /// Incoming writes always win.
    ClientWins,
    /// Stored state always wins once it exists.
    ServerWins,
}

impl ConflictPolicy {
    /// Decides whether an incoming write replaces the stored version.
    pub fn resolve(
        &self,
        incoming: DateTime<Utc>,
        stored_updated_at: DateTime<Utc>,
    ) -> Resolution {
        let apply = match self {
            ConflictPolicy::LastWriteWins => should_apply(incoming, stored_updated_at),
            ConflictPolicy::ClientWins => true,
            ConflictPolicy::ServerWins => false,
        };
        if apply {
            Resolution::ApplyIncoming
        } else {
            Resolution::KeepStored
        }
    }

    /// Returns the configuration name of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriteWins => "last_write_wins",
            ConflictPolicy::ClientWins => "client_wins",
            ConflictPolicy::ServerWins => "server_wins",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" | "lww" => Ok(ConflictPolicy::LastWriteWins),
            "client_wins" => Ok(ConflictPolicy::ClientWins),
            "server_wins" => Ok(ConflictPolicy::ServerWins),
            other => Err(ProtocolError::invalid_field(
                "conflictPolicy",
                format!("unknown policy `{}`", other),
            )),
        }
    }
}
