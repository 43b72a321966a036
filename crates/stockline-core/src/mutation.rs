//! # Mutation Record
//!
//! The durable, append-only record of one user intent.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mutation State Machine                            │
//! │                                                                         │
//! │   append ──► Pending ──mark_in_flight──► InFlight                      │
//! │                 ▲                          │                            │
//! │                 │   requeue (retryable)    │                            │
//! │                 ├──────────────────────────┤                            │
//! │                 │   recover_in_flight      │                            │
//! │                 │   (crash / dropped pass) │                            │
//! │                 │                          ├──success──► Synced         │
//! │                 │                          │                            │
//! │                 │                          └─terminal──► Failed(reason) │
//! │                 │                                           │           │
//! │                 └────────── retry_failed (operator) ────────┘           │
//! │                                                                         │
//! │   Synced and Failed are terminal for the processor. Only the operator  │
//! │   moves a Failed row, either back to Pending or out of the log.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Immutability
//! `client_id`, `action_type` and `payload` never change after append.
//! Replaying a mutation always produces the same remote call, which is what
//! lets the remote authority deduplicate on `client_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Mutation Id
// =============================================================================

/// Local sequence number of a mutation.
///
/// Strictly increasing in insertion order and never reused, so ordering by
/// id is ordering by creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[serde(transparent)]
#[ts(export)]
pub struct MutationId(pub i64);

impl MutationId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for MutationId {
    fn from(id: i64) -> Self {
        MutationId(id)
    }
}

// =============================================================================
// Mutation Status (stored column)
// =============================================================================

/// The `sync_state` column as stored.
///
/// The failure reason lives in its own column; [`Mutation::state`] joins
/// the two into a [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MutationStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Claimed by the running pass; the remote call may be outstanding.
    InFlight,
    /// Acknowledged by the remote authority.
    Synced,
    /// Rejected terminally; needs operator attention.
    Failed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::InFlight => "in_flight",
            MutationStatus::Synced => "synced",
            MutationStatus::Failed => "failed",
        }
    }

    /// Synced and Failed rows are never picked up by a pass.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationStatus::Synced | MutationStatus::Failed)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MutationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MutationStatus::Pending),
            "in_flight" => Ok(MutationStatus::InFlight),
            "synced" => Ok(MutationStatus::Synced),
            "failed" => Ok(MutationStatus::Failed),
            other => Err(CoreError::UnknownSyncState(other.to_string())),
        }
    }
}

// =============================================================================
// Sync State (rich view)
// =============================================================================

/// Sync state with the failure reason attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "state", rename_all = "snake_case")]
#[ts(export)]
pub enum SyncState {
    Pending,
    InFlight,
    Synced,
    Failed { reason: String },
}

// =============================================================================
// Mutation
// =============================================================================

/// A row of the mutation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Mutation {
    pub id: MutationId,

    /// Stable idempotency key sent to the remote authority (UUID v4).
    pub client_id: String,

    pub action_type: String,

    /// Canonical JSON text of the payload.
    pub payload: String,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    pub sync_state: MutationStatus,

    pub failure_reason: Option<String>,

    /// Dispatch attempts that ended in a retryable failure.
    pub attempts: i64,

    pub last_error: Option<String>,

    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Mutation {
    /// Joins the stored status and failure reason.
    pub fn state(&self) -> SyncState {
        match self.sync_state {
            MutationStatus::Pending => SyncState::Pending,
            MutationStatus::InFlight => SyncState::InFlight,
            MutationStatus::Synced => SyncState::Synced,
            MutationStatus::Failed => SyncState::Failed {
                reason: self.failure_reason.clone().unwrap_or_default(),
            },
        }
    }

    /// Parses the payload text.
    pub fn payload_json(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| CoreError::invalid_payload(&self.action_type, e))
    }

    /// Decodes the payload into an action's typed payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| CoreError::invalid_payload(&self.action_type, e))
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state == MutationStatus::Pending
    }

    /// True once a pass has started dispatching this mutation, even if no
    /// ack came back. The remote may already have applied it.
    pub fn dispatch_attempted(&self) -> bool {
        self.sync_state == MutationStatus::InFlight || self.last_attempt_at.is_some()
    }
}

/// Generates a fresh client mutation id.
pub fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Serializes a payload to its canonical text form.
///
/// `serde_json::Value` objects keep their keys sorted, so the same logical
/// payload always yields the same bytes.
pub fn canonical_payload(payload: &serde_json::Value) -> String {
    payload.to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(status: MutationStatus, reason: Option<&str>) -> Mutation {
        Mutation {
            id: MutationId(7),
            client_id: new_client_id(),
            action_type: "inventory_adjust".to_string(),
            payload: canonical_payload(&json!({"product_id": 42, "quantity": -3})),
            created_at: Utc::now(),
            sync_state: status,
            failure_reason: reason.map(str::to_string),
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
            synced_at: None,
        }
    }

    #[test]
    fn test_state_carries_failure_reason() {
        let m = sample(MutationStatus::Failed, Some("product 42 does not exist"));
        assert_eq!(
            m.state(),
            SyncState::Failed {
                reason: "product 42 does not exist".to_string()
            }
        );
        assert_eq!(sample(MutationStatus::InFlight, None).state(), SyncState::InFlight);
    }

    #[test]
    fn test_dispatch_attempted() {
        assert!(!sample(MutationStatus::Pending, None).dispatch_attempted());
        assert!(sample(MutationStatus::InFlight, None).dispatch_attempted());

        let mut requeued = sample(MutationStatus::Pending, None);
        requeued.last_attempt_at = Some(Utc::now());
        assert!(requeued.dispatch_attempted());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::InFlight,
            MutationStatus::Synced,
            MutationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MutationStatus>().unwrap(), status);
        }
        assert!("done".parse::<MutationStatus>().is_err());
    }

    #[test]
    fn test_canonical_payload_is_key_ordered() {
        let a = canonical_payload(&json!({"quantity": -3, "product_id": 42}));
        let b = canonical_payload(&json!({"product_id": 42, "quantity": -3}));
        assert_eq!(a, b);
        assert_eq!(a, r#"{"product_id":42,"quantity":-3}"#);
    }

    #[test]
    fn test_decode_reports_action_type() {
        let mut m = sample(MutationStatus::Pending, None);
        m.payload = "not json".to_string();
        let err = m.payload_json().unwrap_err();
        assert!(err.to_string().contains("inventory_adjust"));
    }

    #[test]
    fn test_mutation_id_ordering() {
        assert!(MutationId(3) < MutationId(4));
        assert_eq!(MutationId(3).to_string(), "#3");
    }
}
