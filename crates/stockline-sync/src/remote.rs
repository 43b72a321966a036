//! # Remote Authority
//!
//! The system of record the engine replays mutations against.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       RemoteAuthority                                   │
//! │                                                                         │
//! │  submit(action_type, payload, client_mutation_id)                      │
//! │     Ok(Ack)            → mutation is Synced                            │
//! │     Err(retryable)     → stays Pending, retried with backoff           │
//! │     Err(!retryable)    → Failed, waits for the operator                │
//! │                                                                         │
//! │  fetch(table, filter)  → fresh rows for the read path                  │
//! │                                                                         │
//! │  The authority deduplicates on client_mutation_id: submitting the      │
//! │  same id twice changes server state once.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use stockline_core::{EntityBatch, EntityFilter, EntityTable};

// =============================================================================
// Acknowledgement
// =============================================================================

/// Successful response to a submitted mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ack {
    /// HTTP status (or an equivalent code from a non-HTTP authority).
    pub status: Option<u16>,

    /// Response body. Handlers read server-assigned ids from it.
    pub body: serde_json::Value,
}

impl Ack {
    pub fn new(body: serde_json::Value) -> Self {
        Self { status: None, body }
    }

    /// Reads an integer field (`id`, `customer_id`, ...) from the body.
    pub fn id_field(&self, field: &str) -> Option<i64> {
        self.body.get(field).and_then(|v| v.as_i64())
    }
}

// =============================================================================
// Remote Error
// =============================================================================

/// How a failed remote call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    /// Transient: network, timeout, 5xx, throttling.
    Retryable,

    /// The request itself is wrong. Sending it again won't help.
    Permanent,

    /// Credentials were rejected. Retried once the token is refreshed.
    ReauthRequired,
}

impl RetryClass {
    /// Classifies an HTTP status code.
    ///
    /// 409 is permanent: the authority already holds conflicting state for
    /// this entity and replaying the same payload will conflict again.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => RetryClass::ReauthRequired,
            408 | 423 | 425 | 429 => RetryClass::Retryable,
            500..=599 => RetryClass::Retryable,
            _ => RetryClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetryClass::Permanent)
    }
}

/// Error returned by a [`RemoteAuthority`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub class: RetryClass,

    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,

    pub message: String,
}

impl RemoteError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            class: RetryClass::Retryable,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: RetryClass::Permanent,
            status: None,
            message: message.into(),
        }
    }

    /// Builds an error from a non-success HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            class: RetryClass::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::retryable(format!("network: {}", message.into()))
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::retryable(format!("timed out after {}ms", after.as_millis()))
    }

    /// Whether the mutation should stay pending for another attempt.
    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "remote error ({}): {}", status, self.message),
            None => write!(f, "remote error: {}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

// =============================================================================
// Remote Authority Trait
// =============================================================================

/// The remote system of record.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Submits one mutation. Must be idempotent on `client_mutation_id`.
    async fn submit(
        &self,
        action_type: &str,
        payload: &serde_json::Value,
        client_mutation_id: &str,
    ) -> Result<Ack, RemoteError>;

    /// Fetches current rows of one table.
    async fn fetch(&self, table: EntityTable, filter: &EntityFilter)
        -> Result<EntityBatch, RemoteError>;
}
