//! # Sync Error Types
//!
//! Error types for the engine, the processor and configuration.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Remote      │  │       Command           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  RemoteRetryable│  │  UnknownAction          │ │
//! │  │  MissingDeviceId│  │  RemoteTerminal │  │  InvalidPayload         │ │
//! │  │  InvalidUrl     │  │                 │  │  Validation             │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Storage      │  │                Processor                    │  │
//! │  │                 │  │                                             │  │
//! │  │  StorageFatal   │  │  PassInProgress   ConcurrencyViolation      │  │
//! │  │  (every DbError)│  │  ShuttingDown                               │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use stockline_core::{CoreError, MutationId, MutationStatus, ValidationError};
use stockline_db::DbError;

use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every failure the engine reports.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured")]
    MissingDeviceId,

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// The local store failed. The calling command did not take effect.
    #[error("Local store error: {0}")]
    StorageFatal(#[from] DbError),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Transient remote failure; the work stays queued.
    #[error("Retryable {0}")]
    RemoteRetryable(RemoteError),

    /// The remote rejected the request for good.
    #[error("Terminal {0}")]
    RemoteTerminal(RemoteError),

    // =========================================================================
    // Command Errors
    // =========================================================================
    /// No handler is registered for the action type.
    #[error("No handler registered for action type '{0}'")]
    UnknownAction(String),

    /// The payload doesn't decode into the handler's type.
    #[error("Invalid payload for {action_type}: {reason}")]
    InvalidPayload { action_type: String, reason: String },

    /// The payload decoded but failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Processor Errors
    // =========================================================================
    /// Another pass is already draining the queue.
    #[error("A sync pass is already in progress")]
    PassInProgress,

    /// A mutation left the state the single drainer expected.
    #[error("Mutation {id} was {state} when the processor tried to claim it")]
    ConcurrencyViolation { id: MutationId, state: MutationStatus },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Failed to serialize a payload or body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        if err.is_retryable() {
            SyncError::RemoteRetryable(err)
        } else {
            SyncError::RemoteTerminal(err)
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidPayload {
                action_type,
                reason,
            } => SyncError::InvalidPayload {
                action_type,
                reason,
            },
            CoreError::Validation(v) => SyncError::Validation(v),
            other => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Builds an invalid payload error.
    pub fn invalid_payload(action_type: &str, reason: impl ToString) -> Self {
        SyncError::InvalidPayload {
            action_type: action_type.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the operation can be attempted again later.
    ///
    /// ## Retryable Errors
    /// - Transient remote failures (network, timeout, 5xx, throttling, auth)
    /// - A pass that was rejected because another one is draining
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteRetryable(_) | SyncError::PassInProgress)
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the error stops the current pass instead of failing a
    /// single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::StorageFatal(_) | SyncError::ConcurrencyViolation { .. }
        )
    }

    /// Returns true if a mutation that hit this error must be failed
    /// terminally instead of retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteTerminal(_)
                | SyncError::UnknownAction(_)
                | SyncError::InvalidPayload { .. }
                | SyncError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_routing() {
        let retry: SyncError = RemoteError::from_status(503, "busy").into();
        assert!(matches!(retry, SyncError::RemoteRetryable(_)));
        assert!(retry.is_retryable());
        assert!(!retry.is_terminal());

        let terminal: SyncError = RemoteError::from_status(422, "bad").into();
        assert!(matches!(terminal, SyncError::RemoteTerminal(_)));
        assert!(terminal.is_terminal());
    }

    #[test]
    fn test_core_error_mapping() {
        let err: SyncError = CoreError::invalid_payload("inventory_adjust", "missing field").into();
        assert!(matches!(err, SyncError::InvalidPayload { .. }));
        assert!(err.is_terminal());

        let err: SyncError = CoreError::Validation(ValidationError::MustBeNonZero {
            field: "quantity".into(),
        })
        .into();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::StorageFatal(DbError::PoolExhausted).is_fatal());
        assert!(SyncError::ConcurrencyViolation {
            id: MutationId(3),
            state: MutationStatus::Synced,
        }
        .is_fatal());
        assert!(!SyncError::UnknownAction("refund".into()).is_fatal());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::MissingDeviceId.is_config_error());
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(!SyncError::PassInProgress.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::ConcurrencyViolation {
            id: MutationId(7),
            state: MutationStatus::Synced,
        };
        assert!(err.to_string().contains("#7"));
        assert!(err.to_string().contains("synced"));
    }
}
