//! # Error Types
//!
//! Domain-specific error types for stockline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockline-core errors (this file)                                     │
//! │  ├── CoreError        - Payload / state decoding failures              │
//! │  └── ValidationError  - Field-level validation failures                │
//! │                                                                         │
//! │  stockline-db errors (separate crate)                                  │
//! │  └── DbError          - Storage failures (always fatal to a command)   │
//! │                                                                         │
//! │  stockline-sync errors (separate crate)                                │
//! │  └── SyncError        - Engine, remote and config failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError::InvalidPayload         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while interpreting domain data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The mutation payload could not be decoded into the handler's type.
    ///
    /// ## When This Occurs
    /// - A payload was written by a newer client with a different shape
    /// - The UI passed a JSON value that doesn't match the action
    ///
    /// A mutation whose payload cannot be decoded is failed terminally;
    /// replaying it would produce the same error forever.
    #[error("Invalid payload for {action_type}: {reason}")]
    InvalidPayload { action_type: String, reason: String },

    /// A stored sync state string that doesn't map to a known state.
    #[error("Unknown sync state: {0}")]
    UnknownSyncState(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn invalid_payload(action_type: &str, reason: impl ToString) -> Self {
        Self::InvalidPayload {
            action_type: action_type.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is written, so an invalid command never produces
/// an optimistic write or a queued mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be zero.
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Invalid format (e.g., malformed email).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
