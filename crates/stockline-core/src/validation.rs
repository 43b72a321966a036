//! # Validation Module
//!
//! Field checks run before a command touches the store.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI collaborator                                              │
//! │  └── Immediate user feedback (empty fields, lengths)                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: ActionHandler::validate (stockline-sync)                     │
//! │  ├── Payload decoding (serde)                                          │
//! │  └── THIS MODULE: field rules                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote authority                                             │
//! │  └── Business rules we can't see offline → terminal failure            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A command rejected here produces no optimistic write and no mutation.
//!
//! ## Usage
//! ```rust
//! use stockline_core::validation::{validate_adjustment_delta, validate_product_id};
//!
//! validate_product_id(42).unwrap();
//! validate_adjustment_delta(-3).unwrap();
//! assert!(validate_adjustment_delta(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_ADJUSTMENT_DELTA, MAX_TEXT_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a server-assigned entity id (products, categories).
pub fn validate_product_id(id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "product_id".to_string(),
        });
    }
    Ok(())
}

/// Validates an action type identifier.
///
/// ## Rules
/// - Must not be empty
/// - Lowercase ASCII letters, digits and underscores only (`inventory_adjust`)
pub fn validate_action_type(action_type: &str) -> ValidationResult<()> {
    if action_type.is_empty() {
        return Err(ValidationError::Required {
            field: "action_type".to_string(),
        });
    }

    if !action_type
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "action_type".to_string(),
            reason: "must contain only lowercase letters, digits, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use stockline_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a stock adjustment delta.
///
/// ## Rules
/// - Must not be zero (a no-op adjustment is a UI bug)
/// - Absolute value must not exceed MAX_ADJUSTMENT_DELTA
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Stock Adjustment                                                       │
/// │                                                                         │
/// │  Operator counts shelf, enters delta: -3                               │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_adjustment_delta(-3) ← THIS FUNCTION                         │
/// │       │                                                                 │
/// │       ├── delta == 0?        → Error: "quantity must not be zero"      │
/// │       ├── |delta| > 9999?    → Error: out of range                     │
/// │       │                                                                 │
/// │       └── OK → optimistic apply + enqueue                              │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_adjustment_delta(delta: i64) -> ValidationResult<()> {
    if delta == 0 {
        return Err(ValidationError::MustBeNonZero {
            field: "quantity".to_string(),
        });
    }

    if delta.abs() > MAX_ADJUSTMENT_DELTA {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: -MAX_ADJUSTMENT_DELTA,
            max: MAX_ADJUSTMENT_DELTA,
        });
    }

    Ok(())
}

/// Validates loyalty points (never negative).
pub fn validate_loyalty_points(points: i64) -> ValidationResult<()> {
    if points < 0 {
        return Err(ValidationError::OutOfRange {
            field: "loyalty_points".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a required free-text field (customer name, adjustment reason).
pub fn validate_required_text(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    validate_optional_text(field, Some(value))
}

/// Validates an optional free-text field (notes).
pub fn validate_optional_text(field: &str, value: Option<&str>) -> ValidationResult<()> {
    match value {
        Some(v) if v.chars().count() > MAX_TEXT_LEN => Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LEN,
        }),
        _ => Ok(()),
    }
}

/// Validates an email address.
///
/// Only a shape check: one `@`, non-empty local part, a dot in the domain.
/// Deliverability is the remote authority's problem.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let email = email.trim();
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: reason.to_string(),
    };

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| invalid("missing @"))?;

    if local.is_empty() || domain.contains('@') {
        return Err(invalid("malformed address"));
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid("malformed domain"));
    }

    validate_optional_text("email", Some(email))
}

/// Validates a phone number.
///
/// ## Rules
/// - Digits plus `+`, spaces, hyphens and parentheses
/// - Between 7 and 15 digits
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let phone = phone.trim();

    if !phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must contain only digits and + - ( )".to_string(),
        });
    }

    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if !(7..=15).contains(&digits) {
        return Err(ValidationError::OutOfRange {
            field: "phone digits".to_string(),
            min: 7,
            max: 15,
        });
    }

    Ok(())
}

/// Validates a search query.
///
/// ## Returns
/// The trimmed query string. Empty is allowed (matches everything).
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }

    Ok(query.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_product_id() {
        assert!(validate_product_id(42).is_ok());
        assert!(validate_product_id(0).is_err());
        assert!(validate_product_id(-1).is_err());
    }

    #[test]
    fn test_validate_action_type() {
        assert!(validate_action_type("inventory_adjust").is_ok());
        assert!(validate_action_type("customer_create").is_ok());
        assert!(validate_action_type("").is_err());
        assert!(validate_action_type("Inventory-Adjust").is_err());
    }

    #[test]
    fn test_validate_adjustment_delta() {
        assert!(validate_adjustment_delta(-3).is_ok());
        assert!(validate_adjustment_delta(5).is_ok());
        assert!(validate_adjustment_delta(MAX_ADJUSTMENT_DELTA).is_ok());

        assert_eq!(
            validate_adjustment_delta(0),
            Err(ValidationError::MustBeNonZero {
                field: "quantity".to_string()
            })
        );
        assert!(validate_adjustment_delta(MAX_ADJUSTMENT_DELTA + 1).is_err());
        assert!(validate_adjustment_delta(-MAX_ADJUSTMENT_DELTA - 1).is_err());
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_required_text("name", "Ada Lovelace").is_ok());
        assert!(validate_required_text("name", "   ").is_err());
        assert!(validate_optional_text("notes", None).is_ok());
        assert!(validate_optional_text("notes", Some(&"x".repeat(MAX_TEXT_LEN + 1))).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("ada.example.com").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("ada@@example.com").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+1 (555) 123-4567").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("555-CALL-NOW").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_validate_search_query() {
        assert_eq!(validate_search_query("  cola ").unwrap(), "cola");
        assert!(validate_search_query(&"q".repeat(101)).is_err());
    }
}
