//! # Built-in Actions
//!
//! Action type identifiers and the typed payloads the UI submits for them.
//!
//! | Action type        | Payload               | Local effect              |
//! |--------------------|-----------------------|---------------------------|
//! | `inventory_adjust` | [`InventoryAdjustment`] | `AdjustStock`           |
//! | `customer_create`  | [`NewCustomer`]         | `Upsert(Customers)`     |
//!
//! New action types are added by registering a handler with the engine;
//! nothing in the store or the processor matches on these strings.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::Customer;
use crate::validation::{
    validate_adjustment_delta, validate_email, validate_optional_text, validate_phone,
    validate_product_id, validate_required_text, ValidationResult,
};

pub const INVENTORY_ADJUST: &str = "inventory_adjust";
pub const CUSTOMER_CREATE: &str = "customer_create";

// =============================================================================
// Inventory Adjustment
// =============================================================================

/// A stock correction for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryAdjustment {
    pub product_id: i64,

    /// Signed delta applied to the on-hand quantity.
    pub quantity: i64,

    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl InventoryAdjustment {
    pub fn new(product_id: i64, quantity: i64, reason: impl Into<String>) -> Self {
        Self {
            product_id,
            quantity,
            reason: reason.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validate_product_id(self.product_id)?;
        validate_adjustment_delta(self.quantity)?;
        validate_required_text("reason", &self.reason)?;
        validate_optional_text("notes", self.notes.as_deref())
    }

    /// Mutations touching the same product must reach the remote in order.
    pub fn ordering_key(&self) -> String {
        format!("inventory:{}", self.product_id)
    }
}

// =============================================================================
// New Customer
// =============================================================================

/// A customer created on this device.
///
/// `id` is generated client-side so the optimistic row and the queued
/// mutation refer to the same customer before the server assigns its own id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCustomer {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl NewCustomer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            email: None,
            phone: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        crate::validation::validate_uuid(&self.id)?;
        validate_required_text("name", &self.name)?;
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(phone) = &self.phone {
            validate_phone(phone)?;
        }
        Ok(())
    }

    /// The optimistic cache row for this customer.
    pub fn to_customer(&self) -> Customer {
        Customer {
            id: self.id.clone(),
            remote_id: None,
            name: self.name.trim().to_string(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            loyalty_points: 0,
        }
    }

    pub fn ordering_key(&self) -> String {
        format!("customer:{}", self.id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_validation() {
        assert!(InventoryAdjustment::new(42, -3, "damaged").validate().is_ok());
        assert!(InventoryAdjustment::new(42, 0, "damaged").validate().is_err());
        assert!(InventoryAdjustment::new(0, 5, "recount").validate().is_err());
        assert!(InventoryAdjustment::new(42, 5, "").validate().is_err());
    }

    #[test]
    fn test_adjustment_payload_shape() {
        let payload = serde_json::to_value(InventoryAdjustment::new(42, -3, "damaged")).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"product_id": 42, "quantity": -3, "reason": "damaged"})
        );
    }

    #[test]
    fn test_new_customer_to_row() {
        let customer = NewCustomer::new("  Ada  ").with_email("ada@example.com");
        assert!(customer.validate().is_ok());

        let row = customer.to_customer();
        assert_eq!(row.id, customer.id);
        assert_eq!(row.name, "Ada");
        assert!(!row.is_confirmed());
    }

    #[test]
    fn test_new_customer_rejects_bad_email() {
        let customer = NewCustomer::new("Ada").with_email("nope");
        assert!(customer.validate().is_err());
    }

    #[test]
    fn test_ordering_keys() {
        assert_eq!(InventoryAdjustment::new(42, 1, "x").ordering_key(), "inventory:42");
        let c = NewCustomer::new("Ada");
        assert_eq!(c.ordering_key(), format!("customer:{}", c.id));
    }
}
