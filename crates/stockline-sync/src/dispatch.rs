//! # Action Handlers
//!
//! Each action type the engine accepts has one registered handler. The
//! handler owns everything action-specific: payload validation, the
//! optimistic local effects, the ordering key and what to do with the ack.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ActionRegistry                                   │
//! │                                                                         │
//! │  "inventory_adjust" ──► InventoryAdjustHandler                         │
//! │                          effects: AdjustStock{product_id, delta}       │
//! │                          key:     inventory:{product_id}               │
//! │                                                                         │
//! │  "customer_create"  ──► CustomerCreateHandler                          │
//! │                          effects: Upsert(Customers[row])               │
//! │                          key:     customer:{id}                        │
//! │                          ack:     LinkCustomer{id, remote id}          │
//! │                                                                         │
//! │  anything else      ──► UnknownAction (rejected at enqueue,            │
//! │                          failed terminally if found in the log)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use stockline_core::{
    EntityBatch, InventoryAdjustment, LocalEffect, Mutation, NewCustomer,
    CUSTOMER_CREATE, INVENTORY_ADJUST,
};

use crate::error::{SyncError, SyncResult};
use crate::remote::{Ack, RemoteAuthority, RemoteError};

/// Decodes a payload into an action's typed form.
pub fn decode_payload<T: DeserializeOwned>(action_type: &str, payload: &serde_json::Value) -> SyncResult<T> {
    T::deserialize(payload).map_err(|e| SyncError::invalid_payload(action_type, e))
}

// =============================================================================
// Handler Trait
// =============================================================================

/// Behaviour of one action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> &'static str;

    /// Validates the payload and returns its optimistic local writes.
    ///
    /// Called at enqueue time (an error rejects the command before anything
    /// is written) and when the read path rebases unconfirmed work.
    fn local_effects(&self, payload: &serde_json::Value) -> SyncResult<Vec<LocalEffect>>;

    /// Checks a stored payload before it is dispatched.
    fn validate(&self, payload: &serde_json::Value) -> SyncResult<()> {
        self.local_effects(payload).map(|_| ())
    }

    /// Mutations sharing a key are never replayed out of creation order.
    fn ordering_key(&self, _payload: &serde_json::Value) -> Option<String> {
        None
    }

    /// Sends the mutation to the remote authority.
    async fn dispatch(
        &self,
        remote: &dyn RemoteAuthority,
        mutation: &Mutation,
        payload: &serde_json::Value,
    ) -> Result<Ack, RemoteError> {
        remote
            .submit(&mutation.action_type, payload, &mutation.client_id)
            .await
    }

    /// Local writes derived from a successful ack, applied together with
    /// marking the mutation synced.
    fn ack_effects(&self, _payload: &serde_json::Value, _ack: &Ack) -> SyncResult<Vec<LocalEffect>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Handler table keyed by action type.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in inventory and customer handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(InventoryAdjustHandler);
        registry.register(CustomerCreateHandler);
        registry
    }

    /// Registers a handler, replacing any previous one for its action type.
    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) -> &mut Self {
        let action_type = handler.action_type().to_string();
        if self.handlers.insert(action_type.clone(), Arc::new(handler)).is_some() {
            debug!(action_type = %action_type, "Replaced action handler");
        }
        self
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered action types, sorted.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Looks up the handler or fails with `UnknownAction`.
    pub fn require(&self, action_type: &str) -> SyncResult<&Arc<dyn ActionHandler>> {
        self.get(action_type)
            .ok_or_else(|| SyncError::UnknownAction(action_type.to_string()))
    }

    /// Optimistic local effects of a stored mutation, used to rebase
    /// unconfirmed work onto refreshed rows.
    ///
    /// A mutation whose handler is gone or whose payload no longer decodes
    /// contributes nothing.
    pub fn effects_of(&self, mutation: &Mutation) -> Vec<LocalEffect> {
        let Some(handler) = self.get(&mutation.action_type) else {
            return Vec::new();
        };
        let computed = mutation
            .payload_json()
            .map_err(SyncError::from)
            .and_then(|payload| handler.local_effects(&payload));
        match computed {
            Ok(effects) => effects,
            Err(e) => {
                warn!(id = %mutation.id, ?e, "Skipping mutation in rebase");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}

// =============================================================================
// Built-in Handlers
// =============================================================================

/// `inventory_adjust`: a signed stock delta for one product.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryAdjustHandler;

#[async_trait]
impl ActionHandler for InventoryAdjustHandler {
    fn action_type(&self) -> &'static str {
        INVENTORY_ADJUST
    }

    fn local_effects(&self, payload: &serde_json::Value) -> SyncResult<Vec<LocalEffect>> {
        let adjustment: InventoryAdjustment = decode_payload(INVENTORY_ADJUST, payload)?;
        adjustment.validate()?;
        Ok(vec![LocalEffect::AdjustStock {
            product_id: adjustment.product_id,
            delta: adjustment.quantity,
        }])
    }

    fn ordering_key(&self, payload: &serde_json::Value) -> Option<String> {
        decode_payload::<InventoryAdjustment>(INVENTORY_ADJUST, payload)
            .ok()
            .map(|a| a.ordering_key())
    }
}

/// `customer_create`: a customer created offline under a client id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerCreateHandler;

#[async_trait]
impl ActionHandler for CustomerCreateHandler {
    fn action_type(&self) -> &'static str {
        CUSTOMER_CREATE
    }

    fn local_effects(&self, payload: &serde_json::Value) -> SyncResult<Vec<LocalEffect>> {
        let customer: NewCustomer = decode_payload(CUSTOMER_CREATE, payload)?;
        customer.validate()?;
        Ok(vec![LocalEffect::Upsert(EntityBatch::Customers(vec![
            customer.to_customer(),
        ]))])
    }

    fn ordering_key(&self, payload: &serde_json::Value) -> Option<String> {
        decode_payload::<NewCustomer>(CUSTOMER_CREATE, payload)
            .ok()
            .map(|c| c.ordering_key())
    }

    /// Links the local row to the id the remote assigned.
    fn ack_effects(&self, payload: &serde_json::Value, ack: &Ack) -> SyncResult<Vec<LocalEffect>> {
        let customer: NewCustomer = decode_payload(CUSTOMER_CREATE, payload)?;
        match ack.id_field("id") {
            Some(remote_id) => Ok(vec![LocalEffect::LinkCustomer {
                local_id: customer.id,
                remote_id,
            }]),
            None => {
                warn!(local_id = %customer.id, "Customer ack carried no id");
                Ok(Vec::new())
            }
        }
    }
}
