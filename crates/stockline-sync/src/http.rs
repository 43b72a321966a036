//! # HTTP Remote Authority
//!
//! [`RemoteAuthority`] over the REST API, using `reqwest`.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  submit                                                                 │
//! │    inventory_adjust   POST /inventory/adjust                           │
//! │    customer_create    POST /customers/                                 │
//! │    (more via with_route)                                               │
//! │                                                                         │
//! │  fetch                                                                  │
//! │    products           GET  /products/?search=&category_id=&limit=      │
//! │    inventory          GET  /inventory/   (/inventory/low_stock)        │
//! │    customers          GET  /customers/?search=                         │
//! │    categories         GET  /categories/                                │
//! │                                                                         │
//! │  Headers: Authorization: Bearer <token>, Idempotency-Key: <client id>  │
//! │  List bodies: bare array or { "results": [...] }                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use stockline_core::{
    Category, Customer, EntityBatch, EntityFilter, EntityTable, InventoryRecord, Product,
    CUSTOMER_CREATE, INVENTORY_ADJUST,
};

use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};
use crate::remote::{Ack, RemoteAuthority, RemoteError};

const MAX_LOG_BODY_CHARS: usize = 512;

const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if is_retryable_transport_error(&err) {
        RemoteError::network(err.to_string())
    } else {
        RemoteError::permanent(err.to_string())
    }
}

fn preview(body: &str) -> String {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

// =============================================================================
// Route Table
// =============================================================================

/// Where one action type is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
        }
    }
}

fn default_routes() -> HashMap<String, Route> {
    HashMap::from([
        (INVENTORY_ADJUST.to_string(), Route::post("/inventory/adjust")),
        (CUSTOMER_CREATE.to_string(), Route::post("/customers/")),
    ])
}

// =============================================================================
// Client
// =============================================================================

/// Remote authority backed by the REST API.
#[derive(Debug, Clone)]
pub struct HttpRemoteAuthority {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    routes: HashMap<String, Route>,
}

impl HttpRemoteAuthority {
    /// Creates a client from the `[remote]` config section.
    pub fn new(settings: &RemoteSettings) -> SyncResult<Self> {
        url::Url::parse(&settings.base_url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            routes: default_routes(),
        })
    }

    /// Registers (or replaces) the route for an action type.
    pub fn with_route(mut self, action_type: impl Into<String>, route: Route) -> Self {
        self.routes.insert(action_type.into(), route);
        self
    }

    pub fn route(&self, action_type: &str) -> Option<&Route> {
        self.routes.get(action_type)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| RemoteError::permanent(format!("Invalid API token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Reads the body and turns a non-success status into a classified error.
    async fn read_body(response: reqwest::Response) -> Result<(u16, String), RemoteError> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            debug!(status = status.as_u16(), body = %preview(&body), "Remote returned an error");
            return Err(RemoteError::from_status(
                status.as_u16(),
                format!("Request failed: {}", preview(&body)),
            ));
        }

        debug!(status = status.as_u16(), "Remote response");
        Ok((status.as_u16(), body))
    }

    fn fetch_request(&self, table: EntityTable, filter: &EntityFilter) -> (String, Vec<(String, String)>) {
        let mut query = Vec::new();
        if let Some(term) = filter.search_term() {
            query.push(("search".to_string(), term.to_string()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }

        let path = match table {
            EntityTable::Products => {
                if let Some(category_id) = filter.category_id {
                    query.push(("category_id".to_string(), category_id.to_string()));
                }
                "/products/"
            }
            EntityTable::Inventory if filter.low_stock_only => "/inventory/low_stock",
            EntityTable::Inventory => {
                if let Some(product_id) = filter.product_id {
                    query.push(("product_id".to_string(), product_id.to_string()));
                }
                "/inventory/"
            }
            EntityTable::Customers => "/customers/",
            EntityTable::Categories => "/categories/",
        };

        (self.url(path), query)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn submit(
        &self,
        action_type: &str,
        payload: &serde_json::Value,
        client_mutation_id: &str,
    ) -> Result<Ack, RemoteError> {
        let route = self
            .routes
            .get(action_type)
            .ok_or_else(|| RemoteError::permanent(format!("No route for action '{}'", action_type)))?;

        let mut body = payload.clone();
        match body.as_object_mut() {
            Some(map) => {
                map.insert(
                    "client_mutation_id".to_string(),
                    serde_json::Value::String(client_mutation_id.to_string()),
                );
            }
            None => return Err(RemoteError::permanent("Payload must be a JSON object")),
        }

        let mut headers = self.headers()?;
        let key = HeaderValue::from_str(client_mutation_id)
            .map_err(|e| RemoteError::permanent(format!("Invalid client mutation id: {}", e)))?;
        headers.insert(IDEMPOTENCY_KEY.clone(), key);

        debug!(action_type, method = %route.method, path = %route.path, "Submitting mutation");

        let response = self
            .client
            .request(route.method.clone(), self.url(&route.path))
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let (status, text) = Self::read_body(response).await?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(?e, "Ack body is not JSON, keeping it as text");
                serde_json::Value::String(text)
            })
        };

        Ok(Ack {
            status: Some(status),
            body,
        })
    }

    async fn fetch(
        &self,
        table: EntityTable,
        filter: &EntityFilter,
    ) -> Result<EntityBatch, RemoteError> {
        let (url, query) = self.fetch_request(table, filter);

        let response = self
            .client
            .get(url)
            .headers(self.headers()?)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let (_, text) = Self::read_body(response).await?;
        let body: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| RemoteError::permanent(format!("Failed to parse {} list: {}", table, e)))?;

        decode_batch(table, body)
    }
}

// =============================================================================
// Wire Shapes
// =============================================================================

/// Pulls the row array out of a bare or paginated list body.
fn list_rows(body: serde_json::Value) -> Result<serde_json::Value, RemoteError> {
    match body {
        serde_json::Value::Array(_) => Ok(body),
        serde_json::Value::Object(mut map) => match map.remove("results") {
            Some(rows @ serde_json::Value::Array(_)) => Ok(rows),
            _ => Err(RemoteError::permanent("List body has no 'results' array")),
        },
        _ => Err(RemoteError::permanent("List body is neither an array nor an object")),
    }
}

/// Decodes a list body into rows of one table.
pub fn decode_batch(table: EntityTable, body: serde_json::Value) -> Result<EntityBatch, RemoteError> {
    let rows = list_rows(body)?;
    let bad = |e: serde_json::Error| RemoteError::permanent(format!("Bad {} row: {}", table, e));

    Ok(match table {
        EntityTable::Products => {
            let rows: Vec<WireProduct> = serde_json::from_value(rows).map_err(bad)?;
            EntityBatch::Products(rows.into_iter().map(Product::from).collect())
        }
        EntityTable::Inventory => {
            let rows: Vec<WireInventory> = serde_json::from_value(rows).map_err(bad)?;
            EntityBatch::Inventory(rows.into_iter().map(InventoryRecord::from).collect())
        }
        EntityTable::Customers => {
            let rows: Vec<WireCustomer> = serde_json::from_value(rows).map_err(bad)?;
            EntityBatch::Customers(rows.into_iter().map(Customer::from).collect())
        }
        EntityTable::Categories => {
            let rows: Vec<Category> = serde_json::from_value(rows).map_err(bad)?;
            EntityBatch::Categories(rows)
        }
    })
}

/// A decimal amount sent either as a JSON number or as a string ("4.99").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireDecimal {
    Number(f64),
    Text(String),
}

impl WireDecimal {
    fn to_cents(&self) -> Option<i64> {
        let value = match self {
            WireDecimal::Number(n) => *n,
            WireDecimal::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        Some((value * 100.0).round() as i64)
    }
}

#[derive(Debug, Deserialize)]
struct WireProduct {
    id: i64,
    name: String,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    barcode: Option<String>,
    #[serde(default)]
    price_cents: Option<i64>,
    #[serde(default, alias = "unit_price")]
    price: Option<WireDecimal>,
    #[serde(default)]
    category_id: Option<i64>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<WireProduct> for Product {
    fn from(w: WireProduct) -> Self {
        let price_cents = w
            .price_cents
            .or_else(|| w.price.as_ref().and_then(WireDecimal::to_cents))
            .unwrap_or(0);
        Product {
            id: w.id,
            name: w.name,
            sku: w.sku,
            barcode: w.barcode,
            price_cents,
            category_id: w.category_id,
            image_url: w.image_url,
            description: w.description,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireInventory {
    product_id: i64,
    #[serde(alias = "quantity_on_hand")]
    quantity: i64,
    #[serde(default, alias = "reorder_level")]
    low_stock_threshold: Option<i64>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

impl From<WireInventory> for InventoryRecord {
    fn from(w: WireInventory) -> Self {
        InventoryRecord {
            product_id: w.product_id,
            quantity: w.quantity,
            low_stock_threshold: w.low_stock_threshold,
            last_updated: w.last_updated.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCustomer {
    id: i64,
    #[serde(alias = "full_name")]
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    loyalty_points: i64,
}

impl From<WireCustomer> for Customer {
    /// Remote-only customers get a derived local id. When the remote id is
    /// already linked to an offline-created row, the store keeps that row's id.
    fn from(w: WireCustomer) -> Self {
        Customer {
            id: format!("remote-{}", w.id),
            remote_id: Some(w.id),
            name: w.name,
            email: w.email,
            phone: w.phone,
            loyalty_points: w.loyalty_points,
        }
    }
}
