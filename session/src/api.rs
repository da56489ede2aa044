//! REST client for the marketplace backend.
//!
//! Every request carries `Authorization: Bearer <token>` when the token store
//! holds one. A `401` from any endpoint is funneled to the
//! [`UnauthorizedHandler`] (the session manager), which clears the store and
//! sends the user to the login page; the call itself still fails with
//! [`ApiError::Unauthorized`].
//!
//! ERROR HANDLING
//! ==============
//! No retries. Transport failures surface as `Network`; non-2xx bodies are
//! kept so pages can show the backend's message.

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::HttpTimeouts;
use crate::token_store::TokenStore;
use crate::types::{
    AdminStats, Order, OrderStatus, Product, ProductInput, ProductStatus, Report, UserEnvelope, UserSummary, WishlistItem,
};

/// Receives "the backend no longer accepts this session".
pub trait UnauthorizedHandler: Send + Sync {
    fn on_unauthorized(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session expired; sign in again")]
    Unauthorized,
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response body: {0}")]
    Parse(String),
    #[error("api client build failed: {0}")]
    ClientBuild(String),
}

// =============================================================================
// ENVELOPES
// =============================================================================

#[derive(serde::Deserialize)]
struct ProductsEnvelope {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(serde::Deserialize)]
struct ProductEnvelope {
    product: Product,
}

#[derive(serde::Deserialize)]
struct OrdersEnvelope {
    #[serde(default)]
    orders: Vec<Order>,
}

#[derive(serde::Deserialize)]
struct OrderEnvelope {
    order: Order,
}

#[derive(serde::Deserialize)]
struct WishlistEnvelope {
    #[serde(default)]
    wishlist: Vec<WishlistItem>,
}

#[derive(serde::Deserialize)]
struct ReportsEnvelope {
    #[serde(default)]
    reports: Vec<Report>,
}

#[derive(serde::Deserialize)]
struct ReportEnvelope {
    report: Report,
}

#[derive(serde::Deserialize)]
struct UsersEnvelope {
    #[serde(default)]
    users: Vec<UserSummary>,
}

#[derive(serde::Deserialize)]
struct StatsEnvelope {
    stats: AdminStats,
}

// =============================================================================
// REQUEST BODIES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUserRequest {
    pub name: String,
    pub email: String,
    pub university_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WishlistAdd<'a> {
    product_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportCreate<'a> {
    product_id: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct StatusChange<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct ReportResolution<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: TokenStore,
    on_unauthorized: Arc<dyn UnauthorizedHandler>,
}

impl ApiClient {
    /// Build a client for `base_url` (e.g. `http://host/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        timeouts: HttpTimeouts,
        store: TokenStore,
        on_unauthorized: Arc<dyn UnauthorizedHandler>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), store, on_unauthorized })
    }

    async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(token) = self.store.token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        if status == 401 {
            tracing::warn!(%method, path, "backend returned 401");
            self.on_unauthorized.on_unauthorized();
            return Err(ApiError::Unauthorized);
        }

        let text = response.text().await.map_err(|e| ApiError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(ApiError::Status { status, message: error_message(&text) });
        }
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    async fn send<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        self.request(method, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self.request::<(), _>(Method::DELETE, path, None).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // auth / profile
    // -------------------------------------------------------------------------

    /// `POST /auth/sync`: register the provider account with the backend.
    pub async fn sync_user(&self, request: &SyncUserRequest) -> Result<UserSummary, ApiError> {
        let env: UserEnvelope = self.send(Method::POST, "/auth/sync", request).await?;
        Ok(env.user)
    }

    /// `GET /auth/me`
    pub async fn me(&self) -> Result<UserSummary, ApiError> {
        let env: UserEnvelope = self.get("/auth/me").await?;
        Ok(env.user)
    }

    /// `PUT /auth/me`
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserSummary, ApiError> {
        let env: UserEnvelope = self.send(Method::PUT, "/auth/me", update).await?;
        Ok(env.user)
    }

    // -------------------------------------------------------------------------
    // products
    // -------------------------------------------------------------------------

    /// `GET /products?<query>`: `query` is passed through as-is.
    pub async fn list_products(&self, query: Option<&str>) -> Result<Vec<Product>, ApiError> {
        let path = match query.filter(|q| !q.is_empty()) {
            Some(q) => format!("/products?{}", q.trim_start_matches('?')),
            None => "/products".to_owned(),
        };
        let env: ProductsEnvelope = self.get(&path).await?;
        Ok(env.products)
    }

    pub async fn my_products(&self) -> Result<Vec<Product>, ApiError> {
        let env: ProductsEnvelope = self.get("/products/me").await?;
        Ok(env.products)
    }

    pub async fn product(&self, id: &str) -> Result<Product, ApiError> {
        let env: ProductEnvelope = self.get(&format!("/products/{id}")).await?;
        Ok(env.product)
    }

    pub async fn create_product(&self, input: &ProductInput) -> Result<Product, ApiError> {
        let env: ProductEnvelope = self.send(Method::POST, "/products", input).await?;
        Ok(env.product)
    }

    pub async fn update_product(&self, id: &str, input: &ProductInput) -> Result<Product, ApiError> {
        let env: ProductEnvelope = self.send(Method::PUT, &format!("/products/{id}"), input).await?;
        Ok(env.product)
    }

    pub async fn delete_product(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/products/{id}")).await
    }

    // -------------------------------------------------------------------------
    // orders / wishlist / reports
    // -------------------------------------------------------------------------

    pub async fn orders(&self) -> Result<Vec<Order>, ApiError> {
        let env: OrdersEnvelope = self.get("/orders").await?;
        Ok(env.orders)
    }

    pub async fn order(&self, id: &str) -> Result<Order, ApiError> {
        let env: OrderEnvelope = self.get(&format!("/orders/{id}")).await?;
        Ok(env.order)
    }

    pub async fn wishlist(&self) -> Result<Vec<WishlistItem>, ApiError> {
        let env: WishlistEnvelope = self.get("/wishlist").await?;
        Ok(env.wishlist)
    }

    pub async fn add_to_wishlist(&self, product_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self.send(Method::POST, "/wishlist", &WishlistAdd { product_id }).await?;
        Ok(())
    }

    pub async fn remove_from_wishlist(&self, product_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/wishlist/{product_id}")).await
    }

    pub async fn report_product(&self, product_id: &str, reason: &str) -> Result<Report, ApiError> {
        let env: ReportEnvelope = self
            .send(Method::POST, "/reports", &ReportCreate { product_id, reason })
            .await?;
        Ok(env.report)
    }

    // -------------------------------------------------------------------------
    // admin
    // -------------------------------------------------------------------------

    pub async fn admin_stats(&self) -> Result<AdminStats, ApiError> {
        let env: StatsEnvelope = self.get("/admin/stats").await?;
        Ok(env.stats)
    }

    pub async fn admin_users(&self) -> Result<Vec<UserSummary>, ApiError> {
        let env: UsersEnvelope = self.get("/admin/users").await?;
        Ok(env.users)
    }

    pub async fn toggle_user_block(&self, user_id: &str) -> Result<UserSummary, ApiError> {
        let env: UserEnvelope = self
            .send(Method::PUT, &format!("/admin/users/{user_id}/toggle-block"), &serde_json::json!({}))
            .await?;
        Ok(env.user)
    }

    pub async fn admin_products(&self, status: Option<ProductStatus>) -> Result<Vec<Product>, ApiError> {
        let path = match status {
            Some(status) => format!("/admin/products?status={}", status.as_str()),
            None => "/admin/products".to_owned(),
        };
        let env: ProductsEnvelope = self.get(&path).await?;
        Ok(env.products)
    }

    pub async fn admin_orders(&self) -> Result<Vec<Order>, ApiError> {
        let env: OrdersEnvelope = self.get("/admin/orders").await?;
        Ok(env.orders)
    }

    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
        let body = StatusChange { status: status.as_str() };
        let env: OrderEnvelope = self
            .send(Method::PUT, &format!("/admin/orders/{order_id}/status"), &body)
            .await?;
        Ok(env.order)
    }

    pub async fn admin_reports(&self) -> Result<Vec<Report>, ApiError> {
        let env: ReportsEnvelope = self.get("/admin/reports").await?;
        Ok(env.reports)
    }

    pub async fn resolve_report(&self, report_id: &str, action: &str, note: Option<&str>) -> Result<Report, ApiError> {
        let body = ReportResolution { action, note };
        let env: ReportEnvelope = self
            .send(Method::PUT, &format!("/admin/reports/{report_id}/resolve"), &body)
            .await?;
        Ok(env.report)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(serde_json::Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| body.trim().to_owned())
}
