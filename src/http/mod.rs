//! HTTP surface: router, state, error mapping.

pub mod carts;
pub mod checkout;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use secrecy::Secret;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::checkout::{OrderCommitter, OrderPoller, PaymentNegotiator};
use crate::publisher::EventPublisher;
use crate::store::{CartStore, OrderStore, SessionStore};
use crate::CheckoutError;

#[derive(Clone)]
pub struct AppState {
    pub carts: Arc<dyn CartStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub orders: Arc<dyn OrderStore>,
    pub negotiator: Arc<PaymentNegotiator>,
    pub committer: Arc<OrderCommitter>,
    pub poller: Arc<OrderPoller>,
    pub publisher: EventPublisher,
    pub webhook_secret: Secret<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/carts", post(carts::create_cart))
        .route("/api/v1/carts/:id", get(carts::get_cart).put(carts::update_cart))
        .route("/api/v1/carts/:id/items", post(carts::add_item))
        .route(
            "/api/v1/carts/:id/items/:item_id",
            delete(carts::remove_item).put(carts::update_item),
        )
        .route("/api/v1/carts/:id/payment", post(checkout::init_payment))
        .route("/api/v1/carts/:id/complete", post(checkout::complete_cart))
        .route("/api/v1/carts/:id/order", get(checkout::find_order))
        .route("/api/v1/carts/:id/sessions", delete(checkout::release_sessions))
        .route("/api/v1/orders/:id", get(checkout::get_order))
        .route("/webhooks/payment", post(checkout::payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "commerce-checkout"}))
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            // operator problem, not something the shopper can fix
            CheckoutError::Configuration { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration")
            }
            CheckoutError::NotReady { .. } => (StatusCode::CONFLICT, "payment_not_ready"),
            CheckoutError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            CheckoutError::ExternalUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "external_unavailable")
            }
            CheckoutError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            CheckoutError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, kind, "request failed");
        }
        let body = Json(serde_json::json!({
            "kind": kind,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
