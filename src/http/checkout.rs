//! Checkout handlers: payment negotiation, completion, reconciliation,
//! webhook intake.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::http::StatusCode;
use axum::Json;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::checkout::PollOutcome;
use crate::domain::aggregates::Order;
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::provider::webhook::{self, ProcessorEvent, SIGNATURE_HEADER};
use crate::CheckoutError;

#[derive(Debug, Serialize)]
pub struct PaymentInitResponse {
    pub session_id: String,
    pub provider_id: String,
    pub status: crate::domain::aggregates::SessionStatus,
    pub amount: i64,
    pub currency: String,
    /// Token the storefront hands to the processor's client SDK.
    pub client_token: Option<String>,
}

/// Open a payment session for the cart, negotiating the provider identifier.
pub async fn init_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentInitResponse>, CheckoutError> {
    let cart = state
        .carts
        .get(&id)
        .await?
        .ok_or(CheckoutError::NotFound { kind: "cart", id })?;
    if cart.is_completed() {
        return Err(CheckoutError::Conflict("cart is already completed".into()));
    }
    let missing = cart.missing_requirements();
    if !missing.is_empty() {
        return Err(CheckoutError::Validation(format!(
            "cart is not ready for payment: missing {}",
            missing.join(", ")
        )));
    }

    let session = state.negotiator.open_session(&cart).await?;
    let amount = session.amount().clone();
    Ok(Json(PaymentInitResponse {
        session_id: session.id().to_string(),
        provider_id: session.provider_id().to_string(),
        status: session.status(),
        amount: amount.amount(),
        currency: amount.currency().to_string(),
        client_token: session.client_token().map(str::to_string),
    }))
}

/// Client-driven completion, called by the storefront once the processor
/// confirms. Idempotent; racing the webhook is fine.
pub async fn complete_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, CheckoutError> {
    let order = state.committer.commit(&id).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize, Default)]
pub struct FindOrderParams {
    /// Engage the bounded server-side poll instead of a single lookup.
    #[serde(default)]
    pub wait: bool,
}

/// Lookup (or await) the order for a cart. While the order lags behind a
/// confirmed payment the answer is 202 "processing", never a failure.
pub async fn find_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FindOrderParams>,
) -> Result<Response, CheckoutError> {
    if params.wait {
        return Ok(match state.poller.await_order(&id).await {
            PollOutcome::Found(order) => Json(order).into_response(),
            PollOutcome::StillProcessing { attempts } => {
                (StatusCode::ACCEPTED, Json(processing_body(Some(attempts)))).into_response()
            }
        });
    }
    Ok(match state.orders.find_by_cart(&id).await? {
        Some(order) => Json(order).into_response(),
        None => (StatusCode::ACCEPTED, Json(processing_body(None))).into_response(),
    })
}

fn processing_body(attempts: Option<u32>) -> serde_json::Value {
    serde_json::json!({
        "status": "processing",
        "attempts": attempts,
        "message": "your order is still being finalized; we will email your confirmation",
    })
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, CheckoutError> {
    state
        .orders
        .get(&id)
        .await?
        .map(Json)
        .ok_or(CheckoutError::NotFound { kind: "order", id })
}

/// Abandoned checkout cleanup: cancel every live session with the processor.
pub async fn release_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CheckoutError> {
    let released = state.negotiator.release_sessions(&id).await?;
    Ok(Json(serde_json::json!({"canceled": released})))
}

/// Processor webhook intake. The raw body is verified against the shared
/// secret before anything is parsed; a bad signature is rejected outright.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, CheckoutError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CheckoutError::Validation("missing webhook signature".into()))?;
    if !webhook::verify_signature(&body, signature, state.webhook_secret.expose_secret()) {
        return Err(CheckoutError::Validation("invalid webhook signature".into()));
    }
    let event = webhook::parse_event(&body)
        .map_err(|e| CheckoutError::Validation(format!("malformed webhook payload: {e}")))?;

    match event {
        ProcessorEvent::PaymentAuthorized { session_id, .. } => {
            handle_confirmation(&state, &session_id, false).await
        }
        ProcessorEvent::PaymentCaptured { session_id, .. } => {
            handle_confirmation(&state, &session_id, true).await
        }
        ProcessorEvent::PaymentFailed { session_id, error } => {
            if let Some(mut session) =
                state.sessions.find_by_provider_session(&session_id).await?
            {
                if session.fail(error.clone()).is_ok() {
                    state.sessions.update(&session).await?;
                    state
                        .publisher
                        .publish(&DomainEvent::Payment(PaymentEvent::Failed {
                            session_id: session.id().to_string(),
                            error,
                        }))
                        .await;
                }
            }
            Ok(Json(serde_json::json!({"received": true})))
        }
        ProcessorEvent::PaymentCanceled { session_id } => {
            if let Some(mut session) =
                state.sessions.find_by_provider_session(&session_id).await?
            {
                if session.cancel().is_ok() {
                    state.sessions.update(&session).await?;
                }
            }
            Ok(Json(serde_json::json!({"received": true})))
        }
        ProcessorEvent::Unknown => {
            tracing::debug!("ignoring unrecognized webhook event");
            Ok(Json(serde_json::json!({"received": true})))
        }
    }
}

/// Shared path for authorized/captured events: record the status change and
/// drive the same idempotent commit the client path uses.
async fn handle_confirmation(
    state: &AppState,
    provider_session_id: &str,
    captured: bool,
) -> Result<Json<serde_json::Value>, CheckoutError> {
    let Some(mut session) =
        state.sessions.find_by_provider_session(provider_session_id).await?
    else {
        tracing::warn!(provider_session_id, "webhook for unknown payment session");
        return Ok(Json(serde_json::json!({"received": true})));
    };

    if !session.is_capturable() && !session.status().is_terminal() {
        if session.authorize().is_ok() {
            state.sessions.update(&session).await?;
            state
                .publisher
                .publish(&DomainEvent::Payment(PaymentEvent::Authorized {
                    session_id: session.id().to_string(),
                }))
                .await;
        }
    }
    if captured && session.is_capturable() {
        if session.capture().is_ok() {
            state.sessions.update(&session).await?;
            state
                .publisher
                .publish(&DomainEvent::Payment(PaymentEvent::Captured {
                    session_id: session.id().to_string(),
                }))
                .await;
        }
    }

    let cart_id = session.cart_id().to_string();
    match state.committer.commit(&cart_id).await {
        Ok(order) => Ok(Json(serde_json::json!({"received": true, "order_id": order.id()}))),
        // the delivery is acknowledged; a cart that is not commit-ready yet
        // is not the processor's problem and must not trigger redelivery
        Err(CheckoutError::NotReady { .. }) | Err(CheckoutError::Validation(_)) => {
            tracing::warn!(%cart_id, "webhook received before cart was commit-ready");
            Ok(Json(serde_json::json!({"received": true})))
        }
        // transient: let the processor redeliver
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{OrderCommitter, OrderPoller, PaymentNegotiator, PollConfig};
    use crate::domain::aggregates::cart::{Address, Cart};
    use crate::domain::aggregates::PaymentSession;
    use crate::domain::value_objects::{Money, Quantity};
    use crate::provider::{
        PaymentProcessor, ProcessorError, ProviderSession, ProviderSessionStatus, SessionRequest,
    };
    use crate::publisher::EventPublisher;
    use crate::store::{CartStore, MemoryStore, OrderStore, SessionStore};
    use async_trait::async_trait;
    use hmac::{Hmac, Mac};
    use secrecy::Secret;
    use sha2::Sha256;
    use std::sync::Arc;
    use std::time::Duration;

    const WEBHOOK_SECRET: &str = "whsec_test";

    struct AuthorizedProcessor;

    #[async_trait]
    impl PaymentProcessor for AuthorizedProcessor {
        async fn create_session(
            &self,
            provider_id: &str,
            _request: &SessionRequest,
        ) -> Result<ProviderSession, ProcessorError> {
            Ok(ProviderSession {
                id: format!("ps_{provider_id}"),
                status: ProviderSessionStatus::RequiresAction,
                client_token: Some("tok_123".into()),
            })
        }

        async fn retrieve_session(
            &self,
            provider_session_id: &str,
        ) -> Result<ProviderSession, ProcessorError> {
            Ok(ProviderSession {
                id: provider_session_id.to_string(),
                status: ProviderSessionStatus::Authorized,
                client_token: None,
            })
        }

        async fn capture(
            &self,
            provider_session_id: &str,
        ) -> Result<ProviderSession, ProcessorError> {
            Ok(ProviderSession {
                id: provider_session_id.to_string(),
                status: ProviderSessionStatus::Captured,
                client_token: None,
            })
        }

        async fn cancel(
            &self,
            provider_session_id: &str,
        ) -> Result<ProviderSession, ProcessorError> {
            Ok(ProviderSession {
                id: provider_session_id.to_string(),
                status: ProviderSessionStatus::Canceled,
                client_token: None,
            })
        }
    }

    fn app_state(store: &MemoryStore) -> AppState {
        let carts: Arc<dyn CartStore> = Arc::new(store.clone());
        let sessions: Arc<dyn SessionStore> = Arc::new(store.clone());
        let orders: Arc<dyn OrderStore> = Arc::new(store.clone());
        let processor: Arc<dyn PaymentProcessor> = Arc::new(AuthorizedProcessor);
        let publisher = EventPublisher::disabled();
        AppState {
            carts: carts.clone(),
            sessions: sessions.clone(),
            orders: orders.clone(),
            negotiator: Arc::new(PaymentNegotiator::new(
                processor.clone(),
                sessions.clone(),
                publisher.clone(),
                vec!["pp_stripe_stripe".into(), "stripe".into()],
            )),
            committer: Arc::new(OrderCommitter::new(
                carts,
                sessions,
                orders.clone(),
                processor,
                publisher.clone(),
            )),
            poller: Arc::new(OrderPoller::new(
                orders,
                PollConfig { max_attempts: 2, interval: Duration::from_millis(10) },
            )),
            publisher,
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
        }
    }

    async fn seeded_cart(store: &MemoryStore) -> Cart {
        let mut cart = Cart::new("usd");
        cart.add_item("V1", "Jacket", Quantity::new(1).unwrap(), Money::new(5000, "usd")).unwrap();
        cart.add_item("V2", "Shirt", Quantity::new(2).unwrap(), Money::new(2500, "usd")).unwrap();
        cart.set_email("buyer@example.com").unwrap();
        cart.set_shipping_address(Address::default()).unwrap();
        CartStore::insert(store, &cart).await.unwrap();
        let mut session = PaymentSession::open(cart.id(), "stripe", cart.total());
        session.attach_provider("ps_remote", serde_json::Value::Null);
        session.require_action().unwrap();
        SessionStore::insert(store, &session).await.unwrap();
        cart
    }

    fn signed_headers(body: &[u8]) -> HeaderMap {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let store = MemoryStore::new();
        let state = app_state(&store);
        let body = Bytes::from_static(
            br#"{"type":"payment_authorized","session_id":"ps_remote","amount":11000}"#,
        );
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, "deadbeef".parse().unwrap());

        let err = payment_webhook(State(state), headers, body).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[tokio::test]
    async fn authorized_webhook_commits_the_order() {
        let store = MemoryStore::new();
        let state = app_state(&store);
        let cart = seeded_cart(&store).await;

        let body = Bytes::from_static(
            br#"{"type":"payment_authorized","session_id":"ps_remote","amount":10000}"#,
        );
        let headers = signed_headers(&body);
        payment_webhook(State(state), headers, body).await.unwrap();

        let order = OrderStore::find_by_cart(&store, cart.id()).await.unwrap();
        assert!(order.is_some());
        assert_eq!(order.unwrap().total().amount(), 10_000);
    }

    #[tokio::test]
    async fn webhook_then_client_completion_share_one_order() {
        let store = MemoryStore::new();
        let state = app_state(&store);
        let cart = seeded_cart(&store).await;

        let body = Bytes::from_static(
            br#"{"type":"payment_authorized","session_id":"ps_remote","amount":10000}"#,
        );
        let headers = signed_headers(&body);
        payment_webhook(State(state.clone()), headers, body).await.unwrap();

        // the storefront completion call races in afterwards; same order
        let Json(order) =
            complete_cart(State(state), Path(cart.id().to_string())).await.unwrap();
        let stored = OrderStore::find_by_cart(&store, cart.id()).await.unwrap().unwrap();
        assert_eq!(order.id(), stored.id());
    }

    #[tokio::test]
    async fn find_order_reports_processing_not_failure() {
        let store = MemoryStore::new();
        let state = app_state(&store);
        let cart = seeded_cart(&store).await;

        let response = find_order(
            State(state),
            Path(cart.id().to_string()),
            Query(FindOrderParams { wait: true }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
