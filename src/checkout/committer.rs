//! Order commit: cart with authorized payment becomes an order, exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::aggregates::{Cart, Order, PaymentReference, PaymentSession};
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::provider::PaymentProcessor;
use crate::publisher::EventPublisher;
use crate::store::{CartStore, OrderInsert, OrderStore, SessionStore};
use crate::CheckoutError;

/// Converts an authorized cart into an order.
///
/// Idempotent and race-safe: the webhook-driven commit and the client-driven
/// commit can run concurrently for the same cart and exactly one order
/// results, with both callers handed the same record. Serialization is a
/// per-cart async mutex; the order store's uniqueness on cart id is the
/// correctness backstop underneath it.
pub struct OrderCommitter {
    carts: Arc<dyn CartStore>,
    sessions: Arc<dyn SessionStore>,
    orders: Arc<dyn OrderStore>,
    processor: Arc<dyn PaymentProcessor>,
    publisher: EventPublisher,
    locks: CartLocks,
}

impl OrderCommitter {
    pub fn new(
        carts: Arc<dyn CartStore>,
        sessions: Arc<dyn SessionStore>,
        orders: Arc<dyn OrderStore>,
        processor: Arc<dyn PaymentProcessor>,
        publisher: EventPublisher,
    ) -> Self {
        Self { carts, sessions, orders, processor, publisher, locks: CartLocks::default() }
    }

    pub async fn commit(&self, cart_id: &str) -> Result<Order, CheckoutError> {
        let lock = self.locks.acquire(cart_id);
        let _guard = lock.lock().await;

        // repeated commits return the existing order unchanged
        if let Some(existing) = self.orders.find_by_cart(cart_id).await? {
            self.converge_cart(cart_id).await?;
            return Ok(existing);
        }

        let mut cart = self
            .carts
            .get(cart_id)
            .await?
            .ok_or(CheckoutError::NotFound { kind: "cart", id: cart_id.to_string() })?;

        let missing = cart.missing_requirements();
        if !missing.is_empty() {
            return Err(CheckoutError::Validation(format!(
                "cart is not ready for checkout: missing {}",
                missing.join(", ")
            )));
        }

        let session = self.authorized_session(&cart).await?;
        let payment = PaymentReference {
            session_id: session.id().to_string(),
            provider_id: session.provider_id().to_string(),
        };
        let mut order = Order::from_cart(&cart, payment)
            .map_err(|e| CheckoutError::Validation(e.to_string()))?;

        match self.orders.insert(&order).await? {
            OrderInsert::Created => {}
            OrderInsert::Existing(existing) => {
                // lost a race outside our process; the winner's order stands
                self.converge_cart(cart_id).await?;
                return Ok(existing);
            }
        }

        if cart.mark_completed().is_ok() {
            self.carts.update(&cart).await?;
        }

        tracing::info!(
            order_id = order.id(),
            order_number = order.order_number(),
            cart_id,
            total = order.total().amount(),
            "order committed"
        );
        self.publisher.publish_all(order.take_events()).await;
        self.capture_payment(session).await;
        Ok(order)
    }

    /// The payment is authorized; pull the funds. Best-effort: a capture
    /// failure is an operational followup, not a reason to unwind the order.
    async fn capture_payment(&self, mut session: PaymentSession) {
        if !session.is_capturable() {
            return;
        }
        let Some(provider_session_id) = session.provider_session_id().map(str::to_string) else {
            return;
        };
        match self.processor.capture(&provider_session_id).await {
            Ok(_) => {
                if session.capture().is_ok() {
                    if let Err(err) = self.sessions.update(&session).await {
                        tracing::warn!(session_id = session.id(), %err, "capture not recorded");
                    }
                    self.publisher
                        .publish(&DomainEvent::Payment(PaymentEvent::Captured {
                            session_id: session.id().to_string(),
                        }))
                        .await;
                }
            }
            Err(err) => {
                tracing::warn!(session_id = session.id(), %err, "payment capture failed");
            }
        }
    }

    /// Find a capturable session for the cart. Local state can lag the
    /// processor (the client confirms out of band), so in-flight sessions
    /// are re-checked against the processor before giving up.
    async fn authorized_session(&self, cart: &Cart) -> Result<PaymentSession, CheckoutError> {
        let sessions = self.sessions.find_by_cart(cart.id()).await?;
        if let Some(session) = sessions.iter().find(|s| s.is_capturable()) {
            return Ok(session.clone());
        }

        for session in sessions {
            if session.status().is_terminal() {
                continue;
            }
            let Some(provider_session_id) = session.provider_session_id() else {
                continue;
            };
            match self.processor.retrieve_session(provider_session_id).await {
                Ok(remote) if remote.status.is_capturable() => {
                    let mut session = session;
                    if session.authorize().is_ok() {
                        self.sessions.update(&session).await?;
                        self.publisher
                            .publish(&DomainEvent::Payment(PaymentEvent::Authorized {
                                session_id: session.id().to_string(),
                            }))
                            .await;
                        return Ok(session);
                    }
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    return Err(CheckoutError::ExternalUnavailable(err.to_string()));
                }
                Err(err) => {
                    tracing::warn!(session_id = session.id(), %err, "session status check failed");
                }
            }
        }

        Err(CheckoutError::NotReady {
            cart_id: cart.id().to_string(),
            reason: "no authorized payment session".into(),
        })
    }

    /// An order exists; make sure the cart is marked completed too. Safe to
    /// run repeatedly, which is what makes a half-finished commit converge.
    async fn converge_cart(&self, cart_id: &str) -> Result<(), CheckoutError> {
        if let Some(mut cart) = self.carts.get(cart_id).await? {
            if !cart.is_completed() && cart.mark_completed().is_ok() {
                self.carts.update(&cart).await?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct CartLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CartLocks {
    fn acquire(&self, cart_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(cart_id.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::{Address, ShippingMethod};
    use crate::domain::value_objects::{Money, Quantity};
    use crate::provider::{ProcessorError, ProviderSession, ProviderSessionStatus, SessionRequest};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Processor stub: every session it is asked about is authorized.
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
                status: ProviderSessionStatus::Authorized,
                client_token: None,
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

    fn ready_cart() -> Cart {
        let mut cart = Cart::new("usd");
        cart.add_item("V1", "Jacket", Quantity::new(1).unwrap(), Money::new(5000, "usd")).unwrap();
        cart.add_item("V2", "Shirt", Quantity::new(2).unwrap(), Money::new(2500, "usd")).unwrap();
        cart.set_email("buyer@example.com").unwrap();
        cart.set_shipping_address(Address::default()).unwrap();
        cart.set_shipping_method(ShippingMethod {
            name: "Standard".into(),
            amount: Money::new(1000, "usd"),
        })
        .unwrap();
        cart
    }

    async fn seeded(store: &MemoryStore, authorized: bool) -> Cart {
        let cart = ready_cart();
        CartStore::insert(store, &cart).await.unwrap();
        let mut session =
            PaymentSession::open(cart.id(), "pp_stripe_stripe", cart.total());
        session.attach_provider("ps_remote", serde_json::Value::Null);
        if authorized {
            session.authorize().unwrap();
        }
        SessionStore::insert(store, &session).await.unwrap();
        cart
    }

    fn committer(store: &MemoryStore) -> OrderCommitter {
        let store = store.clone();
        OrderCommitter::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(AuthorizedProcessor),
            EventPublisher::disabled(),
        )
    }

    #[tokio::test]
    async fn commit_snapshots_cart_totals() {
        let store = MemoryStore::new();
        let cart = seeded(&store, true).await;
        let committer = committer(&store);

        let order = committer.commit(cart.id()).await.unwrap();
        assert_eq!(order.total().amount(), 11_000);
        assert_eq!(order.items().len(), 2);

        // cart is now completed and immutable
        let stored = CartStore::get(&store, cart.id()).await.unwrap().unwrap();
        assert!(stored.is_completed());
    }

    #[tokio::test]
    async fn committing_twice_yields_one_order() {
        let store = MemoryStore::new();
        let cart = seeded(&store, true).await;
        let committer = committer(&store);

        let first = committer.commit(cart.id()).await.unwrap();
        let second = committer.commit(cart.id()).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn concurrent_commits_yield_one_order() {
        let store = MemoryStore::new();
        let cart = seeded(&store, true).await;
        let committer = Arc::new(committer(&store));

        let a = tokio::spawn({
            let committer = committer.clone();
            let cart_id = cart.id().to_string();
            async move { committer.commit(&cart_id).await }
        });
        let b = tokio::spawn({
            let committer = committer.clone();
            let cart_id = cart.id().to_string();
            async move { committer.commit(&cart_id).await }
        });

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn commit_without_authorized_session_is_not_ready() {
        let store = MemoryStore::new();
        let cart = ready_cart();
        CartStore::insert(&store, &cart).await.unwrap();
        // a session that is local-only and pending; the processor has never
        // seen it, so there is nothing to re-check
        let session = PaymentSession::open(cart.id(), "stripe", cart.total());
        SessionStore::insert(&store, &session).await.unwrap();

        let committer = committer(&store);
        let err = committer.commit(cart.id()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotReady { .. }));
    }

    #[tokio::test]
    async fn lagging_session_is_rechecked_against_processor() {
        let store = MemoryStore::new();
        // session exists but is only requires_action locally; the stub
        // processor reports it authorized
        let cart = seeded(&store, false).await;
        {
            let sessions = SessionStore::find_by_cart(&store, cart.id()).await.unwrap();
            let mut s = sessions[0].clone();
            s.require_action().unwrap();
            SessionStore::update(&store, &s).await.unwrap();
        }

        let committer = committer(&store);
        let order = committer.commit(cart.id()).await.unwrap();
        assert_eq!(order.cart_id(), cart.id());
    }

    #[tokio::test]
    async fn empty_cart_fails_validation() {
        let store = MemoryStore::new();
        let cart = Cart::new("usd");
        CartStore::insert(&store, &cart).await.unwrap();

        let committer = committer(&store);
        let err = committer.commit(cart.id()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_cart_is_not_found() {
        let store = MemoryStore::new();
        let committer = committer(&store);
        let err = committer.commit("cart_missing").await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));
    }

    #[tokio::test]
    async fn capture_runs_after_commit() {
        let store = MemoryStore::new();
        let cart = seeded(&store, true).await;
        let committer = committer(&store);
        committer.commit(cart.id()).await.unwrap();

        let sessions = SessionStore::find_by_cart(&store, cart.id()).await.unwrap();
        assert!(sessions
            .iter()
            .any(|s| s.status() == crate::domain::aggregates::SessionStatus::Captured));
    }
}
