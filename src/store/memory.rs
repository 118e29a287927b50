//! In-memory store, used by tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CartStore, OrderInsert, OrderStore, SessionStore, StoreError};
use crate::domain::aggregates::{Cart, Order, PaymentSession};

#[derive(Clone, Default)]
pub struct MemoryStore {
    carts: Arc<RwLock<HashMap<String, Cart>>>,
    sessions: Arc<RwLock<Vec<PaymentSession>>>,
    orders: Arc<RwLock<HashMap<String, Order>>>,
    orders_by_cart: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn insert(&self, cart: &Cart) -> Result<(), StoreError> {
        self.carts.write().await.insert(cart.id().to_string(), cart.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Cart>, StoreError> {
        Ok(self.carts.read().await.get(id).cloned())
    }

    async fn update(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut carts = self.carts.write().await;
        match carts.get(cart.id()) {
            Some(stored) if stored.version() >= cart.version() => Err(StoreError::VersionConflict),
            _ => {
                carts.insert(cart.id().to_string(), cart.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn update(&self, session: &PaymentSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.iter_mut().find(|s| s.id() == session.id()) {
            *stored = session.clone();
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentSession>, StoreError> {
        Ok(self.sessions.read().await.iter().find(|s| s.id() == id).cloned())
    }

    async fn find_by_cart(&self, cart_id: &str) -> Result<Vec<PaymentSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.cart_id() == cart_id)
            .cloned()
            .collect())
    }

    async fn find_by_provider_session(
        &self,
        provider_session_id: &str,
    ) -> Result<Option<PaymentSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|s| s.provider_session_id() == Some(provider_session_id))
            .cloned())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        // the by-cart map is the uniqueness gate; hold its write lock across
        // the check and the claim
        let mut by_cart = self.orders_by_cart.write().await;
        if let Some(existing_id) = by_cart.get(order.cart_id()) {
            let orders = self.orders.read().await;
            let existing = orders
                .get(existing_id)
                .cloned()
                .ok_or_else(|| StoreError::Unavailable("dangling order index".into()))?;
            return Ok(OrderInsert::Existing(existing));
        }
        by_cart.insert(order.cart_id().to_string(), order.id().to_string());
        self.orders.write().await.insert(order.id().to_string(), order.clone());
        Ok(OrderInsert::Created)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn find_by_cart(&self, cart_id: &str) -> Result<Option<Order>, StoreError> {
        let by_cart = self.orders_by_cart.read().await;
        let Some(order_id) = by_cart.get(cart_id) else {
            return Ok(None);
        };
        Ok(self.orders.read().await.get(order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::Address;
    use crate::domain::aggregates::PaymentReference;
    use crate::domain::value_objects::{Money, Quantity};

    fn ready_cart() -> Cart {
        let mut cart = Cart::new("usd");
        cart.add_item("V1", "Widget", Quantity::new(1).unwrap(), Money::new(1000, "usd")).unwrap();
        cart.set_email("buyer@example.com").unwrap();
        cart.set_shipping_address(Address::default()).unwrap();
        cart
    }

    #[tokio::test]
    async fn stale_cart_write_conflicts() {
        let store = MemoryStore::new();
        let cart = ready_cart();
        CartStore::insert(&store, &cart).await.unwrap();

        let mut fresh = CartStore::get(&store, cart.id()).await.unwrap().unwrap();
        let mut stale = CartStore::get(&store, cart.id()).await.unwrap().unwrap();

        fresh.set_email("first@example.com").unwrap();
        CartStore::update(&store, &fresh).await.unwrap();

        stale.set_email("second@example.com").unwrap();
        let err = CartStore::update(&store, &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn second_order_insert_returns_existing() {
        let store = MemoryStore::new();
        let cart = ready_cart();
        let payment =
            PaymentReference { session_id: "ps_1".into(), provider_id: "stripe".into() };
        let first = Order::from_cart(&cart, payment.clone()).unwrap();
        let second = Order::from_cart(&cart, payment).unwrap();

        assert!(matches!(
            OrderStore::insert(&store, &first).await.unwrap(),
            OrderInsert::Created
        ));
        match OrderStore::insert(&store, &second).await.unwrap() {
            OrderInsert::Existing(existing) => assert_eq!(existing.id(), first.id()),
            OrderInsert::Created => panic!("duplicate order row"),
        }
    }
}
