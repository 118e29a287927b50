//! Order reconciliation polling.
//!
//! When order creation is driven by a webhook, the order record can lag the
//! payment confirmation the customer just watched succeed. The poller
//! bridges that gap: a fixed-interval, hard-capped loop asking "does an
//! order exist for this cart yet". Exhaustion is not failure: the payment
//! may well have gone through, so the terminal state is "still
//! processing", and callers must present it that way.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::aggregates::Order;
use crate::store::OrderStore;

#[derive(Clone, Debug)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { max_attempts: 15, interval: Duration::from_secs(2) }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Found(Order),
    /// The cap was reached without an order appearing. Not a failure.
    StillProcessing { attempts: u32 },
}

pub struct OrderPoller {
    orders: Arc<dyn OrderStore>,
    config: PollConfig,
}

impl OrderPoller {
    pub fn new(orders: Arc<dyn OrderStore>, config: PollConfig) -> Self {
        Self { orders, config }
    }

    pub async fn await_order(&self, cart_id: &str) -> PollOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.orders.find_by_cart(cart_id).await {
                Ok(Some(order)) => {
                    tracing::debug!(cart_id, attempt, order_id = order.id(), "order found");
                    return PollOutcome::Found(order);
                }
                Ok(None) => {}
                // a storage hiccup consumes the attempt rather than aborting
                Err(err) => tracing::warn!(cart_id, attempt, %err, "order lookup failed"),
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }
        tracing::debug!(cart_id, max_attempts, "order not visible yet");
        PollOutcome::StillProcessing { attempts: max_attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{OrderInsert, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Order store that never has the order, counting how often it is asked.
    #[derive(Default)]
    struct EmptyCountingStore {
        lookups: AtomicU32,
    }

    #[async_trait]
    impl OrderStore for EmptyCountingStore {
        async fn insert(&self, _order: &Order) -> Result<OrderInsert, StoreError> {
            unimplemented!("poll tests never insert")
        }

        async fn get(&self, _id: &str) -> Result<Option<Order>, StoreError> {
            Ok(None)
        }

        async fn find_by_cart(&self, _cart_id: &str) -> Result<Option<Order>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_exactly_max_attempts() {
        let store = Arc::new(EmptyCountingStore::default());
        let poller = OrderPoller::new(
            store.clone(),
            PollConfig { max_attempts: 3, interval: Duration::from_secs(2) },
        );

        let outcome = poller.await_order("cart_1").await;
        assert!(matches!(outcome, PollOutcome::StillProcessing { attempts: 3 }));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn finds_order_that_appears_mid_poll() {
        use crate::domain::aggregates::cart::Address;
        use crate::domain::aggregates::{Cart, Order, PaymentReference};
        use crate::domain::value_objects::{Money, Quantity};
        use crate::store::MemoryStore;

        let store = MemoryStore::new();
        let mut cart = Cart::new("usd");
        cart.add_item("V1", "Widget", Quantity::new(1).unwrap(), Money::new(1000, "usd")).unwrap();
        cart.set_email("buyer@example.com").unwrap();
        cart.set_shipping_address(Address::default()).unwrap();
        let order = Order::from_cart(
            &cart,
            PaymentReference { session_id: "ps_1".into(), provider_id: "stripe".into() },
        )
        .unwrap();

        let poller = Arc::new(OrderPoller::new(
            Arc::new(store.clone()),
            PollConfig { max_attempts: 5, interval: Duration::from_secs(2) },
        ));

        let cart_id = cart.id().to_string();
        let poll = tokio::spawn({
            let poller = poller.clone();
            async move { poller.await_order(&cart_id).await }
        });

        // land the order while the poller is sleeping between attempts
        tokio::time::sleep(Duration::from_secs(3)).await;
        OrderStore::insert(&store, &order).await.unwrap();

        match poll.await.unwrap() {
            PollOutcome::Found(found) => assert_eq!(found.id(), order.id()),
            PollOutcome::StillProcessing { .. } => panic!("order should have been found"),
        }
    }
}
