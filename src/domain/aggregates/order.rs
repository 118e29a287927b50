//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::cart::{Address, Cart, LineItem};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;

/// Immutable record created once a cart's payment is authorized.
///
/// Everything is copied out of the cart at commit time; later cart or
/// catalog mutation cannot alter an order's history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: String,
    order_number: String,
    cart_id: String,
    email: String,
    status: OrderStatus,
    items: Vec<LineItem>,
    shipping_address: Address,
    billing_address: Option<Address>,
    subtotal: Money,
    shipping_total: Money,
    discount_total: Money,
    total: Money,
    payment: PaymentReference,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Which payment session (and which provider variant) paid for the order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentReference {
    pub session_id: String,
    pub provider_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Fulfilled,
    Canceled,
}

impl Order {
    /// Snapshot a cart into an order. The cart must be ready: items, email
    /// and shipping address present.
    pub fn from_cart(cart: &Cart, payment: PaymentReference) -> Result<Self, OrderError> {
        let missing = cart.missing_requirements();
        if !missing.is_empty() {
            return Err(OrderError::CartNotReady { missing });
        }
        let email = cart.email().unwrap_or_default().to_string();
        let shipping_address = cart
            .shipping_address()
            .cloned()
            .ok_or(OrderError::CartNotReady { missing: vec!["shipping_address"] })?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let mut order = Self {
            id: id.clone(),
            order_number: format!("ORD-{:08}", rand::random::<u32>()),
            cart_id: cart.id().to_string(),
            email,
            status: OrderStatus::Pending,
            items: cart.items().to_vec(),
            shipping_address,
            billing_address: cart.billing_address().cloned(),
            subtotal: cart.subtotal(),
            shipping_total: cart.shipping_total(),
            discount_total: cart.discount_total().clone(),
            total: cart.total(),
            payment,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise(DomainEvent::Order(OrderEvent::Placed {
            order_id: id,
            cart_id: cart.id().to_string(),
            total: order.total.amount(),
            currency: order.total.currency().to_string(),
        }));
        Ok(order)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn cart_id(&self) -> &str {
        &self.cart_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn total(&self) -> &Money {
        &self.total
    }

    pub fn payment(&self) -> &PaymentReference {
        &self.payment
    }

    pub fn mark_processing(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition { from: self.status, to: OrderStatus::Processing });
        }
        self.status = OrderStatus::Processing;
        self.touch();
        Ok(())
    }

    pub fn fulfill(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Processing {
            return Err(OrderError::InvalidTransition { from: self.status, to: OrderStatus::Fulfilled });
        }
        self.status = OrderStatus::Fulfilled;
        self.touch();
        self.raise(DomainEvent::Order(OrderEvent::Fulfilled { order_id: self.id.clone() }));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if self.status == OrderStatus::Fulfilled {
            return Err(OrderError::InvalidTransition { from: self.status, to: OrderStatus::Canceled });
        }
        self.status = OrderStatus::Canceled;
        self.touch();
        self.raise(DomainEvent::Order(OrderEvent::Canceled { order_id: self.id.clone() }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn raise(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("cart is not ready for checkout: missing {missing:?}")]
    CartNotReady { missing: Vec<&'static str> },
    #[error("invalid order transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}
