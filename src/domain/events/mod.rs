//! Domain events

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: String, cart_id: String, total: i64, currency: String },
    Fulfilled { order_id: String },
    Canceled { order_id: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    SessionOpened { session_id: String, cart_id: String, provider_id: String },
    Authorized { session_id: String },
    Captured { session_id: String },
    Failed { session_id: String, error: Option<String> },
}

impl DomainEvent {
    /// NATS subject the event is published under.
    pub fn subject(&self) -> String {
        match self {
            DomainEvent::Order(OrderEvent::Placed { .. }) => "checkout.order.placed",
            DomainEvent::Order(OrderEvent::Fulfilled { .. }) => "checkout.order.fulfilled",
            DomainEvent::Order(OrderEvent::Canceled { .. }) => "checkout.order.canceled",
            DomainEvent::Payment(PaymentEvent::SessionOpened { .. }) => "checkout.payment.session_opened",
            DomainEvent::Payment(PaymentEvent::Authorized { .. }) => "checkout.payment.authorized",
            DomainEvent::Payment(PaymentEvent::Captured { .. }) => "checkout.payment.captured",
            DomainEvent::Payment(PaymentEvent::Failed { .. }) => "checkout.payment.failed",
        }
        .to_string()
    }
}
