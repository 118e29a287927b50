//! Storage layer: cart, payment session and order stores.
//!
//! Two implementations: Postgres for the service, in-memory for tests. The
//! contracts that matter for correctness live here: order insertion is
//! once-per-cart, and cart writes are optimistic (a stale version loses).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::{Cart, Order, PaymentSession};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer got there first; reload and retry the mutation.
    #[error("cart was modified concurrently")]
    VersionConflict,

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn insert(&self, cart: &Cart) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Cart>, StoreError>;
    /// Optimistic write: fails with [`StoreError::VersionConflict`] if the
    /// stored version is not older than the one being written.
    async fn update(&self, cart: &Cart) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions are append-only; every attempt gets a row.
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError>;
    async fn update(&self, session: &PaymentSession) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<PaymentSession>, StoreError>;
    async fn find_by_cart(&self, cart_id: &str) -> Result<Vec<PaymentSession>, StoreError>;
    async fn find_by_provider_session(
        &self,
        provider_session_id: &str,
    ) -> Result<Option<PaymentSession>, StoreError>;
}

/// Result of an order insert attempt.
#[derive(Debug)]
pub enum OrderInsert {
    Created,
    /// The cart already has an order; here it is.
    Existing(Order),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert the order unless the cart already has one. Never produces two
    /// orders for one cart, even under concurrent callers.
    async fn insert(&self, order: &Order) -> Result<OrderInsert, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Order>, StoreError>;
    async fn find_by_cart(&self, cart_id: &str) -> Result<Option<Order>, StoreError>;
}
