//! Postgres store.
//!
//! Aggregates are persisted as JSONB snapshots; the indexed columns next to
//! them exist for lookups and for the constraints the checkout flow leans
//! on (unique order per cart, cart version check).

use async_trait::async_trait;
use sqlx::PgPool;

use super::{CartStore, OrderInsert, OrderStore, SessionStore, StoreError};
use crate::domain::aggregates::{Cart, Order, PaymentSession};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl CartStore for PgStore {
    async fn insert(&self, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO carts (id, data, version, completed_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(cart.id())
        .bind(serde_json::to_value(cart)?)
        .bind(cart.version() as i64)
        .bind(cart.completed_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Cart>, StoreError> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT data FROM carts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(decode).transpose()
    }

    async fn update(&self, cart: &Cart) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE carts SET data = $2, version = $3, completed_at = $4, updated_at = now() \
             WHERE id = $1 AND version < $3",
        )
        .bind(cart.id())
        .bind(serde_json::to_value(cart)?)
        .bind(cart.version() as i64)
        .bind(cart.completed_at())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_sessions (id, cart_id, provider_session_id, data) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(session.id())
        .bind(session.cart_id())
        .bind(session.provider_session_id())
        .bind(serde_json::to_value(session)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, session: &PaymentSession) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payment_sessions SET provider_session_id = $2, data = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(session.id())
        .bind(session.provider_session_id())
        .bind(serde_json::to_value(session)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentSession>, StoreError> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT data FROM payment_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(decode).transpose()
    }

    async fn find_by_cart(&self, cart_id: &str) -> Result<Vec<PaymentSession>, StoreError> {
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT data FROM payment_sessions WHERE cart_id = $1 ORDER BY created_at",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode).collect()
    }

    async fn find_by_provider_session(
        &self,
        provider_session_id: &str,
    ) -> Result<Option<PaymentSession>, StoreError> {
        let row: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT data FROM payment_sessions WHERE provider_session_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(provider_session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode).transpose()
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        let result = sqlx::query(
            "INSERT INTO orders (id, cart_id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (cart_id) DO NOTHING",
        )
        .bind(order.id())
        .bind(order.cart_id())
        .bind(serde_json::to_value(order)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(OrderInsert::Created);
        }
        // lost the race: another commit claimed the cart first
        let existing = OrderStore::find_by_cart(self, order.cart_id())
            .await?
            .ok_or_else(|| StoreError::Unavailable("order vanished after conflict".into()))?;
        Ok(OrderInsert::Existing(existing))
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT data FROM orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(decode).transpose()
    }

    async fn find_by_cart(&self, cart_id: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT data FROM orders WHERE cart_id = $1")
                .bind(cart_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(decode).transpose()
    }
}
