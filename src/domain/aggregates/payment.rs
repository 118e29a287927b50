//! Payment Session Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::Money;

/// One attempt to authorize payment for a cart's amount.
///
/// Sessions are append-only: a failed attempt stays on record and a retry is
/// a new session. At most one session per cart may be authorized when the
/// order is committed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentSession {
    id: String,
    cart_id: String,
    provider_id: String,
    provider_session_id: Option<String>,
    status: SessionStatus,
    amount: Money,
    data: serde_json::Value,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    RequiresAction,
    Authorized,
    Captured,
    Canceled,
    Errored,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Captured | Self::Canceled | Self::Errored)
    }
}

impl PaymentSession {
    /// Open a fresh session against the given provider.
    pub fn open(cart_id: &str, provider_id: &str, amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cart_id: cart_id.to_string(),
            provider_id: provider_id.to_string(),
            provider_session_id: None,
            status: SessionStatus::Pending,
            amount,
            data: serde_json::Value::Null,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ledger row for a candidate the processor rejected outright. The
    /// attempt is kept, not discarded.
    pub fn failed_attempt(cart_id: &str, provider_id: &str, amount: Money, error: &str) -> Self {
        let mut session = Self::open(cart_id, provider_id, amount);
        session.status = SessionStatus::Errored;
        session.last_error = Some(error.to_string());
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cart_id(&self) -> &str {
        &self.cart_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn provider_session_id(&self) -> Option<&str> {
        self.provider_session_id.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Client-confirmable token handed back by the processor, if any.
    pub fn client_token(&self) -> Option<&str> {
        self.data.get("client_token").and_then(|v| v.as_str())
    }

    pub fn is_capturable(&self) -> bool {
        self.status == SessionStatus::Authorized
    }

    pub fn attach_provider(&mut self, provider_session_id: &str, data: serde_json::Value) {
        self.provider_session_id = Some(provider_session_id.to_string());
        self.data = data;
        self.touch();
    }

    pub fn require_action(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::RequiresAction)
    }

    pub fn authorize(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Authorized)
    }

    pub fn capture(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Captured)
    }

    pub fn cancel(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Canceled)
    }

    pub fn fail(&mut self, error: Option<String>) -> Result<(), SessionError> {
        self.transition(SessionStatus::Errored)?;
        self.last_error = error;
        Ok(())
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        use SessionStatus::*;
        let allowed = match (self.status, next) {
            (Pending, RequiresAction | Authorized | Canceled | Errored) => true,
            (RequiresAction, Authorized | Canceled | Errored) => true,
            (Authorized, Captured | Canceled) => true,
            _ => false,
        };
        if !allowed {
            return Err(SessionError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("invalid payment session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut s = PaymentSession::open("cart_1", "pp_stripe_stripe", Money::new(11_000, "usd"));
        s.require_action().unwrap();
        s.authorize().unwrap();
        assert!(s.is_capturable());
        s.capture().unwrap();
        assert!(s.status().is_terminal());
    }

    #[test]
    fn test_captured_session_cannot_move() {
        let mut s = PaymentSession::open("cart_1", "stripe", Money::new(500, "usd"));
        s.authorize().unwrap();
        s.capture().unwrap();
        assert!(s.cancel().is_err());
        assert!(s.authorize().is_err());
    }

    #[test]
    fn test_failed_attempt_is_errored() {
        let s = PaymentSession::failed_attempt(
            "cart_1",
            "stripe",
            Money::new(500, "usd"),
            "provider not recognized",
        );
        assert_eq!(s.status(), SessionStatus::Errored);
        assert_eq!(s.last_error(), Some("provider not recognized"));
    }
}
