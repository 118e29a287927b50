//! Commerce Checkout Service
//!
//! Turns a shopping cart into an authorized, captured payment and a
//! committed order, tolerant of provider-identifier ambiguity, partial
//! completion, and webhook-vs-polling races.
//!
//! ## Flow
//! - Cart: mutable aggregate of items, addresses, totals
//! - Payment negotiation against the external processor
//! - Idempotent order commit (webhook- or client-driven)
//! - Reconciliation polling while the order record lags

use std::fmt;

use thiserror::Error;

pub mod checkout;
pub mod config;
pub mod domain;
pub mod http;
pub mod provider;
pub mod publisher;
pub mod store;

use crate::domain::aggregates::CartError;
use crate::provider::CandidateFailure;
use crate::store::StoreError;

/// Error taxonomy for the checkout flow. Callers branch on the kind, never
/// on message text.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// No candidate provider identifier was accepted. Operator-facing; the
    /// shopper cannot retry their way out of this.
    #[error("no payment provider accepted the session [{attempts}]")]
    Configuration { attempts: AttemptLog },

    /// A precondition (authorized payment) is not met yet. Recoverable:
    /// retry the precondition, not the whole flow.
    #[error("payment for cart {cart_id} is not ready: {reason}")]
    NotReady { cart_id: String, reason: String },

    /// Conflicting state change (stale cart write, completed-cart mutation).
    #[error("conflicting checkout state: {0}")]
    Conflict(String),

    /// The processor or the store is unreachable. Retryable with bounds.
    #[error("external dependency unavailable: {0}")]
    ExternalUnavailable(String),

    /// The request itself is wrong and must be corrected by the caller.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Every candidate a negotiation probed, with how each one failed.
#[derive(Debug)]
pub struct AttemptLog(pub Vec<CandidateFailure>);

impl fmt::Display for AttemptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no candidates configured");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.provider_id, failure.error)?;
        }
        Ok(())
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict => CheckoutError::Conflict(err.to_string()),
            other => CheckoutError::ExternalUnavailable(other.to_string()),
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::Completed => CheckoutError::Conflict(err.to_string()),
            CartError::ItemNotFound => {
                CheckoutError::NotFound { kind: "line item", id: String::new() }
            }
            CartError::CurrencyMismatch => CheckoutError::Validation(err.to_string()),
        }
    }
}
