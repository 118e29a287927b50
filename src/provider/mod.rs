//! Payment processor boundary.
//!
//! The processor exposes create / retrieve / capture / cancel keyed by an
//! opaque session identifier, plus webhook delivery for asynchronous status
//! changes. Everything behind this trait is a third party.

pub mod http;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{HttpProcessor, ProcessorConfig};

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Open a processor-side session under the given provider identifier.
    async fn create_session(
        &self,
        provider_id: &str,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProcessorError>;

    /// Fetch the current processor-side state of a session.
    async fn retrieve_session(&self, provider_session_id: &str)
        -> Result<ProviderSession, ProcessorError>;

    /// Capture an authorized session.
    async fn capture(&self, provider_session_id: &str) -> Result<ProviderSession, ProcessorError>;

    /// Cancel a session so no stray authorization is left behind.
    async fn cancel(&self, provider_session_id: &str) -> Result<ProviderSession, ProcessorError>;
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub cart_id: String,
    /// Amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub email: Option<String>,
}

/// Processor-side view of a session.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub id: String,
    pub status: ProviderSessionStatus,
    /// Token the client uses to finish confirmation out of band.
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSessionStatus {
    Pending,
    RequiresAction,
    Authorized,
    Captured,
    Canceled,
    Failed,
}

impl ProviderSessionStatus {
    /// Map a processor wire status onto our model. Unrecognized strings are
    /// treated as still pending rather than failed.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "requires_action" => Self::RequiresAction,
            "authorized" | "requires_capture" => Self::Authorized,
            "captured" | "succeeded" => Self::Captured,
            "canceled" => Self::Canceled,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_capturable(self) -> bool {
        matches!(self, Self::Authorized | Self::Captured)
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The processor does not recognize the provider identifier. This fails
    /// deterministically; retrying the same identifier cannot help.
    #[error("provider `{provider_id}` not recognized: {message}")]
    UnknownProvider { provider_id: String, message: String },

    #[error("processor rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("processor credentials rejected")]
    Unauthorized,

    #[error("processor unreachable: {0}")]
    Unavailable(String),

    #[error("unexpected processor response: {0}")]
    InvalidResponse(String),
}

impl ProcessorError {
    /// Transient failures (processor down) as opposed to deterministic
    /// rejections (wrong identifier, bad request, bad credentials).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One probed candidate and how it failed.
#[derive(Debug)]
pub struct CandidateFailure {
    pub provider_id: String,
    pub error: ProcessorError,
}
