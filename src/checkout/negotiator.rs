//! Payment negotiation: finding a provider identifier the processor accepts.
//!
//! Deployments of the processor integration have disagreed over time about
//! the provider identifier string ("pp_stripe_stripe" vs "stripe" and
//! friends). The negotiator probes an ordered candidate list, one attempt
//! per candidate, and short-circuits on the first acceptance. A wrong
//! identifier fails deterministically, so there is no backoff here; backoff
//! belongs to transient failures, which abort the probe instead.

use std::sync::{Arc, RwLock};

use crate::domain::aggregates::{Cart, PaymentSession};
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::provider::{
    CandidateFailure, PaymentProcessor, ProviderSessionStatus, SessionRequest,
};
use crate::publisher::EventPublisher;
use crate::store::SessionStore;
use crate::{AttemptLog, CheckoutError};

pub struct PaymentNegotiator {
    processor: Arc<dyn PaymentProcessor>,
    sessions: Arc<dyn SessionStore>,
    publisher: EventPublisher,
    candidates: Vec<String>,
    /// Last identifier the processor accepted; tried first on later calls so
    /// a settled deployment probes exactly once per session.
    preferred: RwLock<Option<String>>,
}

impl PaymentNegotiator {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        sessions: Arc<dyn SessionStore>,
        publisher: EventPublisher,
        candidates: Vec<String>,
    ) -> Self {
        Self { processor, sessions, publisher, candidates, preferred: RwLock::new(None) }
    }

    pub fn preferred(&self) -> Option<String> {
        self.preferred.read().ok().and_then(|p| p.clone())
    }

    /// Open a payment session for the cart, probing candidates in order.
    pub async fn open_session(&self, cart: &Cart) -> Result<PaymentSession, CheckoutError> {
        let amount = cart.total();
        let request = SessionRequest {
            cart_id: cart.id().to_string(),
            amount: amount.amount(),
            currency: amount.currency().to_string(),
            email: cart.email().map(str::to_string),
        };

        let mut failures: Vec<CandidateFailure> = Vec::new();
        for provider_id in self.probe_order() {
            match self.processor.create_session(&provider_id, &request).await {
                Ok(provider_session) => {
                    let mut session = PaymentSession::open(cart.id(), &provider_id, amount.clone());
                    let data = serde_json::json!({
                        "client_token": provider_session.client_token,
                    });
                    session.attach_provider(&provider_session.id, data);
                    apply_provider_status(&mut session, provider_session.status);
                    self.sessions.insert(&session).await?;
                    if let Ok(mut preferred) = self.preferred.write() {
                        *preferred = Some(provider_id.clone());
                    }
                    tracing::info!(
                        cart_id = cart.id(),
                        %provider_id,
                        session_id = session.id(),
                        "payment session opened"
                    );
                    self.publisher
                        .publish(&DomainEvent::Payment(PaymentEvent::SessionOpened {
                            session_id: session.id().to_string(),
                            cart_id: cart.id().to_string(),
                            provider_id,
                        }))
                        .await;
                    return Ok(session);
                }
                Err(err) if err.is_transient() => {
                    // the processor itself is unreachable; probing the other
                    // candidates would hit the same wall
                    tracing::warn!(cart_id = cart.id(), %provider_id, %err, "processor unavailable");
                    failures.push(CandidateFailure { provider_id, error: err });
                    return Err(CheckoutError::ExternalUnavailable(format!(
                        "payment processor unreachable [{}]",
                        AttemptLog(failures)
                    )));
                }
                Err(err) => {
                    tracing::warn!(
                        cart_id = cart.id(),
                        %provider_id,
                        %err,
                        "provider candidate rejected"
                    );
                    let attempt = PaymentSession::failed_attempt(
                        cart.id(),
                        &provider_id,
                        amount.clone(),
                        &err.to_string(),
                    );
                    self.sessions.insert(&attempt).await?;
                    failures.push(CandidateFailure { provider_id, error: err });
                }
            }
        }

        Err(CheckoutError::Configuration { attempts: AttemptLog(failures) })
    }

    /// Cancel every live session for the cart so nothing stays authorized on
    /// the processor side after an abandoned checkout.
    pub async fn release_sessions(&self, cart_id: &str) -> Result<u32, CheckoutError> {
        let mut released = 0;
        for mut session in self.sessions.find_by_cart(cart_id).await? {
            if session.status().is_terminal() {
                continue;
            }
            if let Some(provider_session_id) = session.provider_session_id().map(str::to_string) {
                match self.processor.cancel(&provider_session_id).await {
                    Ok(_) => {}
                    Err(err) if err.is_transient() => {
                        return Err(CheckoutError::ExternalUnavailable(err.to_string()));
                    }
                    Err(err) => {
                        tracing::warn!(cart_id, session_id = session.id(), %err, "cancel rejected");
                        continue;
                    }
                }
            }
            if session.cancel().is_ok() {
                self.sessions.update(&session).await?;
                released += 1;
            }
        }
        Ok(released)
    }

    fn probe_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.candidates.len());
        if let Some(preferred) = self.preferred() {
            if self.candidates.contains(&preferred) {
                order.push(preferred);
            }
        }
        for candidate in &self.candidates {
            if !order.contains(candidate) {
                order.push(candidate.clone());
            }
        }
        order
    }
}

fn apply_provider_status(session: &mut PaymentSession, status: ProviderSessionStatus) {
    let result = match status {
        ProviderSessionStatus::Pending => Ok(()),
        ProviderSessionStatus::RequiresAction => session.require_action(),
        ProviderSessionStatus::Authorized => session.authorize(),
        ProviderSessionStatus::Captured => session.authorize().and_then(|()| session.capture()),
        ProviderSessionStatus::Canceled => session.cancel(),
        ProviderSessionStatus::Failed => session.fail(None),
    };
    if let Err(err) = result {
        tracing::warn!(session_id = session.id(), %err, "unexpected provider status");
    }
}
