//! Domain event publishing over NATS.

use crate::domain::events::DomainEvent;

/// Publishes domain events to NATS when a client is configured, and is a
/// no-op otherwise. Publishing is best-effort: a broker hiccup must never
/// fail a checkout request.
#[derive(Clone)]
pub struct EventPublisher {
    client: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(client: Option<async_nats::Client>) -> Self {
        Self { client }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub async fn publish(&self, event: &DomainEvent) {
        let Some(client) = &self.client else {
            return;
        };
        let subject = event.subject();
        let payload = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, %subject, "failed to encode domain event");
                return;
            }
        };
        if let Err(err) = client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(%err, %subject, "failed to publish domain event");
        }
    }

    pub async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in &events {
            self.publish(event).await;
        }
    }
}
