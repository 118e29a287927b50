//! HTTP payment processor client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use super::{
    PaymentProcessor, ProcessorError, ProviderSession, ProviderSessionStatus, SessionRequest,
};

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub api_base_url: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
}

/// Client for the payment processor's session API.
#[derive(Clone)]
pub struct HttpProcessor {
    client: Client,
    config: ProcessorConfig,
}

#[derive(Debug, Serialize)]
struct WireCreateSession<'a> {
    provider_id: &'a str,
    amount: i64,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
    metadata: WireMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct WireMetadata<'a> {
    cart_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireSession {
    id: String,
    status: String,
    #[serde(default)]
    client_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ProviderSession, ProcessorError> {
        let mut request = self
            .client
            .request(method, self.endpoint(path))
            .bearer_auth(self.config.api_key.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable(e.to_string()))?;
        Self::into_session(response).await
    }

    async fn into_session(response: reqwest::Response) -> Result<ProviderSession, ProcessorError> {
        let status = response.status();
        if status.is_success() {
            let wire: WireSession = response
                .json()
                .await
                .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;
            return Ok(ProviderSession {
                id: wire.id,
                status: ProviderSessionStatus::from_wire(&wire.status),
                client_token: wire.client_token,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let wire: WireError = serde_json::from_str(&body).unwrap_or(WireError {
            code: String::new(),
            message: body.clone(),
        });
        Err(Self::classify(status, wire))
    }

    fn classify(status: StatusCode, wire: WireError) -> ProcessorError {
        if status.is_server_error() {
            return ProcessorError::Unavailable(format!("{}: {}", status, wire.message));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ProcessorError::Unauthorized;
        }
        if wire.code == "provider_not_found" || wire.code == "unknown_provider" {
            return ProcessorError::UnknownProvider {
                provider_id: String::new(),
                message: wire.message,
            };
        }
        ProcessorError::Rejected { code: wire.code, message: wire.message }
    }
}

#[async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn create_session(
        &self,
        provider_id: &str,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProcessorError> {
        let body = WireCreateSession {
            provider_id,
            amount: request.amount,
            currency: &request.currency,
            customer_email: request.email.as_deref(),
            metadata: WireMetadata { cart_id: &request.cart_id },
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;
        self.execute(Method::POST, "/v1/sessions", Some(body))
            .await
            .map_err(|err| match err {
                // stamp the candidate onto the rejection so callers can log it
                ProcessorError::UnknownProvider { message, .. } => ProcessorError::UnknownProvider {
                    provider_id: provider_id.to_string(),
                    message,
                },
                other => other,
            })
    }

    async fn retrieve_session(
        &self,
        provider_session_id: &str,
    ) -> Result<ProviderSession, ProcessorError> {
        self.execute(Method::GET, &format!("/v1/sessions/{provider_session_id}"), None)
            .await
    }

    async fn capture(&self, provider_session_id: &str) -> Result<ProviderSession, ProcessorError> {
        self.execute(
            Method::POST,
            &format!("/v1/sessions/{provider_session_id}/capture"),
            None,
        )
        .await
    }

    async fn cancel(&self, provider_session_id: &str) -> Result<ProviderSession, ProcessorError> {
        self.execute(
            Method::POST,
            &format!("/v1/sessions/{provider_session_id}/cancel"),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn processor(base_url: &str) -> HttpProcessor {
        HttpProcessor::new(ProcessorConfig {
            api_base_url: base_url.to_string(),
            api_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
        })
    }

    fn request() -> SessionRequest {
        SessionRequest {
            cart_id: "cart_1".into(),
            amount: 11_000,
            currency: "usd".into(),
            email: Some("buyer@example.com".into()),
        }
    }

    #[tokio::test]
    async fn create_session_returns_client_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(body_partial_json(json!({"provider_id": "stripe", "amount": 11_000})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "ps_abc",
                "status": "requires_action",
                "client_token": "tok_secret"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = processor(&server.uri()).create_session("stripe", &request()).await.unwrap();
        assert_eq!(session.id, "ps_abc");
        assert_eq!(session.status, ProviderSessionStatus::RequiresAction);
        assert_eq!(session.client_token.as_deref(), Some("tok_secret"));
    }

    #[tokio::test]
    async fn unknown_provider_is_deterministic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": "provider_not_found",
                "message": "no provider pp_stripe_stripe"
            })))
            .mount(&server)
            .await;

        let err = processor(&server.uri())
            .create_session("pp_stripe_stripe", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::UnknownProvider { ref provider_id, .. }
            if provider_id == "pp_stripe_stripe"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = processor(&server.uri()).create_session("stripe", &request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn cancel_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/ps_abc/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ps_abc",
                "status": "canceled"
            })))
            .mount(&server)
            .await;

        let session = processor(&server.uri()).cancel("ps_abc").await.unwrap();
        assert_eq!(session.status, ProviderSessionStatus::Canceled);
    }
}
