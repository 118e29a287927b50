//! Service configuration from the environment.

use anyhow::{Context, Result};
use secrecy::Secret;
use std::env;
use std::time::Duration;

use crate::checkout::PollConfig;
use crate::provider::ProcessorConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub processor: ProcessorConfig,
    /// Ordered provider identifier candidates for payment negotiation.
    pub provider_candidates: Vec<String>,
    pub poll: PollConfig,
    pub nats_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8084".to_string())
            .parse()
            .context("PORT must be a number")?;

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let processor = ProcessorConfig {
            api_base_url: env::var("PROCESSOR_API_URL")
                .context("PROCESSOR_API_URL must be set")?,
            api_key: Secret::new(
                env::var("PROCESSOR_API_KEY").context("PROCESSOR_API_KEY must be set")?,
            ),
            webhook_secret: Secret::new(
                env::var("PROCESSOR_WEBHOOK_SECRET")
                    .context("PROCESSOR_WEBHOOK_SECRET must be set")?,
            ),
        };

        // identifier aliases the integration has answered to across
        // deployments, most likely first
        let provider_candidates = env::var("PROVIDER_CANDIDATES")
            .unwrap_or_else(|_| "pp_stripe_stripe,stripe".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let poll = PollConfig {
            max_attempts: env::var("ORDER_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            interval: Duration::from_millis(
                env::var("ORDER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2000),
            ),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig { url: Secret::new(database_url), max_connections },
            processor,
            provider_candidates,
            poll,
            nats_url: env::var("NATS_URL").ok(),
        })
    }
}
