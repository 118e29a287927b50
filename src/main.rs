//! Commerce Checkout - service entrypoint

use anyhow::Result;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commerce_checkout::checkout::{OrderCommitter, OrderPoller, PaymentNegotiator};
use commerce_checkout::config::Config;
use commerce_checkout::http::{self, AppState};
use commerce_checkout::provider::{HttpProcessor, PaymentProcessor};
use commerce_checkout::publisher::EventPublisher;
use commerce_checkout::store::{CartStore, OrderStore, PgStore, SessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(config.database.url.expose_secret())
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(%err, "NATS unavailable, events disabled");
                None
            }
        },
        None => None,
    };
    let publisher = EventPublisher::new(nats);

    let store = PgStore::new(db);
    let carts: Arc<dyn CartStore> = Arc::new(store.clone());
    let sessions: Arc<dyn SessionStore> = Arc::new(store.clone());
    let orders: Arc<dyn OrderStore> = Arc::new(store);
    let processor: Arc<dyn PaymentProcessor> =
        Arc::new(HttpProcessor::new(config.processor.clone()));

    let negotiator = Arc::new(PaymentNegotiator::new(
        processor.clone(),
        sessions.clone(),
        publisher.clone(),
        config.provider_candidates.clone(),
    ));
    let committer = Arc::new(OrderCommitter::new(
        carts.clone(),
        sessions.clone(),
        orders.clone(),
        processor,
        publisher.clone(),
    ));
    let poller = Arc::new(OrderPoller::new(orders.clone(), config.poll.clone()));

    let state = AppState {
        carts,
        sessions,
        orders,
        negotiator,
        committer,
        poller,
        publisher,
        webhook_secret: config.processor.webhook_secret.clone(),
    };
    let app = http::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("commerce-checkout listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
