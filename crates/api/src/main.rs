// Newsletter API server
// Decision: In-memory stores when DATABASE_URL is unset, PostgreSQL otherwise
// Decision: Expiry sweep runs in-process on a fixed interval

use std::sync::Arc;

use anyhow::{Context, Result};
use newsletter_api::api::{build_router, AppState};
use newsletter_api::config::ApiConfig;
use newsletter_api::sweeper::spawn_expiry_sweeper;
use newsletter_api::telemetry::init_tracing;
use newsletter_engine::notify::{LogNotifier, WebhookConfig, WebhookNotifier};
use newsletter_engine::persistence::{
    run_migrations, InMemoryExecutionStore, InMemoryMembershipStore, PostgresExecutionStore,
    PostgresMembershipStore,
};
use newsletter_engine::{ExecutionStore, MembershipStore, Notifier, SubscriptionEngine};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let config = ApiConfig::from_env().context("Invalid configuration")?;

    let (store, members): (Arc<dyn ExecutionStore>, Arc<dyn MembershipStore>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(database_url)
                    .await
                    .context("Failed to connect to database")?;
                run_migrations(&pool)
                    .await
                    .context("Failed to run migrations")?;
                tracing::info!("Using PostgreSQL stores");
                (
                    Arc::new(PostgresExecutionStore::new(pool.clone())),
                    Arc::new(PostgresMembershipStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores (state is lost on restart)");
                (
                    Arc::new(InMemoryExecutionStore::new()),
                    Arc::new(InMemoryMembershipStore::new()),
                )
            }
        };

    let notifier: Arc<dyn Notifier> = match &config.notifier_webhook_url {
        Some(endpoint) => {
            let mut webhook = WebhookConfig::new(endpoint, &config.from_address);
            webhook.auth_token = config.notifier_auth_token.clone();
            tracing::info!("Sending confirmations through mail relay at {}", endpoint);
            Arc::new(WebhookNotifier::new(webhook).context("Invalid notifier configuration")?)
        }
        None => {
            tracing::warn!("NOTIFIER_WEBHOOK_URL not set, confirmation links are only logged");
            Arc::new(LogNotifier)
        }
    };

    let engine = Arc::new(
        SubscriptionEngine::new(store, members, notifier)
            .with_config(config.engine_config().context("Invalid engine configuration")?),
    );

    if let Some(interval) = config.sweep_interval {
        tracing::info!("Expiry sweep every {:?}", interval);
        spawn_expiry_sweeper(engine.clone(), interval);
    }

    let state = AppState::new(
        engine,
        config.redirects.clone(),
        config.confirmation_endpoint.clone(),
    );
    let app = build_router(state, &config.api_prefix);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
