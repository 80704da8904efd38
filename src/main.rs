use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use enempro_backend::{
    config,
    payments::WebhookVerifier,
    state::{AppState, SessionKeys},
    store::PgStore,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let session_keys = SessionKeys::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let verifier = config::PAYMENT_WEBHOOK_SECRET
        .as_deref()
        .map(WebhookVerifier::new);
    if verifier.is_none() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set; payment webhooks will be rejected");
    }
    let state = Arc::new(AppState::new(
        Arc::new(PgStore::new(pool)),
        config::ADMIN_EMAILS.clone(),
        session_keys,
        verifier,
    ));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = enempro_backend::app(state)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
