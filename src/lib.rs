pub mod admin;
pub mod auth;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod extractor;
pub mod payments;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod store;
pub mod webhooks;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

pub use state::AppState;

async fn root() -> &'static str {
    "ENEM Pro API"
}

/// Full application router over `state`, without the metrics layer.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(routes::api_routes())
        .layer(Extension(state))
}
