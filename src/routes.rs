use axum::{
    routing::{get, post},
    Router,
};

use crate::{admin, auth, entitlements::api as entitlements, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route("/api/access", get(entitlements::check_access))
        .route("/api/essays/usage", get(entitlements::essay_usage))
        .route(
            "/api/essays/consume",
            post(entitlements::consume_essay_credit),
        )
        .route("/api/upgrade-quote", get(entitlements::upgrade_quote))
        .route("/api/webhooks/payments", post(webhooks::payment_webhook))
        .route(
            "/api/admin/leads",
            get(admin::list_leads).post(admin::create_lead),
        )
        .route(
            "/api/admin/leads/:id/toggle-status",
            post(admin::toggle_lead_status),
        )
        .route("/api/admin/summary", get(admin::summary))
}
