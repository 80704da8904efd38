use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::entitlements::{Plan, Principal, Role, Status};
use crate::error::{AppError, AppResult};
use crate::extractor::{SessionUser, SESSION_COOKIE};
use crate::sessions::SessionOutcome;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub email: String,
    pub role: Role,
    pub plan: Plan,
    pub status: Status,
    pub purchase_date: Option<chrono::DateTime<Utc>>,
}

impl From<Principal> for UserInfo {
    fn from(principal: Principal) -> Self {
        Self {
            email: principal.email,
            role: principal.role,
            plan: principal.plan,
            status: principal.status,
            purchase_date: principal.purchase_date,
        }
    }
}

pub async fn login_user(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<UserInfo>)> {
    let principal = match state.sessions.login(&payload.email).await? {
        SessionOutcome::SignedIn(principal) => principal,
        SessionOutcome::NotFound => return Err(AppError::NotFound),
        SessionOutcome::Blocked => return Err(AppError::Forbidden),
    };
    let user = SessionUser {
        email: principal.email.clone(),
        role: principal.role,
    };
    let token = state.session_keys.issue(&user, Utc::now())?;
    let max_age = state.session_keys.ttl().num_seconds();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        format!(
            "{SESSION_COOKIE}={token}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={max_age}"
        )
        .parse()
        .expect("valid header value"),
    );
    Ok((headers, Json(principal.into())))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        format!("{SESSION_COOKIE}=deleted; HttpOnly; Path=/; Max-Age=0")
            .parse()
            .expect("valid header value"),
    );
    (headers, "Logged out")
}

pub async fn current_user(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
) -> AppResult<Json<UserInfo>> {
    let principal = state.signed_in(&user).await?;
    Ok(Json(principal.into()))
}
