use std::sync::Arc;

use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::entitlements::Role;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session_token";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    exp: usize,
}

/// Identity carried by a session token. Entitlements are never read from the
/// token; handlers reload the principal through `SessionService::resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub email: String,
    pub role: Role,
}

pub fn issue_token(
    user: &SessionUser,
    secret: &str,
    expires_at: DateTime<Utc>,
) -> jsonwebtoken::errors::Result<String> {
    let claims = Claims {
        sub: user.email.clone(),
        role: user.role.as_str().to_string(),
        exp: expires_at.timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn token_from_parts(parts: &Parts) -> Option<String> {
    let from_cookie = parts
        .headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|c| {
                c.trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(|s| s.to_string())
            })
        });
    from_cookie.or_else(|| {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|authz| authz.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer ").map(|s| s.to_string()))
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token =
            token_from_parts(parts).ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        let state = parts.extensions.get::<Arc<AppState>>().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Application state missing".into(),
        ))?;
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(state.session_keys.secret().as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        Ok(SessionUser {
            email: decoded.claims.sub,
            role: Role::from_claim(&decoded.claims.role),
        })
    }
}
