use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    compute_upgrade_delta, decide_access, AccessDecision, CreditSource, Plan, PlanLevel,
    UsageCounter, UsageSnapshot,
};
use crate::error::{AppError, AppResult};
use crate::extractor::SessionUser;
use crate::state::AppState;

/// key: entitlements-api -> rest endpoints over the engine
#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    #[serde(default)]
    pub required: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessResponse {
    pub decision: AccessDecision,
    pub required: Option<PlanLevel>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumeResponse {
    pub allowed: bool,
    pub source: CreditSource,
    pub counter: UsageCounter,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeQuoteQuery {
    pub current: String,
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgradeQuote {
    pub current: Plan,
    pub target: Plan,
    pub amount_cents: u32,
}

/// Always answers 200; denials are values in the body.
pub async fn check_access(
    Extension(state): Extension<Arc<AppState>>,
    user: Option<SessionUser>,
    Query(query): Query<AccessQuery>,
) -> AppResult<Json<AccessResponse>> {
    let required = query
        .required
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<PlanLevel>)
        .transpose()?;
    let principal = match user {
        Some(user) => state.sessions.resolve(&user).await?.signed_in(),
        None => None,
    };
    let decision = decide_access(principal.as_ref(), required, Utc::now());
    if !decision.is_granted() {
        tracing::debug!(
            email = principal.as_ref().map(|p| p.email.as_str()),
            decision = decision.as_str(),
            "access denied"
        );
    }
    Ok(Json(AccessResponse { decision, required }))
}

pub async fn essay_usage(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
) -> AppResult<Json<UsageSnapshot>> {
    let principal = state.signed_in(&user).await?;
    Ok(Json(state.metering.usage(&principal).await?))
}

/// Commits one correction credit. Exhaustion surfaces as 402.
pub async fn consume_essay_credit(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
) -> AppResult<Json<ConsumeResponse>> {
    let principal = state.signed_in(&user).await?;
    if !decide_access(Some(&principal), None, Utc::now()).is_granted() {
        return Err(AppError::Forbidden);
    }
    let credit = state.metering.consume(&principal).await?;
    Ok(Json(ConsumeResponse {
        allowed: true,
        source: credit.source(),
        counter: credit.counter(),
    }))
}

pub async fn upgrade_quote(Query(query): Query<UpgradeQuoteQuery>) -> Json<UpgradeQuote> {
    let current = Plan::normalize(&query.current);
    let target = Plan::normalize(&query.target);
    Json(UpgradeQuote {
        current,
        target,
        amount_cents: compute_upgrade_delta(current, target).get(),
    })
}
