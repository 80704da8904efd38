use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::payments::WebhookOutcome;
use crate::state::AppState;
use crate::store::SettlementStatus;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    pub settlement: Option<SettlementStatus>,
}

/// key: webhooks-payments -> signed charge confirmations into the ledger
pub async fn payment_webhook(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let Some(verifier) = state.verifier.as_ref() else {
        warn!("payment webhook called without a configured secret");
        return Err(AppError::Unauthorized);
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match verifier.verify(&body, signature, Utc::now())? {
        WebhookOutcome::Confirmed(confirmation) => {
            let settlement = state.ledger.apply(confirmation).await?;
            Ok(Json(WebhookAck {
                received: true,
                settlement: Some(settlement),
            }))
        }
        WebhookOutcome::Ignored { event } => {
            debug!(%event, "payment webhook event ignored");
            Ok(Json(WebhookAck {
                received: true,
                settlement: None,
            }))
        }
    }
}
