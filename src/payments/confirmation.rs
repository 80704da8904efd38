use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::entitlements::{normalize_email, pricing, Plan};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";
const CHARGE_PAID_EVENT: &str = "charge.paid";

/// key: payment-event -> entitlement effect of a confirmed charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentEvent {
    PlanPurchase { plan: Plan, amount_cents: i64 },
    PlanUpgrade { target: Plan },
    ExtraEssayCredits { quantity: u32 },
    Activation,
}

impl PaymentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentEvent::PlanPurchase { .. } => "plan_purchase",
            PaymentEvent::PlanUpgrade { .. } => "plan_upgrade",
            PaymentEvent::ExtraEssayCredits { .. } => "extra_essays",
            PaymentEvent::Activation => "activation",
        }
    }
}

/// Proof that a charge was confirmed by the payment side. There is no public
/// constructor: only the signed webhook path and the charge poller mint one.
#[derive(Debug)]
pub struct PaymentConfirmation {
    charge_id: String,
    email: String,
    customer_name: Option<String>,
    event: PaymentEvent,
    confirmed_at: DateTime<Utc>,
}

impl PaymentConfirmation {
    pub(crate) fn new(
        charge_id: String,
        email: String,
        customer_name: Option<String>,
        event: PaymentEvent,
        confirmed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            charge_id,
            email,
            customer_name,
            event,
            confirmed_at,
        }
    }

    pub fn charge_id(&self) -> &str {
        &self.charge_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn event(&self) -> &PaymentEvent {
        &self.event
    }

    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }

    pub(crate) fn into_parts(self) -> (String, String, Option<String>, PaymentEvent) {
        (self.charge_id, self.email, self.customer_name, self.event)
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("missing webhook signature")]
    MissingSignature,
    #[error("webhook signature mismatch")]
    InvalidSignature,
    #[error("malformed payment payload: {0}")]
    MalformedPayload(String),
    #[error("payment payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payment store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookPayload {
    pub event: String,
    #[serde(default)]
    pub data: Option<ChargeData>,
}

#[derive(Debug, Deserialize)]
pub struct ChargeData {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    pub customer: ChargeCustomer,
    #[serde(default)]
    pub metadata: ChargeMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ChargeCustomer {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChargeMetadata {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    Confirmed(PaymentConfirmation),
    Ignored { event: String },
}

/// key: payment-webhook-verifier -> hmac gate in front of the ledger
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC can use any key length")
    }

    /// Signature header value for `body`, in the `sha256=<hex>` form.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, PaymentError> {
        let signature = signature.ok_or(PaymentError::MissingSignature)?;
        let digest = signature
            .trim()
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|encoded| hex::decode(encoded).ok())
            .ok_or(PaymentError::InvalidSignature)?;
        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&digest)
            .map_err(|_| PaymentError::InvalidSignature)?;

        let payload: PaymentWebhookPayload = serde_json::from_slice(body)?;
        if payload.event != CHARGE_PAID_EVENT {
            return Ok(WebhookOutcome::Ignored {
                event: payload.event,
            });
        }
        let data = payload
            .data
            .ok_or_else(|| PaymentError::MalformedPayload("charge data missing".into()))?;
        confirmation_from_charge(data, now).map(WebhookOutcome::Confirmed)
    }
}

pub(crate) fn confirmation_from_charge(
    data: ChargeData,
    now: DateTime<Utc>,
) -> Result<PaymentConfirmation, PaymentError> {
    if data.id.trim().is_empty() {
        return Err(PaymentError::MalformedPayload("charge id missing".into()));
    }
    let email = normalize_email(&data.customer.email)
        .map_err(|err| PaymentError::MalformedPayload(err.to_string()))?;
    let event = event_from_metadata(&data.metadata, data.amount)?;
    Ok(PaymentConfirmation::new(
        data.id,
        email,
        data.customer.name,
        event,
        now,
    ))
}

fn event_from_metadata(
    metadata: &ChargeMetadata,
    amount: Option<i64>,
) -> Result<PaymentEvent, PaymentError> {
    let Some(kind) = metadata.kind.as_deref() else {
        return Ok(PaymentEvent::Activation);
    };
    match kind {
        "plan_purchase" => {
            let plan = sold_plan(metadata.plan.as_deref())?;
            let amount_cents = amount
                .filter(|amount| *amount > 0)
                .or_else(|| pricing::checkout_price(plan).map(|price| i64::from(price.get())))
                .unwrap_or(0);
            Ok(PaymentEvent::PlanPurchase { plan, amount_cents })
        }
        "plan_upgrade" => Ok(PaymentEvent::PlanUpgrade {
            target: sold_plan(metadata.plan.as_deref())?,
        }),
        "extra_essays" => {
            let quantity = metadata.quantity.unwrap_or(1);
            if quantity == 0 {
                return Err(PaymentError::MalformedPayload(
                    "extra essay quantity must be positive".into(),
                ));
            }
            Ok(PaymentEvent::ExtraEssayCredits { quantity })
        }
        "activation" => Ok(PaymentEvent::Activation),
        other => Err(PaymentError::MalformedPayload(format!(
            "unsupported charge kind `{other}`"
        ))),
    }
}

fn sold_plan(raw: Option<&str>) -> Result<Plan, PaymentError> {
    match Plan::from_raw(raw) {
        Plan::None => Err(PaymentError::MalformedPayload(
            "charge does not name a known plan".into(),
        )),
        plan => Ok(plan),
    }
}
