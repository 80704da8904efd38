//! Persistence seams consumed by the entitlement engine.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::entitlements::{Plan, Status, UsageCounter};
use crate::payments::{PaymentConfirmation, PaymentEvent};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// key: lead-record -> raw back-office row
///
/// Plan, status and purchase date stay as the stored text; `Principal::from_lead`
/// owns their normalization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeadRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub plan: Option<String>,
    pub status: Option<String>,
    pub purchase_date: Option<String>,
    pub purchase_price_cents: Option<i64>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LeadRecord {
    /// True only for an explicit `blocked` flag.
    pub fn is_blocked(&self) -> bool {
        self.status
            .as_deref()
            .map(|status| status.trim().eq_ignore_ascii_case("blocked"))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn sample(email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: None,
            phone: None,
            plan: None,
            status: None,
            purchase_date: None,
            purchase_price_cents: None,
            last_payment_date: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadDraft {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub plan: Plan,
    pub status: Status,
    pub purchase_price_cents: Option<i64>,
    pub purchase_date: DateTime<Utc>,
}

impl LeadDraft {
    fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> LeadRecord {
        LeadRecord {
            id,
            email: self.email,
            name: self.name,
            phone: self.phone,
            plan: Some(self.plan.as_str().to_string()),
            status: Some(self.status.as_str().to_string()),
            purchase_date: Some(self.purchase_date.to_rfc3339()),
            purchase_price_cents: self.purchase_price_cents,
            last_payment_date: None,
            created_at,
        }
    }
}

/// A confirmed charge ready to be written. Only buildable from a
/// `PaymentConfirmation`, so stores never see unconfirmed mutations.
#[derive(Debug, Clone)]
pub struct ChargeSettlement {
    charge_id: String,
    email: String,
    customer_name: Option<String>,
    event: PaymentEvent,
    settled_at: DateTime<Utc>,
}

impl ChargeSettlement {
    pub(crate) fn from_confirmation(confirmation: PaymentConfirmation) -> Self {
        let settled_at = confirmation.confirmed_at();
        let (charge_id, email, customer_name, event) = confirmation.into_parts();
        Self {
            charge_id,
            email,
            customer_name,
            event,
            settled_at,
        }
    }

    pub fn charge_id(&self) -> &str {
        &self.charge_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.customer_name.as_deref()
    }

    pub fn event(&self) -> &PaymentEvent {
        &self.event
    }

    pub fn settled_at(&self) -> DateTime<Utc> {
        self.settled_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Applied,
    AlreadySettled,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_lead(&self, email: &str) -> Result<Option<LeadRecord>>;
    async fn find_lead_by_id(&self, id: Uuid) -> Result<Option<LeadRecord>>;
    /// Newest first.
    async fn list_leads(&self) -> Result<Vec<LeadRecord>>;
    /// Fails when a lead with the same email already exists.
    async fn insert_lead(&self, draft: LeadDraft) -> Result<LeadRecord>;
    async fn set_status(&self, id: Uuid, status: Status) -> Result<Option<LeadRecord>>;
}

/// Every mutating call is a single atomic conditional update keyed by email.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn usage(&self, email: &str) -> Result<UsageCounter>;
    /// Increments monthly usage only while it is below `ceiling`.
    async fn increment_usage_within(&self, email: &str, ceiling: u32)
        -> Result<Option<UsageCounter>>;
    /// Decrements the extra balance only while it is above zero.
    async fn debit_extra_balance(&self, email: &str) -> Result<Option<UsageCounter>>;
    async fn release_usage(&self, email: &str) -> Result<UsageCounter>;
    async fn restore_extra_balance(&self, email: &str) -> Result<UsageCounter>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Applies the settlement at most once per charge id.
    async fn settle_charge(&self, settlement: &ChargeSettlement) -> Result<SettlementStatus>;
}
