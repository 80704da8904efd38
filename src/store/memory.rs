use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ChargeSettlement, LeadDraft, LeadRecord, LeadStore, PaymentStore, SettlementStatus, UsageStore,
};
use crate::entitlements::{Status, UsageCounter};
use crate::payments::PaymentEvent;

#[derive(Default)]
struct LeadTable {
    by_email: HashMap<String, LeadRecord>,
    settled: HashSet<String>,
}

impl LeadTable {
    fn upsert_paid(
        &mut self,
        email: &str,
        name: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> &mut LeadRecord {
        let lead = self
            .by_email
            .entry(email.to_string())
            .or_insert_with(|| LeadRecord {
                id: Uuid::new_v4(),
                email: email.to_string(),
                name: None,
                phone: None,
                plan: None,
                status: None,
                purchase_date: None,
                purchase_price_cents: None,
                last_payment_date: None,
                created_at: paid_at,
            });
        if lead.name.is_none() {
            lead.name = name.map(str::to_string);
        }
        lead.status = Some(Status::Active.as_str().to_string());
        lead.last_payment_date = Some(paid_at);
        lead
    }
}

/// key: memory-store -> in-process leads, usage and settlements
///
/// Usage counters live in a `DashMap` so each conditional update runs under
/// the entry's shard lock. Leads and the settled-charge set share one
/// `RwLock` so a settlement and its effect land together.
#[derive(Default)]
pub struct MemoryStore {
    leads: RwLock<LeadTable>,
    usage: DashMap<String, UsageCounter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the usage counter for `email`.
    pub fn seed_usage(&self, email: &str, counter: UsageCounter) {
        self.usage.insert(email.to_string(), counter);
    }

    /// Stores a lead row as-is, including legacy rows whose plan or status
    /// text never went through `LeadDraft`.
    pub async fn seed_lead(&self, lead: LeadRecord) {
        self.leads
            .write()
            .await
            .by_email
            .insert(lead.email.clone(), lead);
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn find_lead(&self, email: &str) -> Result<Option<LeadRecord>> {
        Ok(self.leads.read().await.by_email.get(email).cloned())
    }

    async fn find_lead_by_id(&self, id: Uuid) -> Result<Option<LeadRecord>> {
        Ok(self
            .leads
            .read()
            .await
            .by_email
            .values()
            .find(|lead| lead.id == id)
            .cloned())
    }

    async fn list_leads(&self) -> Result<Vec<LeadRecord>> {
        let mut leads: Vec<LeadRecord> =
            self.leads.read().await.by_email.values().cloned().collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(leads)
    }

    async fn insert_lead(&self, draft: LeadDraft) -> Result<LeadRecord> {
        let mut table = self.leads.write().await;
        if table.by_email.contains_key(&draft.email) {
            bail!("lead {} already exists", draft.email);
        }
        let record = draft.into_record(Uuid::new_v4(), Utc::now());
        table.by_email.insert(record.email.clone(), record.clone());
        Ok(record)
    }

    async fn set_status(&self, id: Uuid, status: Status) -> Result<Option<LeadRecord>> {
        let mut table = self.leads.write().await;
        let Some(lead) = table.by_email.values_mut().find(|lead| lead.id == id) else {
            return Ok(None);
        };
        lead.status = Some(status.as_str().to_string());
        Ok(Some(lead.clone()))
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn usage(&self, email: &str) -> Result<UsageCounter> {
        Ok(self
            .usage
            .get(email)
            .map(|counter| *counter)
            .unwrap_or_default())
    }

    async fn increment_usage_within(
        &self,
        email: &str,
        ceiling: u32,
    ) -> Result<Option<UsageCounter>> {
        let mut counter = self.usage.entry(email.to_string()).or_default();
        if !counter.has_quota(ceiling) {
            return Ok(None);
        }
        counter.essays_used_this_month += 1;
        Ok(Some(*counter))
    }

    async fn debit_extra_balance(&self, email: &str) -> Result<Option<UsageCounter>> {
        let Some(mut counter) = self.usage.get_mut(email) else {
            return Ok(None);
        };
        match counter.debit_extra() {
            Ok(()) => Ok(Some(*counter)),
            Err(_) => Ok(None),
        }
    }

    async fn release_usage(&self, email: &str) -> Result<UsageCounter> {
        let mut counter = self.usage.entry(email.to_string()).or_default();
        counter.essays_used_this_month = counter.essays_used_this_month.saturating_sub(1);
        Ok(*counter)
    }

    async fn restore_extra_balance(&self, email: &str) -> Result<UsageCounter> {
        let mut counter = self.usage.entry(email.to_string()).or_default();
        counter.credit_extra(1);
        Ok(*counter)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn settle_charge(&self, settlement: &ChargeSettlement) -> Result<SettlementStatus> {
        let mut table = self.leads.write().await;
        if table.settled.contains(settlement.charge_id()) {
            return Ok(SettlementStatus::AlreadySettled);
        }

        let email = settlement.email();
        let paid_at = settlement.settled_at();
        match settlement.event() {
            PaymentEvent::PlanPurchase { plan, amount_cents } => {
                let lead = table.upsert_paid(email, settlement.customer_name(), paid_at);
                lead.plan = Some(plan.as_str().to_string());
                lead.purchase_price_cents = Some(*amount_cents);
                lead.purchase_date = Some(paid_at.to_rfc3339());
            }
            PaymentEvent::PlanUpgrade { target } => {
                let lead = table
                    .by_email
                    .get_mut(email)
                    .ok_or_else(|| anyhow!("no lead for {email} to upgrade"))?;
                lead.plan = Some(target.as_str().to_string());
                lead.last_payment_date = Some(paid_at);
            }
            PaymentEvent::ExtraEssayCredits { quantity } => {
                self.usage
                    .entry(email.to_string())
                    .or_default()
                    .credit_extra(*quantity);
            }
            PaymentEvent::Activation => {
                table.upsert_paid(email, settlement.customer_name(), paid_at);
            }
        }

        table.settled.insert(settlement.charge_id().to_string());
        Ok(SettlementStatus::Applied)
    }
}
