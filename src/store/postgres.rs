use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    ChargeSettlement, LeadDraft, LeadRecord, LeadStore, PaymentStore, SettlementStatus, UsageStore,
};
use crate::entitlements::{Status, UsageCounter};
use crate::payments::PaymentEvent;

const LEAD_COLUMNS: &str = "id, email, name, phone, plan, status, purchase_date, \
     purchase_price_cents, last_payment_date, created_at";

#[derive(Debug, FromRow)]
struct UsageRow {
    essays_current_month: i32,
    essays_extra_balance: i32,
}

impl UsageRow {
    fn into_counter(self) -> Result<UsageCounter> {
        Ok(UsageCounter::new(
            u32::try_from(self.essays_current_month)
                .context("negative essays_current_month in essay_usage")?,
            u32::try_from(self.essays_extra_balance)
                .context("negative essays_extra_balance in essay_usage")?,
        ))
    }
}

fn as_column(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow!("value {value} does not fit essay_usage"))
}

/// key: postgres-store -> sqlx-backed leads, usage and settlements
///
/// Metering mutations are single conditional statements; the row-level lock
/// Postgres takes for `UPDATE ... WHERE` serializes concurrent consumers.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn find_lead(&self, email: &str) -> Result<Option<LeadRecord>> {
        let lead = sqlx::query_as::<_, LeadRecord>(&format!(
            "SELECT {LEAD_COLUMNS} FROM saas_leads WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }

    async fn find_lead_by_id(&self, id: Uuid) -> Result<Option<LeadRecord>> {
        let lead = sqlx::query_as::<_, LeadRecord>(&format!(
            "SELECT {LEAD_COLUMNS} FROM saas_leads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }

    async fn list_leads(&self) -> Result<Vec<LeadRecord>> {
        let leads = sqlx::query_as::<_, LeadRecord>(&format!(
            "SELECT {LEAD_COLUMNS} FROM saas_leads ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(leads)
    }

    async fn insert_lead(&self, draft: LeadDraft) -> Result<LeadRecord> {
        let record = draft.into_record(Uuid::new_v4(), chrono::Utc::now());
        let inserted = sqlx::query_as::<_, LeadRecord>(&format!(
            r#"
            INSERT INTO saas_leads (
                id, email, name, phone, plan, status, purchase_date,
                purchase_price_cents, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {LEAD_COLUMNS}
            "#
        ))
        .bind(record.id)
        .bind(&record.email)
        .bind(&record.name)
        .bind(&record.phone)
        .bind(&record.plan)
        .bind(&record.status)
        .bind(&record.purchase_date)
        .bind(record.purchase_price_cents)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            let duplicate = matches!(
                &err,
                sqlx::Error::Database(db_err) if db_err.constraint() == Some("saas_leads_email_key")
            );
            if duplicate {
                anyhow!("lead {} already exists", record.email)
            } else {
                anyhow::Error::new(err)
            }
        })?;
        Ok(inserted)
    }

    async fn set_status(&self, id: Uuid, status: Status) -> Result<Option<LeadRecord>> {
        let lead = sqlx::query_as::<_, LeadRecord>(&format!(
            "UPDATE saas_leads SET status = $2 WHERE id = $1 RETURNING {LEAD_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }
}

#[async_trait]
impl UsageStore for PgStore {
    async fn usage(&self, email: &str) -> Result<UsageCounter> {
        let row = sqlx::query_as::<_, UsageRow>(
            "SELECT essays_current_month, essays_extra_balance FROM essay_usage WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row.into_counter(),
            None => Ok(UsageCounter::default()),
        }
    }

    async fn increment_usage_within(
        &self,
        email: &str,
        ceiling: u32,
    ) -> Result<Option<UsageCounter>> {
        if ceiling == 0 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            INSERT INTO essay_usage (email, essays_current_month, essays_extra_balance)
            VALUES ($1, 1, 0)
            ON CONFLICT (email) DO UPDATE
                SET essays_current_month = essay_usage.essays_current_month + 1,
                    updated_at = NOW()
                WHERE essay_usage.essays_current_month < $2
            RETURNING essays_current_month, essays_extra_balance
            "#,
        )
        .bind(email)
        .bind(as_column(ceiling)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UsageRow::into_counter).transpose()
    }

    async fn debit_extra_balance(&self, email: &str) -> Result<Option<UsageCounter>> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            UPDATE essay_usage
            SET essays_extra_balance = essays_extra_balance - 1, updated_at = NOW()
            WHERE email = $1 AND essays_extra_balance > 0
            RETURNING essays_current_month, essays_extra_balance
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UsageRow::into_counter).transpose()
    }

    async fn release_usage(&self, email: &str) -> Result<UsageCounter> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            INSERT INTO essay_usage (email, essays_current_month, essays_extra_balance)
            VALUES ($1, 0, 0)
            ON CONFLICT (email) DO UPDATE
                SET essays_current_month = GREATEST(essay_usage.essays_current_month - 1, 0),
                    updated_at = NOW()
            RETURNING essays_current_month, essays_extra_balance
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        row.into_counter()
    }

    async fn restore_extra_balance(&self, email: &str) -> Result<UsageCounter> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            INSERT INTO essay_usage (email, essays_current_month, essays_extra_balance)
            VALUES ($1, 0, 1)
            ON CONFLICT (email) DO UPDATE
                SET essays_extra_balance = essay_usage.essays_extra_balance + 1,
                    updated_at = NOW()
            RETURNING essays_current_month, essays_extra_balance
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        row.into_counter()
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn settle_charge(&self, settlement: &ChargeSettlement) -> Result<SettlementStatus> {
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO payment_settlements (charge_id, email, kind, settled_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (charge_id) DO NOTHING
            "#,
        )
        .bind(settlement.charge_id())
        .bind(settlement.email())
        .bind(settlement.event().kind())
        .bind(settlement.settled_at())
        .execute(&mut *tx)
        .await?;
        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SettlementStatus::AlreadySettled);
        }

        match settlement.event() {
            PaymentEvent::PlanPurchase { plan, amount_cents } => {
                sqlx::query(
                    r#"
                    INSERT INTO saas_leads (
                        id, email, name, plan, status, purchase_date,
                        purchase_price_cents, last_payment_date
                    ) VALUES ($1, $2, $3, $4, 'active', $5, $6, $7)
                    ON CONFLICT (email) DO UPDATE SET
                        name = COALESCE(saas_leads.name, EXCLUDED.name),
                        plan = EXCLUDED.plan,
                        status = 'active',
                        purchase_date = EXCLUDED.purchase_date,
                        purchase_price_cents = EXCLUDED.purchase_price_cents,
                        last_payment_date = EXCLUDED.last_payment_date
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(settlement.email())
                .bind(settlement.customer_name())
                .bind(plan.as_str())
                .bind(settlement.settled_at().to_rfc3339())
                .bind(*amount_cents)
                .bind(settlement.settled_at())
                .execute(&mut *tx)
                .await?;
            }
            PaymentEvent::PlanUpgrade { target } => {
                let updated = sqlx::query(
                    "UPDATE saas_leads SET plan = $2, last_payment_date = $3 WHERE email = $1",
                )
                .bind(settlement.email())
                .bind(target.as_str())
                .bind(settlement.settled_at())
                .execute(&mut *tx)
                .await?;
                if updated.rows_affected() == 0 {
                    tx.rollback().await?;
                    return Err(anyhow!("no lead for {} to upgrade", settlement.email()));
                }
            }
            PaymentEvent::ExtraEssayCredits { quantity } => {
                sqlx::query(
                    r#"
                    INSERT INTO essay_usage (email, essays_current_month, essays_extra_balance)
                    VALUES ($1, 0, $2)
                    ON CONFLICT (email) DO UPDATE
                        SET essays_extra_balance = essay_usage.essays_extra_balance + EXCLUDED.essays_extra_balance,
                            updated_at = NOW()
                    "#,
                )
                .bind(settlement.email())
                .bind(as_column(*quantity)?)
                .execute(&mut *tx)
                .await?;
            }
            PaymentEvent::Activation => {
                sqlx::query(
                    r#"
                    INSERT INTO saas_leads (id, email, name, status, last_payment_date)
                    VALUES ($1, $2, $3, 'active', $4)
                    ON CONFLICT (email) DO UPDATE SET
                        name = COALESCE(saas_leads.name, EXCLUDED.name),
                        status = 'active',
                        last_payment_date = EXCLUDED.last_payment_date
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(settlement.email())
                .bind(settlement.customer_name())
                .bind(settlement.settled_at())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(SettlementStatus::Applied)
    }
}
