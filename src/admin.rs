use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::entitlements::{normalize_email, pricing, EngineError, Plan, Principal, Status};
use crate::error::{AppError, AppResult};
use crate::extractor::SessionUser;
use crate::state::AppState;
use crate::store::{LeadDraft, LeadRecord, LeadStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadFilter {
    #[default]
    All,
    Active,
    Blocked,
}

impl LeadFilter {
    fn matches(&self, lead: &LeadRecord) -> bool {
        match self {
            LeadFilter::All => true,
            LeadFilter::Active => Status::normalize(lead.status.as_deref()) == Status::Active,
            LeadFilter::Blocked => lead.is_blocked(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdminSummary {
    pub total_sales_cents: i64,
    pub total: usize,
    pub active: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLead {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub plan: String,
}

/// Gate for back-office operations. Independent of plan and status.
pub fn require_admin(principal: Option<&Principal>) -> Result<(), EngineError> {
    match principal {
        Some(principal) if principal.is_admin() => Ok(()),
        _ => Err(EngineError::Forbidden),
    }
}

/// key: admin-back-office -> lead management for operators
#[derive(Clone)]
pub struct AdminService {
    leads: Arc<dyn LeadStore>,
}

impl AdminService {
    pub fn new(leads: Arc<dyn LeadStore>) -> Self {
        Self { leads }
    }

    /// Case-insensitive search over email and name.
    pub async fn list(
        &self,
        filter: LeadFilter,
        search: Option<&str>,
    ) -> Result<Vec<LeadRecord>, EngineError> {
        let needle = search
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        let leads = self.leads.list_leads().await?;
        Ok(leads
            .into_iter()
            .filter(|lead| filter.matches(lead))
            .filter(|lead| match &needle {
                None => true,
                Some(needle) => {
                    lead.email.to_lowercase().contains(needle)
                        || lead
                            .name
                            .as_deref()
                            .map(|name| name.to_lowercase().contains(needle))
                            .unwrap_or(false)
                }
            })
            .collect())
    }

    /// Manual sale: active immediately, purchase date now, price from the
    /// back-office table.
    pub async fn create_lead(&self, new_lead: NewLead) -> Result<LeadRecord, EngineError> {
        let email = normalize_email(&new_lead.email)?;
        if !email.contains('@') {
            return Err(EngineError::InvalidPrincipalData(format!(
                "`{email}` is not an email address"
            )));
        }
        let plan = Plan::normalize(&new_lead.plan);
        if plan == Plan::None {
            return Err(EngineError::InvalidPrincipalData(format!(
                "unknown plan `{}`",
                new_lead.plan
            )));
        }
        if self.leads.find_lead(&email).await?.is_some() {
            return Err(EngineError::InvalidPrincipalData(format!(
                "lead {email} already exists"
            )));
        }
        let record = self
            .leads
            .insert_lead(LeadDraft {
                email,
                name: new_lead.name.filter(|name| !name.trim().is_empty()),
                phone: new_lead.phone.filter(|phone| !phone.trim().is_empty()),
                plan,
                status: Status::Active,
                purchase_price_cents: pricing::back_office_price(plan)
                    .map(|price| i64::from(price.get())),
                purchase_date: Utc::now(),
            })
            .await?;
        info!(email = %record.email, %plan, "lead created from back office");
        Ok(record)
    }

    /// Flips `active` to `blocked`; anything else becomes `active`.
    pub async fn toggle_status(&self, id: Uuid) -> Result<Option<LeadRecord>, EngineError> {
        let Some(lead) = self.leads.find_lead_by_id(id).await? else {
            return Ok(None);
        };
        let next = Status::normalize(lead.status.as_deref()).toggled();
        let updated = self.leads.set_status(id, next).await?;
        info!(lead_id = %id, status = next.as_str(), "lead status toggled");
        Ok(updated)
    }

    pub async fn summary(&self) -> Result<AdminSummary, EngineError> {
        let leads = self.leads.list_leads().await?;
        Ok(AdminSummary {
            total_sales_cents: leads
                .iter()
                .filter_map(|lead| lead.purchase_price_cents)
                .sum(),
            total: leads.len(),
            active: leads
                .iter()
                .filter(|lead| LeadFilter::Active.matches(lead))
                .count(),
            blocked: leads.iter().filter(|lead| lead.is_blocked()).count(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadQuery {
    #[serde(default)]
    pub status: LeadFilter,
    #[serde(default)]
    pub search: Option<String>,
}

async fn require_admin_session(state: &AppState, user: &SessionUser) -> AppResult<()> {
    let principal = state.sessions.resolve(user).await?.signed_in();
    require_admin(principal.as_ref())?;
    Ok(())
}

pub async fn list_leads(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
    Query(query): Query<LeadQuery>,
) -> AppResult<Json<Vec<LeadRecord>>> {
    require_admin_session(&state, &user).await?;
    let leads = state
        .admin
        .list(query.status, query.search.as_deref())
        .await?;
    Ok(Json(leads))
}

pub async fn create_lead(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
    Json(payload): Json<NewLead>,
) -> AppResult<(StatusCode, Json<LeadRecord>)> {
    require_admin_session(&state, &user).await?;
    let lead = state.admin.create_lead(payload).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

pub async fn toggle_lead_status(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LeadRecord>> {
    require_admin_session(&state, &user).await?;
    let lead = state
        .admin
        .toggle_status(id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(lead))
}

pub async fn summary(
    Extension(state): Extension<Arc<AppState>>,
    user: SessionUser,
) -> AppResult<Json<AdminSummary>> {
    require_admin_session(&state, &user).await?;
    Ok(Json(state.admin.summary().await?))
}
