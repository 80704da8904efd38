use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::LeadRecord;

/// key: entitlement-plan -> canonical plan tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Plan {
    None,
    Weekly,
    Pro,
    Advanced,
    LifetimeMedicine,
}

/// Monthly correction ceiling used for any plan without an explicit quota.
pub const DEFAULT_MONTHLY_ESSAY_QUOTA: u32 = 2;

impl Plan {
    /// Maps every known alias onto the canonical tier. Unrecognized values
    /// land on `Plan::None`, which carries the lowest quota and tier.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "start" | "semanal" | "weekly" => Plan::Weekly,
            "pro" => Plan::Pro,
            "advanced" => Plan::Advanced,
            "medicina" | "vitalicio" | "lifetime-medicine" => Plan::LifetimeMedicine,
            _ => Plan::None,
        }
    }

    pub fn from_raw(raw: Option<&str>) -> Self {
        raw.map(Plan::normalize).unwrap_or(Plan::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::None => "none",
            Plan::Weekly => "weekly",
            Plan::Pro => "pro",
            Plan::Advanced => "advanced",
            Plan::LifetimeMedicine => "lifetime-medicine",
        }
    }

    pub fn is_lifetime(&self) -> bool {
        matches!(self, Plan::LifetimeMedicine)
    }

    pub fn is_time_limited(&self) -> bool {
        matches!(self, Plan::Weekly)
    }

    /// Tier used by feature gates. Lifetime covers every tier.
    pub fn level(&self) -> PlanLevel {
        match self {
            Plan::None | Plan::Weekly => PlanLevel::Start,
            Plan::Pro => PlanLevel::Pro,
            Plan::Advanced | Plan::LifetimeMedicine => PlanLevel::Advanced,
        }
    }

    pub fn monthly_essay_quota(&self) -> u32 {
        match self {
            Plan::Weekly => 2,
            Plan::Pro => 4,
            Plan::Advanced => 15,
            Plan::None | Plan::LifetimeMedicine => DEFAULT_MONTHLY_ESSAY_QUOTA,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanLevel {
    Start = 0,
    Pro = 1,
    Advanced = 2,
}

impl PlanLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanLevel::Start => "start",
            PlanLevel::Pro => "pro",
            PlanLevel::Advanced => "advanced",
        }
    }
}

impl FromStr for PlanLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(PlanLevel::Start),
            "pro" => Ok(PlanLevel::Pro),
            "advanced" => Ok(PlanLevel::Advanced),
            other => Err(EngineError::InvalidPrincipalData(format!(
                "unknown plan level `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Blocked,
}

impl Status {
    /// Only an explicit `active` flag counts as active.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if value == "active" => Status::Active,
            _ => Status::Blocked,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Blocked => "blocked",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Status::Active => Status::Blocked,
            Status::Blocked => Status::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn from_claim(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// key: entitlement-principal -> signed-in entitlement snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
    pub plan: Plan,
    pub status: Status,
    pub purchase_date: Option<DateTime<Utc>>,
    pub role: Role,
}

impl Principal {
    pub fn new(email: &str, plan: Plan, status: Status, role: Role) -> Result<Self, EngineError> {
        Ok(Self {
            email: normalize_email(email)?,
            plan,
            status,
            purchase_date: None,
            role,
        })
    }

    pub fn with_purchase_date(mut self, purchase_date: DateTime<Utc>) -> Self {
        self.purchase_date = Some(purchase_date);
        self
    }

    pub fn admin(email: &str) -> Result<Self, EngineError> {
        Self::new(email, Plan::None, Status::Active, Role::Admin)
    }

    /// Normalizes a raw lead row. Only a missing email is rejected; unknown
    /// plans and unreadable dates degrade instead of failing.
    pub fn from_lead(record: &LeadRecord) -> Result<Self, EngineError> {
        let email = normalize_email(&record.email)?;
        let purchase_date = record
            .purchase_date
            .as_deref()
            .and_then(parse_purchase_date);
        if purchase_date.is_none() && record.purchase_date.is_some() {
            tracing::debug!(%email, "unreadable purchase date treated as just purchased");
        }

        Ok(Self {
            email,
            plan: Plan::from_raw(record.plan.as_deref()),
            status: Status::normalize(record.status.as_deref()),
            purchase_date,
            role: Role::User,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Trims and lowercases an email. Only a missing identity is rejected;
/// legacy rows with odd addresses still resolve.
pub fn normalize_email(raw: &str) -> Result<String, EngineError> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(EngineError::InvalidPrincipalData(
            "principal email is missing".to_string(),
        ));
    }
    Ok(email)
}

pub fn parse_purchase_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// key: entitlement-usage-counter -> monthly metering snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub essays_used_this_month: u32,
    pub extra_essay_balance: u32,
}

impl UsageCounter {
    pub fn new(essays_used_this_month: u32, extra_essay_balance: u32) -> Self {
        Self {
            essays_used_this_month,
            extra_essay_balance,
        }
    }

    pub fn has_quota(&self, ceiling: u32) -> bool {
        self.essays_used_this_month < ceiling
    }

    pub fn has_extra(&self) -> bool {
        self.extra_essay_balance > 0
    }

    pub fn debit_extra(&mut self) -> Result<(), EngineError> {
        self.extra_essay_balance = self.extra_essay_balance.checked_sub(1).ok_or(
            EngineError::InsufficientCredit {
                used: self.essays_used_this_month,
                ceiling: 0,
                extra: 0,
            },
        )?;
        Ok(())
    }

    pub fn credit_extra(&mut self, quantity: u32) {
        self.extra_essay_balance = self.extra_essay_balance.saturating_add(quantity);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    DeniedNoSession,
    DeniedExpired,
    DeniedInsufficientPlan,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDecision::Granted => "granted",
            AccessDecision::DeniedNoSession => "denied_no_session",
            AccessDecision::DeniedExpired => "denied_expired",
            AccessDecision::DeniedInsufficientPlan => "denied_insufficient_plan",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid principal data: {0}")]
    InvalidPrincipalData(String),
    #[error("no essay credit left ({used}/{ceiling} used, {extra} extra)")]
    InsufficientCredit { used: u32, ceiling: u32, extra: u32 },
    #[error("admin access required")]
    Forbidden,
    #[error("entitlement store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_alias_normalizes() {
        let cases = [
            ("start", Plan::Weekly),
            ("semanal", Plan::Weekly),
            ("weekly", Plan::Weekly),
            ("pro", Plan::Pro),
            ("advanced", Plan::Advanced),
            ("medicina", Plan::LifetimeMedicine),
            ("vitalicio", Plan::LifetimeMedicine),
            ("lifetime-medicine", Plan::LifetimeMedicine),
            ("  PRO ", Plan::Pro),
            ("Semanal", Plan::Weekly),
        ];
        for (raw, expected) in cases {
            assert_eq!(Plan::normalize(raw), expected, "alias `{raw}`");
        }
    }

    #[test]
    fn unknown_plans_fail_closed() {
        for raw in ["unlimited", "", "premium", "advanced-plus"] {
            let plan = Plan::normalize(raw);
            assert_eq!(plan, Plan::None);
            assert_eq!(plan.level(), PlanLevel::Start);
            assert_eq!(plan.monthly_essay_quota(), DEFAULT_MONTHLY_ESSAY_QUOTA);
        }
        assert_eq!(Plan::from_raw(None), Plan::None);
    }

    #[test]
    fn quotas_follow_plan_table() {
        assert_eq!(Plan::Weekly.monthly_essay_quota(), 2);
        assert_eq!(Plan::Pro.monthly_essay_quota(), 4);
        assert_eq!(Plan::Advanced.monthly_essay_quota(), 15);
        assert_eq!(Plan::LifetimeMedicine.monthly_essay_quota(), 2);
    }

    #[test]
    fn plan_levels_are_ordered() {
        assert!(PlanLevel::Start < PlanLevel::Pro);
        assert!(PlanLevel::Pro < PlanLevel::Advanced);
        assert_eq!("PRO".parse::<PlanLevel>().unwrap(), PlanLevel::Pro);
        assert!("gold".parse::<PlanLevel>().is_err());
    }

    #[test]
    fn status_requires_explicit_active() {
        assert_eq!(Status::normalize(Some("active")), Status::Active);
        assert_eq!(Status::normalize(Some(" Active ")), Status::Active);
        assert_eq!(Status::normalize(Some("blocked")), Status::Blocked);
        assert_eq!(Status::normalize(Some("pending")), Status::Blocked);
        assert_eq!(Status::normalize(None), Status::Blocked);
    }

    #[test]
    fn lead_normalization_degrades_bad_fields() {
        let mut record = LeadRecord::sample("  Aluno@Example.com ");
        record.plan = Some("semanal".into());
        record.status = Some("active".into());
        record.purchase_date = Some("not a date".into());

        let principal = Principal::from_lead(&record).unwrap();
        assert_eq!(principal.email, "aluno@example.com");
        assert_eq!(principal.plan, Plan::Weekly);
        assert_eq!(principal.status, Status::Active);
        assert_eq!(principal.purchase_date, None);
        assert_eq!(principal.role, Role::User);
    }

    #[test]
    fn lead_without_email_is_invalid() {
        let record = LeadRecord::sample("   ");
        let err = Principal::from_lead(&record).expect_err("empty email must be rejected");
        assert!(matches!(err, EngineError::InvalidPrincipalData(_)));
    }

    #[test]
    fn legacy_lead_with_odd_email_still_resolves() {
        let mut record = LeadRecord::sample(" Aluno.Antigo ");
        record.plan = Some("pro".into());
        let principal = Principal::from_lead(&record).unwrap();
        assert_eq!(principal.email, "aluno.antigo");
        assert_eq!(principal.plan, Plan::Pro);
    }

    #[test]
    fn purchase_dates_accept_rfc3339_and_plain_dates() {
        let full = parse_purchase_date("2024-03-01T12:30:00.000Z").unwrap();
        assert_eq!(full.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        let plain = parse_purchase_date("2024-03-01").unwrap();
        assert_eq!(plain.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(parse_purchase_date("01/03/2024").is_none());
    }

    #[test]
    fn debiting_empty_extra_balance_fails() {
        let mut counter = UsageCounter::new(4, 0);
        assert!(counter.debit_extra().is_err());
        assert_eq!(counter, UsageCounter::new(4, 0));

        counter.credit_extra(1);
        counter.debit_extra().unwrap();
        assert_eq!(counter.extra_essay_balance, 0);
    }
}
