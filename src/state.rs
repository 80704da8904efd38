use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::admin::AdminService;
use crate::config;
use crate::entitlements::{MeteringService, Principal};
use crate::error::{AppError, AppResult};
use crate::extractor::{issue_token, SessionUser};
use crate::payments::{EntitlementLedger, WebhookVerifier};
use crate::sessions::{SessionOutcome, SessionService};
use crate::store::{LeadStore, MemoryStore, PaymentStore, UsageStore};

/// Signing material for session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    secret: String,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            config::JWT_SECRET.as_str(),
            Duration::hours(*config::SESSION_TTL_HOURS),
        )
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &SessionUser, now: DateTime<Utc>) -> AppResult<String> {
        issue_token(user, &self.secret, now + self.ttl).map_err(|e| {
            tracing::error!(?e, "Token encoding error");
            AppError::Message("Token error".into())
        })
    }
}

/// key: app-state -> services shared with every handler
pub struct AppState {
    pub sessions: SessionService,
    pub metering: MeteringService,
    pub ledger: EntitlementLedger,
    pub admin: AdminService,
    pub verifier: Option<WebhookVerifier>,
    pub session_keys: SessionKeys,
}

impl AppState {
    pub fn new<S>(
        store: Arc<S>,
        admin_emails: HashSet<String>,
        session_keys: SessionKeys,
        verifier: Option<WebhookVerifier>,
    ) -> Self
    where
        S: LeadStore + UsageStore + PaymentStore + 'static,
    {
        let leads: Arc<dyn LeadStore> = store.clone();
        let usage: Arc<dyn UsageStore> = store.clone();
        let payments: Arc<dyn PaymentStore> = store;
        Self {
            sessions: SessionService::new(leads.clone(), admin_emails),
            metering: MeteringService::new(usage),
            ledger: EntitlementLedger::new(payments),
            admin: AdminService::new(leads),
            verifier,
            session_keys,
        }
    }

    /// State over an in-process store, signing sessions and webhooks with
    /// `secret` and recognising the default admin account.
    pub fn in_memory(store: Arc<MemoryStore>, secret: &str) -> Self {
        Self::new(
            store,
            HashSet::from(["admin@enem.pro".to_string()]),
            SessionKeys::new(secret, Duration::hours(24)),
            Some(WebhookVerifier::new(secret)),
        )
    }

    /// Principal behind a session token: 401 once the lead is gone, 403 once
    /// it has been blocked.
    pub async fn signed_in(&self, user: &SessionUser) -> AppResult<Principal> {
        match self.sessions.resolve(user).await? {
            SessionOutcome::SignedIn(principal) => Ok(principal),
            SessionOutcome::NotFound => Err(AppError::Unauthorized),
            SessionOutcome::Blocked => Err(AppError::Forbidden),
        }
    }
}
