use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::entitlements::{normalize_email, EngineError, Principal, Role};
use crate::extractor::SessionUser;
use crate::store::LeadStore;

/// Result of looking a session up against the lead store. Missing and
/// blocked leads stay distinguishable so callers can answer 404/401 vs 403.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    SignedIn(Principal),
    NotFound,
    Blocked,
}

impl SessionOutcome {
    pub fn signed_in(self) -> Option<Principal> {
        match self {
            SessionOutcome::SignedIn(principal) => Some(principal),
            SessionOutcome::NotFound | SessionOutcome::Blocked => None,
        }
    }
}

/// key: sessions -> email sign-in and per-request principal loading
#[derive(Clone)]
pub struct SessionService {
    leads: Arc<dyn LeadStore>,
    admin_emails: HashSet<String>,
}

impl SessionService {
    pub fn new(leads: Arc<dyn LeadStore>, admin_emails: HashSet<String>) -> Self {
        let admin_emails = admin_emails
            .into_iter()
            .map(|email| email.trim().to_ascii_lowercase())
            .collect();
        Self {
            leads,
            admin_emails,
        }
    }

    fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.contains(email)
    }

    /// Signs in by email lookup. Admin accounts skip the lead table; a lead
    /// flagged `blocked` is refused. Store failures are returned, never
    /// papered over with a default session.
    pub async fn login(&self, raw_email: &str) -> Result<SessionOutcome, EngineError> {
        let email = normalize_email(raw_email)?;
        if self.is_admin_email(&email) {
            info!(%email, "admin signed in");
            return Ok(SessionOutcome::SignedIn(Principal::admin(&email)?));
        }

        let outcome = self.lookup(&email).await?;
        match &outcome {
            SessionOutcome::SignedIn(principal) => {
                info!(%email, plan = %principal.plan, "user signed in")
            }
            SessionOutcome::NotFound => info!(%email, "login refused: no purchase on record"),
            SessionOutcome::Blocked => warn!(%email, "login refused: account blocked"),
        }
        Ok(outcome)
    }

    /// Loads the current entitlements for a session. A lead blocked after
    /// sign-in ends the session on its next request.
    pub async fn resolve(&self, user: &SessionUser) -> Result<SessionOutcome, EngineError> {
        let email = normalize_email(&user.email)?;
        if user.role == Role::Admin && self.is_admin_email(&email) {
            return Ok(SessionOutcome::SignedIn(Principal::admin(&email)?));
        }
        let outcome = self.lookup(&email).await?;
        if outcome == SessionOutcome::Blocked {
            warn!(%email, "session refused: account blocked");
        }
        Ok(outcome)
    }

    async fn lookup(&self, email: &str) -> Result<SessionOutcome, EngineError> {
        let Some(lead) = self.leads.find_lead(email).await? else {
            return Ok(SessionOutcome::NotFound);
        };
        if lead.is_blocked() {
            return Ok(SessionOutcome::Blocked);
        }
        Ok(SessionOutcome::SignedIn(Principal::from_lead(&lead)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::{Plan, Status};
    use crate::store::{LeadDraft, MemoryStore};
    use chrono::Utc;

    async fn service_with(plan: Plan, status: Status) -> SessionService {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_lead(LeadDraft {
                email: "aluno@example.com".into(),
                name: None,
                phone: None,
                plan,
                status,
                purchase_price_cents: None,
                purchase_date: Utc::now(),
            })
            .await
            .unwrap();
        SessionService::new(store, HashSet::from(["Admin@Enem.pro".to_string()]))
    }

    #[tokio::test]
    async fn known_lead_signs_in_with_normalized_plan() {
        let service = service_with(Plan::Pro, Status::Active).await;
        let SessionOutcome::SignedIn(principal) = service.login(" ALUNO@example.com ").await.unwrap()
        else {
            panic!("expected sign in");
        };
        assert_eq!(principal.email, "aluno@example.com");
        assert_eq!(principal.plan, Plan::Pro);
        assert_eq!(principal.role, Role::User);
    }

    #[tokio::test]
    async fn unknown_and_blocked_leads_are_refused() {
        let service = service_with(Plan::Pro, Status::Blocked).await;
        assert_eq!(
            service.login("aluno@example.com").await.unwrap(),
            SessionOutcome::Blocked
        );
        assert_eq!(
            service.login("outro@example.com").await.unwrap(),
            SessionOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn admin_list_overrides_lead_lookup() {
        let service = service_with(Plan::Weekly, Status::Active).await;
        let SessionOutcome::SignedIn(principal) = service.login("admin@enem.pro").await.unwrap()
        else {
            panic!("expected admin sign in");
        };
        assert!(principal.is_admin());
    }

    #[tokio::test]
    async fn forged_admin_role_is_not_trusted() {
        let service = service_with(Plan::Weekly, Status::Active).await;
        let forged = SessionUser {
            email: "aluno@example.com".into(),
            role: Role::Admin,
        };
        let principal = service.resolve(&forged).await.unwrap().signed_in().unwrap();
        assert_eq!(principal.role, Role::User);
    }

    #[tokio::test]
    async fn blocking_a_lead_ends_its_open_session() {
        let store = Arc::new(MemoryStore::new());
        let lead = store
            .insert_lead(LeadDraft {
                email: "aluno@example.com".into(),
                name: None,
                phone: None,
                plan: Plan::Advanced,
                status: Status::Active,
                purchase_price_cents: None,
                purchase_date: Utc::now(),
            })
            .await
            .unwrap();
        let service = SessionService::new(store.clone(), HashSet::new());
        let user = SessionUser {
            email: "aluno@example.com".into(),
            role: Role::User,
        };
        assert!(service.resolve(&user).await.unwrap().signed_in().is_some());

        store.set_status(lead.id, Status::Blocked).await.unwrap();
        assert_eq!(
            service.resolve(&user).await.unwrap(),
            SessionOutcome::Blocked
        );
    }

    #[tokio::test]
    async fn malformed_email_is_invalid() {
        let service = service_with(Plan::Pro, Status::Active).await;
        assert!(matches!(
            service.login("   ").await,
            Err(EngineError::InvalidPrincipalData(_))
        ));
    }
}
