use chrono::{DateTime, Utc};

use super::clock::elapsed_days;
use super::models::{AccessDecision, PlanLevel, Principal, Status};

/// Days a weekly plan stays usable after purchase.
pub const WEEKLY_ACCESS_WINDOW_DAYS: i64 = 7;

/// key: entitlement-access -> route and feature gate decisions
///
/// Rules are evaluated in order and the first match wins:
/// no session, admin, lifetime plan, explicit active status, weekly window,
/// required tier. A weekly plan inside its window is not denied by the window
/// but still answers to the tier gate. Pure: callers pass `now` and an
/// already loaded principal.
pub fn decide_access(
    principal: Option<&Principal>,
    required: Option<PlanLevel>,
    now: DateTime<Utc>,
) -> AccessDecision {
    let Some(principal) = principal else {
        return AccessDecision::DeniedNoSession;
    };

    if principal.is_admin() {
        return AccessDecision::Granted;
    }

    if principal.plan.is_lifetime() {
        return AccessDecision::Granted;
    }

    if principal.status == Status::Active {
        return AccessDecision::Granted;
    }

    if principal.plan.is_time_limited() {
        // A missing purchase date is read as "purchased just now".
        let purchased_at = principal.purchase_date.unwrap_or(now);
        if elapsed_days(purchased_at, now) > WEEKLY_ACCESS_WINDOW_DAYS {
            return AccessDecision::DeniedExpired;
        }
        // Inside the window the tier gate below still applies.
    }

    if let Some(required) = required {
        if principal.plan.level() < required {
            return AccessDecision::DeniedInsufficientPlan;
        }
    }

    AccessDecision::Granted
}
