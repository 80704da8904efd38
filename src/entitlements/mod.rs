pub mod access;
pub mod api;
pub mod clock;
pub mod metering;
pub mod models;
pub mod pricing;

pub use access::{decide_access, WEEKLY_ACCESS_WINDOW_DAYS};
pub use metering::{
    try_consume_essay_credit, ConsumeOutcome, CreditSource, EssayCredit, MeteringService,
    UsageSnapshot,
};
pub use models::{
    normalize_email, parse_purchase_date, AccessDecision, EngineError, Plan, PlanLevel, Principal,
    Role, Status, UsageCounter, DEFAULT_MONTHLY_ESSAY_QUOTA,
};
pub use pricing::compute_upgrade_delta;
