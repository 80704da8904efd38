use std::num::NonZeroU32;

use super::models::Plan;

/// Charged for any upgrade pair without a listed difference.
pub const UPGRADE_FALLBACK_CENTS: u32 = 2990;

/// One-off extra essay correction.
pub const EXTRA_ESSAY_PRICE_CENTS: u32 = 499;

const fn cents(value: u32) -> NonZeroU32 {
    match NonZeroU32::new(value) {
        Some(value) => value,
        None => panic!("prices are positive"),
    }
}

/// key: upgrade-pricing -> pairwise plan difference in minor units
///
/// The return type rules out a zero (free) upgrade for any pair.
pub fn compute_upgrade_delta(current: Plan, target: Plan) -> NonZeroU32 {
    match (current, target) {
        (Plan::Weekly, Plan::Pro) => cents(1500),
        (Plan::Weekly, Plan::Advanced) => cents(3500),
        (Plan::Pro, Plan::Advanced) => cents(2000),
        _ => cents(UPGRADE_FALLBACK_CENTS),
    }
}

/// Plans sold directly at checkout.
pub fn checkout_price(plan: Plan) -> Option<NonZeroU32> {
    match plan {
        Plan::Weekly => Some(cents(990)),
        Plan::LifetimeMedicine => Some(cents(9890)),
        _ => None,
    }
}

/// Sale value recorded for leads created from the back office.
pub fn back_office_price(plan: Plan) -> Option<NonZeroU32> {
    match plan {
        Plan::Weekly => Some(cents(4990)),
        Plan::Pro => Some(cents(12990)),
        Plan::Advanced => Some(cents(19990)),
        _ => None,
    }
}

pub fn extra_essay_price() -> NonZeroU32 {
    cents(EXTRA_ESSAY_PRICE_CENTS)
}
