pub mod confirmation;
pub mod ledger;
pub mod polling;

pub use confirmation::{
    ChargeCustomer, ChargeData, ChargeMetadata, PaymentConfirmation, PaymentError, PaymentEvent,
    PaymentWebhookPayload, WebhookOutcome, WebhookVerifier,
};
pub use ledger::EntitlementLedger;
pub use polling::{
    ChargePoller, ChargeStatus, ChargeStatusSource, PendingCharge, PollOutcome, PollPolicy,
};
