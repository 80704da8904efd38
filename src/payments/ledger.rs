use std::sync::Arc;

use tracing::{info, warn};

use super::confirmation::{PaymentConfirmation, PaymentError};
use super::polling::{ChargePoller, ChargeStatusSource, PendingCharge, PollOutcome};
use crate::store::{ChargeSettlement, PaymentStore, SettlementStatus};

/// key: entitlement-ledger -> single write path for paid entitlements
///
/// Plans, activation flags and extra essay credits change only here, and only
/// in exchange for a `PaymentConfirmation`. Replays of the same charge id are
/// acknowledged without applying the effect twice.
#[derive(Clone)]
pub struct EntitlementLedger {
    store: Arc<dyn PaymentStore>,
}

impl EntitlementLedger {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<SettlementStatus, PaymentError> {
        let settlement = ChargeSettlement::from_confirmation(confirmation);
        let status = self.store.settle_charge(&settlement).await.map_err(|err| {
            warn!(
                ?err,
                charge_id = settlement.charge_id(),
                email = settlement.email(),
                "failed to settle confirmed charge"
            );
            PaymentError::Store(err)
        })?;

        match status {
            SettlementStatus::Applied => info!(
                charge_id = settlement.charge_id(),
                email = settlement.email(),
                kind = settlement.event().kind(),
                "payment settled"
            ),
            SettlementStatus::AlreadySettled => info!(
                charge_id = settlement.charge_id(),
                "duplicate payment confirmation ignored"
            ),
        }
        Ok(status)
    }

    /// Polls `pending` within the poller's bounds and settles it once paid.
    /// `None` when the charge expired or never reported paid.
    pub async fn settle_when_paid(
        &self,
        poller: &ChargePoller,
        source: &dyn ChargeStatusSource,
        pending: PendingCharge,
    ) -> Result<Option<SettlementStatus>, PaymentError> {
        match poller.await_confirmation(source, pending).await {
            PollOutcome::Confirmed(confirmation) => self.apply(confirmation).await.map(Some),
            PollOutcome::Expired => Ok(None),
            PollOutcome::TimedOut { attempts } => {
                warn!(attempts, "gave up waiting for charge confirmation");
                Ok(None)
            }
        }
    }
}
