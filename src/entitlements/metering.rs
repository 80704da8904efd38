use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::models::{EngineError, Principal, UsageCounter};
use crate::store::UsageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Quota,
    Extra,
    None,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditSource::Quota => "quota",
            CreditSource::Extra => "extra",
            CreditSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    pub source: CreditSource,
    pub counter: UsageCounter,
}

/// key: essay-metering -> quota first, extra balance second
///
/// Pure decision over a counter snapshot. Persisted consumption goes through
/// `MeteringService`, which expresses the same rule as atomic store updates.
pub fn try_consume_essay_credit(principal: &Principal, counter: &UsageCounter) -> ConsumeOutcome {
    let ceiling = principal.plan.monthly_essay_quota();
    let mut updated = *counter;

    if counter.has_quota(ceiling) {
        updated.essays_used_this_month += 1;
        return ConsumeOutcome {
            allowed: true,
            source: CreditSource::Quota,
            counter: updated,
        };
    }

    if updated.debit_extra().is_ok() {
        return ConsumeOutcome {
            allowed: true,
            source: CreditSource::Extra,
            counter: updated,
        };
    }

    ConsumeOutcome {
        allowed: false,
        source: CreditSource::None,
        counter: *counter,
    }
}

/// Receipt for one committed correction credit. Not cloneable, so a credit
/// can be refunded at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct EssayCredit {
    source: CreditSource,
    counter: UsageCounter,
}

impl EssayCredit {
    pub fn source(&self) -> CreditSource {
        self.source
    }

    pub fn counter(&self) -> UsageCounter {
        self.counter
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub counter: UsageCounter,
    pub ceiling: u32,
    pub remaining_quota: u32,
}

/// key: essay-metering-service -> persisted, race-free consumption
#[derive(Clone)]
pub struct MeteringService {
    store: Arc<dyn UsageStore>,
}

impl MeteringService {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub async fn usage(&self, principal: &Principal) -> Result<UsageSnapshot, EngineError> {
        let counter = self.store.usage(&principal.email).await?;
        let ceiling = principal.plan.monthly_essay_quota();
        Ok(UsageSnapshot {
            counter,
            ceiling,
            remaining_quota: ceiling.saturating_sub(counter.essays_used_this_month),
        })
    }

    /// Commits one credit. The quota increment and the extra debit are each a
    /// conditional update, so two concurrent callers can never both spend the
    /// last unit.
    pub async fn consume(&self, principal: &Principal) -> Result<EssayCredit, EngineError> {
        let ceiling = principal.plan.monthly_essay_quota();

        if let Some(counter) = self
            .store
            .increment_usage_within(&principal.email, ceiling)
            .await?
        {
            debug!(
                email = %principal.email,
                used = counter.essays_used_this_month,
                ceiling,
                "essay credit taken from quota"
            );
            return Ok(EssayCredit {
                source: CreditSource::Quota,
                counter,
            });
        }

        if let Some(counter) = self.store.debit_extra_balance(&principal.email).await? {
            info!(
                email = %principal.email,
                extra_left = counter.extra_essay_balance,
                "essay credit taken from extra balance"
            );
            return Ok(EssayCredit {
                source: CreditSource::Extra,
                counter,
            });
        }

        let counter = self.store.usage(&principal.email).await?;
        Err(EngineError::InsufficientCredit {
            used: counter.essays_used_this_month,
            ceiling,
            extra: counter.extra_essay_balance,
        })
    }

    /// Returns a committed credit to the source it came from.
    pub async fn refund(
        &self,
        principal: &Principal,
        credit: EssayCredit,
    ) -> Result<UsageCounter, EngineError> {
        let counter = match credit.source {
            CreditSource::Quota => self.store.release_usage(&principal.email).await?,
            CreditSource::Extra => self.store.restore_extra_balance(&principal.email).await?,
            CreditSource::None => return Ok(credit.counter),
        };
        info!(
            email = %principal.email,
            source = credit.source.as_str(),
            "essay credit refunded"
        );
        Ok(counter)
    }

    /// Consumes a credit, runs `work`, and refunds the credit when `work`
    /// fails. A correction is only ever produced after a committed credit.
    pub async fn run_metered<T, E, F, Fut>(
        &self,
        principal: &Principal,
        work: F,
    ) -> Result<Result<T, E>, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let credit = self.consume(principal).await?;
        match work().await {
            Ok(value) => Ok(Ok(value)),
            Err(err) => {
                if let Err(refund_err) = self.refund(principal, credit).await {
                    warn!(
                        email = %principal.email,
                        error = %refund_err,
                        "failed to refund essay credit after failed correction"
                    );
                    return Err(refund_err);
                }
                Ok(Err(err))
            }
        }
    }
}
