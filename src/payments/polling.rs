use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use super::confirmation::{PaymentConfirmation, PaymentEvent};
use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Pending,
    Paid,
    Expired,
}

/// Anything that can report the provider-side state of a charge.
#[async_trait]
pub trait ChargeStatusSource: Send + Sync {
    async fn charge_status(&self, charge_id: &str) -> Result<ChargeStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// At least one check is always made.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            Duration::from_secs(*config::PAYMENT_POLL_INTERVAL_SECS),
            *config::PAYMENT_POLL_MAX_ATTEMPTS,
        )
    }
}

/// A checkout the client is waiting on.
#[derive(Debug, Clone)]
pub struct PendingCharge {
    pub charge_id: String,
    pub email: String,
    pub customer_name: Option<String>,
    pub event: PaymentEvent,
}

#[derive(Debug)]
pub enum PollOutcome {
    Confirmed(PaymentConfirmation),
    Expired,
    TimedOut { attempts: u32 },
}

/// key: payment-polling -> bounded wait for a pending charge
#[derive(Debug, Clone, Copy)]
pub struct ChargePoller {
    policy: PollPolicy,
}

impl ChargePoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Checks the charge at most `max_attempts` times. Only a `Paid` report
    /// yields a confirmation; lookup failures count as an attempt.
    pub async fn await_confirmation(
        &self,
        source: &dyn ChargeStatusSource,
        pending: PendingCharge,
    ) -> PollOutcome {
        for attempt in 1..=self.policy.max_attempts {
            match source.charge_status(&pending.charge_id).await {
                Ok(ChargeStatus::Paid) => {
                    info!(charge_id = %pending.charge_id, attempt, "charge reported paid");
                    return PollOutcome::Confirmed(PaymentConfirmation::new(
                        pending.charge_id,
                        pending.email,
                        pending.customer_name,
                        pending.event,
                        Utc::now(),
                    ));
                }
                Ok(ChargeStatus::Expired) => {
                    info!(charge_id = %pending.charge_id, attempt, "charge expired before payment");
                    return PollOutcome::Expired;
                }
                Ok(ChargeStatus::Pending) => {
                    debug!(charge_id = %pending.charge_id, attempt, "charge still pending");
                }
                Err(err) => {
                    warn!(
                        ?err,
                        charge_id = %pending.charge_id,
                        attempt,
                        "charge status lookup failed"
                    );
                }
            }
            if attempt < self.policy.max_attempts {
                time::sleep(self.policy.interval).await;
            }
        }
        PollOutcome::TimedOut {
            attempts: self.policy.max_attempts,
        }
    }
}
