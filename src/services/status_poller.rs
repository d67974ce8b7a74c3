//! Bounded order-status polling
//!
//! Reads the order status until the backend reports the payment as settled or
//! the attempt budget runs out. A failed read consumes an attempt like any
//! other; only exhausting the budget ends the loop unsuccessfully.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::cancelled;
use crate::error::ConfigError;
use crate::logging::{log_external_call, mask_reference};
use crate::payments::{AuthToken, BackendError, OrderBackend, OrderStatusSnapshot};

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBackoff {
    Fixed,
    /// Doubles the delay after each attempt, capped at `max_interval`.
    Exponential,
}

impl PollBackoff {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollBackoff::Fixed => "fixed",
            PollBackoff::Exponential => "exponential",
        }
    }
}

impl FromStr for PollBackoff {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(PollBackoff::Fixed),
            "exponential" => Ok(PollBackoff::Exponential),
            other => Err(ConfigError::Invalid(format!(
                "unknown poll backoff '{}', expected fixed or exponential",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: PollBackoff,
    pub max_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            interval: Duration::from_millis(2000),
            backoff: PollBackoff::Fixed,
            max_interval: Duration::from_millis(10_000),
            request_timeout: Duration::from_millis(2000),
        }
    }
}

impl PollPolicy {
    /// Wait after the `ordinal`-th (1-based) non-settled attempt.
    pub fn delay_after(&self, ordinal: u32) -> Duration {
        match self.backoff {
            PollBackoff::Fixed => self.interval,
            PollBackoff::Exponential => {
                let exponent = ordinal.saturating_sub(1).min(16);
                self.interval
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_interval)
            }
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// One status read, published to the caller when it did not settle the order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollAttempt {
    pub ordinal: u32,
    pub snapshot: Option<OrderStatusSnapshot>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettledOrder {
    pub snapshot: OrderStatusSnapshot,
    /// Ordinal of the attempt that observed the settled status
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PollError {
    #[error("order did not settle after {attempts} status checks")]
    Timeout {
        attempts: u32,
        last_snapshot: Option<OrderStatusSnapshot>,
    },

    #[error("status polling was cancelled")]
    Cancelled,
}

// ============================================================================
// Poller
// ============================================================================

pub struct StatusPoller {
    backend: Arc<dyn OrderBackend>,
    policy: PollPolicy,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn OrderBackend>, policy: PollPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Polls until the order is settled, the budget is spent, or `cancel` flips.
    ///
    /// `on_attempt` sees every attempt that did not settle the order, including
    /// failed reads.
    #[instrument(skip(self, token, cancel, on_attempt), fields(order_ref = %mask_reference(order_reference)))]
    pub async fn poll_until_settled<F>(
        &self,
        order_reference: &str,
        token: &AuthToken,
        cancel: &mut watch::Receiver<bool>,
        mut on_attempt: F,
    ) -> Result<SettledOrder, PollError>
    where
        F: FnMut(&PollAttempt),
    {
        let mut last_snapshot = None;

        for ordinal in 1..=self.policy.max_attempts {
            if *cancel.borrow() {
                return Err(PollError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(PollError::Cancelled),
                result = self.fetch(order_reference, token) => result,
            };

            let attempt = match result {
                Ok(snapshot) if snapshot.is_payment_settled() => {
                    info!(
                        attempt = ordinal,
                        status = %snapshot.status,
                        "Order settled"
                    );
                    return Ok(SettledOrder {
                        snapshot,
                        attempt: ordinal,
                    });
                }
                Ok(snapshot) => {
                    debug!(
                        attempt = ordinal,
                        max_attempts = self.policy.max_attempts,
                        status = %snapshot.status,
                        "Order not settled yet"
                    );
                    last_snapshot = Some(snapshot.clone());
                    PollAttempt {
                        ordinal,
                        snapshot: Some(snapshot),
                        error: None,
                        timestamp: Utc::now(),
                    }
                }
                Err(e) => {
                    warn!(
                        attempt = ordinal,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Status check failed"
                    );
                    PollAttempt {
                        ordinal,
                        snapshot: None,
                        error: Some(e.to_string()),
                        timestamp: Utc::now(),
                    }
                }
            };
            on_attempt(&attempt);

            let delay = self.policy.delay_after(ordinal);
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        warn!(
            attempts = self.policy.max_attempts,
            "Status polling budget exhausted"
        );
        Err(PollError::Timeout {
            attempts: self.policy.max_attempts,
            last_snapshot,
        })
    }

    async fn fetch(
        &self,
        order_reference: &str,
        token: &AuthToken,
    ) -> Result<OrderStatusSnapshot, BackendError> {
        let timeout = self.policy.request_timeout;
        log_external_call("order-backend", "order_status", async {
            tokio::time::timeout(timeout, self.backend.order_status(order_reference, token))
                .await
                .map_err(|_| BackendError::Timeout(timeout))?
        })
        .await
    }
}
