//! One-shot payment confirmation
//!
//! Tells the backend that the gateway completed a transaction. A client is
//! bound to a single workflow and issues at most one call over its lifetime;
//! a second `confirm` is refused without touching the network.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::logging::{log_external_call, mask_reference};
use crate::payments::{AuthToken, BackendError, OrderBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    pub order_reference: String,
    pub transaction_id: String,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    /// Backend refusal or transport failure. Displays the message verbatim.
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    #[error("payment confirmation was already issued for this workflow")]
    AlreadyIssued,
}

impl From<BackendError> for ConfirmationError {
    fn from(err: BackendError) -> Self {
        ConfirmationError::Rejected {
            status: err.status_code(),
            message: err.user_message(),
        }
    }
}

pub type ConfirmationOutcome = Result<Confirmed, ConfirmationError>;

pub struct ConfirmationClient {
    backend: Arc<dyn OrderBackend>,
    timeout: Duration,
    issued: AtomicBool,
}

impl ConfirmationClient {
    pub fn new(backend: Arc<dyn OrderBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            issued: AtomicBool::new(false),
        }
    }

    pub fn is_issued(&self) -> bool {
        self.issued.load(Ordering::SeqCst)
    }

    #[instrument(
        skip(self, token),
        fields(order_ref = %mask_reference(order_reference), txn_id = %mask_reference(transaction_id))
    )]
    pub async fn confirm(
        &self,
        order_reference: &str,
        transaction_id: &str,
        token: &AuthToken,
    ) -> ConfirmationOutcome {
        if self.issued.swap(true, Ordering::SeqCst) {
            warn!("Confirmation already issued, refusing second call");
            return Err(ConfirmationError::AlreadyIssued);
        }

        let timeout = self.timeout;
        log_external_call("order-backend", "confirm_payment", async {
            tokio::time::timeout(
                timeout,
                self.backend
                    .confirm_payment(order_reference, transaction_id, token),
            )
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
        })
        .await?;

        info!("Payment confirmed with backend");

        Ok(Confirmed {
            order_reference: order_reference.to_string(),
            transaction_id: transaction_id.to_string(),
            confirmed_at: Utc::now(),
        })
    }
}
