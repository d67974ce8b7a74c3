//! Shared error and failure classification types

use serde::{Deserialize, Serialize};

/// Why a reconciliation workflow ended in `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The gateway itself reported failure or cancellation.
    GatewayRejected,
    /// The gateway reported success but required identifiers are missing,
    /// or the redirect signature did not verify.
    MalformedCallback,
    /// The backend rejected the confirmation or the call failed.
    ConfirmationFailed,
    /// Polling budget exhausted without the order reaching `Paid`.
    ReconciliationTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::GatewayRejected => "GATEWAY_REJECTED",
            FailureReason::MalformedCallback => "MALFORMED_CALLBACK",
            FailureReason::ConfirmationFailed => "CONFIRMATION_FAILED",
            FailureReason::ReconciliationTimeout => "RECONCILIATION_TIMEOUT",
        }
    }

    /// A timeout means the payment may still have gone through.
    pub fn is_uncertain(&self) -> bool {
        matches!(self, FailureReason::ReconciliationTimeout)
    }

    /// Failures decided from the redirect alone, before any backend call.
    pub fn is_callback_failure(&self) -> bool {
        matches!(
            self,
            FailureReason::GatewayRejected | FailureReason::MalformedCallback
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_codes() {
        assert_eq!(FailureReason::GatewayRejected.as_str(), "GATEWAY_REJECTED");
        assert_eq!(FailureReason::MalformedCallback.as_str(), "MALFORMED_CALLBACK");
        assert_eq!(FailureReason::ConfirmationFailed.as_str(), "CONFIRMATION_FAILED");
        assert_eq!(
            FailureReason::ReconciliationTimeout.as_str(),
            "RECONCILIATION_TIMEOUT"
        );
    }

    #[test]
    fn serde_matches_as_str() {
        let json = serde_json::to_string(&FailureReason::ReconciliationTimeout).unwrap();
        assert_eq!(json, "\"RECONCILIATION_TIMEOUT\"");
    }

    #[test]
    fn only_timeout_is_uncertain() {
        assert!(FailureReason::ReconciliationTimeout.is_uncertain());
        assert!(!FailureReason::ConfirmationFailed.is_uncertain());
        assert!(!FailureReason::GatewayRejected.is_uncertain());
    }
}
