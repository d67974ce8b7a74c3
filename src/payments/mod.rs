//! Order-management backend contract
//!
//! The reconciliation workflow only ever talks to the backend through
//! [`OrderBackend`]: one confirmation call per workflow and a bounded number of
//! status reads. The HTTP implementation lives in [`http`]; [`mock`] is an
//! in-memory stand-in that records every call.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub mod error;
pub mod http;
pub mod mock;
pub mod types;

pub use error::BackendError;
pub use types::{OrderStatus, OrderStatusSnapshot, PaymentRecord};

/// Bearer credential supplied by the surrounding application.
///
/// Read-only for the lifetime of a workflow; nothing in this crate refreshes it.
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(Arc<str>);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Parses an `Authorization` header value of the form `Bearer <token>`.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then(|| Self::new(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Calls the reconciliation workflow makes against the order backend.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Tells the backend the gateway completed `transaction_id` for
    /// `order_reference`. Must never be retried by callers.
    async fn confirm_payment(
        &self,
        order_reference: &str,
        transaction_id: &str,
        token: &AuthToken,
    ) -> Result<(), BackendError>;

    /// Reads the current order state.
    async fn order_status(
        &self,
        order_reference: &str,
        token: &AuthToken,
    ) -> Result<OrderStatusSnapshot, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_parsed() {
        let token = AuthToken::from_authorization_header("Bearer abc.def").unwrap();
        assert_eq!(token.expose(), "abc.def");

        let token = AuthToken::from_authorization_header("bearer   xyz ").unwrap();
        assert_eq!(token.expose(), "xyz");
    }

    #[test]
    fn non_bearer_headers_are_rejected() {
        assert!(AuthToken::from_authorization_header("Basic dXNlcjpwdw==").is_none());
        assert!(AuthToken::from_authorization_header("Bearer ").is_none());
        assert!(AuthToken::from_authorization_header("token").is_none());
    }

    #[test]
    fn debug_output_is_redacted() {
        let token = AuthToken::new("super-secret");
        let printed = format!("{:?}", token);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("redacted"));
    }
}
