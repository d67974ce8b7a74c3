//! Checkout return reconciler
//!
//! Bridges a payment gateway's browser redirect to the order backend: confirm
//! the payment once, poll the order until it settles, then navigate.

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod payments;
pub mod services;
pub mod workers;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod middleware;

pub use crate::config::{ReconcilerConfig, ServerConfig};
pub use crate::error::FailureReason;
pub use payments::{AuthToken, OrderBackend};
pub use workers::reconciliation::{ReconciliationState, ReconciliationWorkflow};
