use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::FailureReason;
use crate::services::redirect_scheduler::{NavigationIntent, RedirectConfig};
use crate::workers::reconciliation::{ReconciliationState, ReconciliationWorkflow};

/// Progress indicator for UI rendering
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Pending,
    Confirming,
    SettledSuccess,
    SettledFailure,
    UncertainTimeout,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallToAction {
    ViewDetailsNow { route: String },
    ReturnNow { route: String },
    WaitForCountdown { seconds: u64 },
}

/// What the return page shows for a workflow at one point in time
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReturnView {
    pub key: String,
    pub workflow_id: Uuid,
    pub state: &'static str,
    pub indicator: Indicator,
    pub headline: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub call_to_action: Vec<CallToAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_secs: Option<u64>,
    pub leave_requires_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

impl ReturnView {
    pub fn from_workflow(key: &str, workflow: &ReconciliationWorkflow) -> Self {
        let navigation = workflow.redirect().navigation();
        let mut view = Self::project(
            &workflow.state(),
            workflow.redirect().countdown(),
            navigation.as_ref(),
            workflow.redirect().config(),
        );
        view.key = key.to_string();
        view.workflow_id = workflow.id();
        view.amount = workflow
            .callback()
            .filter(|c| c.amount_minor_units > 0)
            .map(|c| c.amount());
        view
    }

    /// Pure projection of machine state plus countdown into what the user sees.
    pub fn project(
        state: &ReconciliationState,
        countdown: Option<u64>,
        navigation: Option<&NavigationIntent>,
        redirect: &RedirectConfig,
    ) -> Self {
        let (indicator, headline, message, call_to_action) = match state {
            ReconciliationState::Idle | ReconciliationState::ParsingCallback => (
                Indicator::Pending,
                "Processing payment result",
                "Reading the payment result from the gateway.".to_string(),
                Vec::new(),
            ),
            ReconciliationState::Confirming { .. } => (
                Indicator::Confirming,
                "Confirming your payment",
                "Please keep this page open while we confirm your payment.".to_string(),
                Vec::new(),
            ),
            ReconciliationState::Polling { attempt, .. } => (
                Indicator::Confirming,
                "Checking order status",
                if *attempt == 0 {
                    "Payment confirmed. Waiting for your order to update.".to_string()
                } else {
                    format!(
                        "Payment confirmed. Waiting for your order to update (check {}).",
                        attempt
                    )
                },
                Vec::new(),
            ),
            ReconciliationState::Settled {
                order_reference, ..
            } => (
                Indicator::SettledSuccess,
                "Payment successful",
                format!("Your payment for order {} was confirmed.", order_reference),
                vec![CallToAction::ViewDetailsNow {
                    route: redirect.order_route(order_reference),
                }],
            ),
            ReconciliationState::Failed {
                reason, message, ..
            } => {
                let (indicator, headline) = if reason.is_uncertain() {
                    (Indicator::UncertainTimeout, "Payment status unknown")
                } else {
                    (Indicator::SettledFailure, "Payment failed")
                };
                let mut actions = vec![CallToAction::ReturnNow {
                    route: redirect.landing_route.clone(),
                }];
                if let Some(seconds) = countdown.filter(|s| *s > 0) {
                    actions.push(CallToAction::WaitForCountdown { seconds });
                }
                (indicator, headline, message.clone(), actions)
            }
        };

        Self {
            key: String::new(),
            workflow_id: Uuid::nil(),
            state: state.as_str(),
            indicator,
            headline: headline.to_string(),
            message,
            failure_reason: state.failure_reason(),
            order_reference: state.order_reference().map(str::to_string),
            amount: None,
            call_to_action,
            countdown_secs: countdown,
            leave_requires_confirmation: state.is_in_flight(),
            redirect_to: navigation.map(|n| n.route().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_workflows: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("a bearer token is required to confirm a payment")]
    Unauthorized,

    #[error("no payment return is tracked under {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "PAYMENT_RETURN_NOT_FOUND",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let key = match &self {
            ApiError::NotFound(key) => Some(key.clone()),
            ApiError::Unauthorized => None,
        };
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.to_string(),
                key,
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}
