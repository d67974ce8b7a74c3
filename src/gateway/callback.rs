//! Gateway return-URL parsing
//!
//! Turns the query parameters the payment gateway appends to its browser
//! redirect into a [`GatewayCallbackResult`]. Pure: no I/O, no clock, same
//! output for the same input.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::FailureReason;

/// Raw redirect parameters, sorted by name.
pub type CallbackParams = BTreeMap<String, String>;

pub const RESPONSE_CODE: &str = "vnp_ResponseCode";
pub const AMOUNT: &str = "vnp_Amount";
pub const ORDER_REFERENCE: &str = "vnp_TxnRef";
pub const TRANSACTION_ID: &str = "vnp_TransactionNo";
pub const MESSAGE: &str = "vnp_Message";

/// Response code the gateway uses for a completed payment.
pub const SUCCESS_CODE: &str = "00";

/// Human-readable text for the gateway's response codes.
pub fn describe_response_code(code: &str) -> &'static str {
    match code {
        "00" => "Transaction successful",
        "07" => "Amount deducted, but the transaction was flagged as suspicious",
        "09" => "Card or account is not registered for internet banking",
        "10" => "Card or account verification failed more than 3 times",
        "11" => "Payment window expired",
        "12" => "Card or account is locked",
        "13" => "Incorrect one-time password",
        "24" => "Customer cancelled the transaction",
        "51" => "Insufficient account balance",
        "65" => "Daily transaction limit exceeded",
        "75" => "Issuing bank is under maintenance",
        "79" => "Too many incorrect payment passwords",
        _ => "Payment failed at the gateway",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayCallbackResult {
    pub response_code: String,
    pub success: bool,
    pub amount_minor_units: i64,
    pub order_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
}

/// What the workflow should do with a parsed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackVerdict {
    Confirmable {
        order_reference: String,
        transaction_id: String,
    },
    Rejected {
        reason: FailureReason,
        message: String,
    },
}

fn non_blank(params: &CallbackParams, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl GatewayCallbackResult {
    pub fn from_params(params: &CallbackParams) -> Self {
        let response_code = non_blank(params, RESPONSE_CODE).unwrap_or_default();
        let amount_minor_units = params
            .get(AMOUNT)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);

        Self {
            success: response_code == SUCCESS_CODE,
            amount_minor_units,
            order_reference: non_blank(params, ORDER_REFERENCE),
            transaction_id: non_blank(params, TRANSACTION_ID),
            message: non_blank(params, MESSAGE),
            response_code,
        }
    }

    /// Amount in major currency units; the gateway reports it multiplied by 100.
    pub fn amount(&self) -> Decimal {
        Decimal::new(self.amount_minor_units, 2)
    }

    /// Gateway message, or the response-code description when none was sent.
    pub fn display_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| describe_response_code(&self.response_code).to_string())
    }

    pub fn verdict(&self) -> CallbackVerdict {
        if !self.success {
            let code = if self.response_code.is_empty() {
                "missing"
            } else {
                self.response_code.as_str()
            };
            return CallbackVerdict::Rejected {
                reason: FailureReason::GatewayRejected,
                message: format!("{} (code {})", self.display_message(), code),
            };
        }

        match (&self.order_reference, &self.transaction_id) {
            (Some(order_reference), Some(transaction_id)) => CallbackVerdict::Confirmable {
                order_reference: order_reference.clone(),
                transaction_id: transaction_id.clone(),
            },
            (None, None) => CallbackVerdict::Rejected {
                reason: FailureReason::MalformedCallback,
                message: "Payment result is missing the order reference and transaction id"
                    .to_string(),
            },
            (None, Some(_)) => CallbackVerdict::Rejected {
                reason: FailureReason::MalformedCallback,
                message: "Payment result is missing the order reference".to_string(),
            },
            (Some(_), None) => CallbackVerdict::Rejected {
                reason: FailureReason::MalformedCallback,
                message: "Payment result is missing the transaction id".to_string(),
            },
        }
    }
}
