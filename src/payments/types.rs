//! Order backend types
//!
//! Wire shapes returned by the order-management backend's status endpoint and
//! the request body sent to its confirmation endpoint.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Order lifecycle status as reported by the backend.
///
/// Parsed case-insensitively; anything unrecognised becomes `Unknown` so a new
/// backend status never breaks polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunded => "Refunded",
            OrderStatus::Unknown => "Unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => OrderStatus::Pending,
            "processing" => OrderStatus::Processing,
            "paid" => OrderStatus::Paid,
            "shipped" | "shipping" => OrderStatus::Shipped,
            "delivered" => OrderStatus::Delivered,
            "completed" => OrderStatus::Completed,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            "refunded" => OrderStatus::Refunded,
            _ => OrderStatus::Unknown,
        }
    }

    /// True once the backend has recorded the payment.
    ///
    /// An order that already moved past `Paid` into fulfilment counts as settled.
    pub fn is_payment_settled(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Completed
        )
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        OrderStatus::parse(&value)
    }
}

impl From<OrderStatus> for String {
    fn from(value: OrderStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier the backend may send as a JSON string or a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(value)) => value,
        Some(StringOrNumber::Number(value)) => value.to_string(),
        None => String::new(),
    })
}

/// A single payment attached to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub payment_id: String,
    pub method: String,
    pub amount: Decimal,
    pub status: String,
}

/// Order state returned by `GET /api/orders/{orderReference}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusSnapshot {
    #[serde(default, deserialize_with = "string_or_number")]
    pub order_id: String,
    pub order_code: String,
    #[serde(rename = "orderStatus")]
    pub status: OrderStatus,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
}

impl OrderStatusSnapshot {
    pub fn is_payment_settled(&self) -> bool {
        self.status.is_payment_settled()
    }
}

/// Body of `POST /api/payments/confirm`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest<'a> {
    pub order_reference: &'a str,
    pub transaction_id: &'a str,
}

/// Structured error body the backend returns on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn order_status_parses_case_insensitively() {
        assert_eq!(OrderStatus::parse("Paid"), OrderStatus::Paid);
        assert_eq!(OrderStatus::parse("PAID"), OrderStatus::Paid);
        assert_eq!(OrderStatus::parse(" pending "), OrderStatus::Pending);
        assert_eq!(OrderStatus::parse("canceled"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::parse("on_hold"), OrderStatus::Unknown);
    }

    #[test]
    fn only_paid_or_later_counts_as_settled() {
        assert!(OrderStatus::Paid.is_payment_settled());
        assert!(OrderStatus::Completed.is_payment_settled());
        assert!(!OrderStatus::Pending.is_payment_settled());
        assert!(!OrderStatus::Processing.is_payment_settled());
        assert!(!OrderStatus::Cancelled.is_payment_settled());
        assert!(!OrderStatus::Unknown.is_payment_settled());
    }

    #[test]
    fn snapshot_deserializes_backend_payload() {
        let body = serde_json::json!({
            "orderId": "42",
            "orderCode": "ORD123",
            "orderStatus": "Paid",
            "payments": [
                { "paymentId": "P-1", "method": "VNPAY", "amount": 100000, "status": "Success" }
            ]
        });

        let snapshot: OrderStatusSnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(snapshot.order_code, "ORD123");
        assert_eq!(snapshot.status, OrderStatus::Paid);
        assert_eq!(snapshot.payments.len(), 1);
        assert_eq!(snapshot.payments[0].amount, Decimal::from_str("100000").unwrap());
        assert!(snapshot.is_payment_settled());
    }

    #[test]
    fn snapshot_tolerates_missing_payments() {
        let body = serde_json::json!({ "orderCode": "ORD9", "orderStatus": "pending" });
        let snapshot: OrderStatusSnapshot = serde_json::from_value(body).unwrap();
        assert!(snapshot.payments.is_empty());
        assert_eq!(snapshot.status, OrderStatus::Pending);
    }

    #[test]
    fn snapshot_accepts_numeric_ids() {
        let body = r#"{"orderId":42,"orderCode":"ORD123","orderStatus":"Paid",
            "payments":[{"paymentId":7,"method":"VNPAY","amount":100000,"status":"Success"}]}"#;

        let snapshot: OrderStatusSnapshot = serde_json::from_str(body).unwrap();
        assert_eq!(snapshot.order_id, "42");
        assert_eq!(snapshot.payments[0].payment_id, "7");
        assert!(snapshot.is_payment_settled());
    }

    #[test]
    fn snapshot_treats_null_order_id_as_empty() {
        let body = serde_json::json!({ "orderId": null, "orderCode": "ORD9", "orderStatus": "Paid" });
        let snapshot: OrderStatusSnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(snapshot.order_id, "");
    }
}
