//! reqwest implementation of the order backend contract

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{ConfirmPaymentRequest, OrderStatusSnapshot};
use super::{AuthToken, BackendError, OrderBackend};
use crate::logging::{mask_reference, redact_sensitive_data};

pub struct HttpOrderBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpOrderBackend {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Transport(format!("invalid backend base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Transport(format!(
                "backend base url {base_url} cannot be used as a base"
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Transport("backend base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn error_from(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(
            status = status.as_u16(),
            body = %redact_sensitive_data(&body),
            "Order backend returned an error response"
        );
        BackendError::from_response(status.as_u16(), &body)
    }
}

#[async_trait]
impl OrderBackend for HttpOrderBackend {
    async fn confirm_payment(
        &self,
        order_reference: &str,
        transaction_id: &str,
        token: &AuthToken,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&["api", "payments", "confirm"])?;
        debug!(
            %url,
            order_ref = %mask_reference(order_reference),
            "Sending payment confirmation"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .json(&ConfirmPaymentRequest {
                order_reference,
                transaction_id,
            })
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn order_status(
        &self,
        order_reference: &str,
        token: &AuthToken,
    ) -> Result<OrderStatusSnapshot, BackendError> {
        let url = self.endpoint(&["api", "orders", order_reference, "status"])?;
        debug!(%url, "Fetching order status");

        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.text().await?;
                serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
            }
            StatusCode::NOT_FOUND => Err(BackendError::Http {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("order {order_reference} not found"),
            }),
            _ => Err(Self::error_from(response).await),
        }
    }
}
