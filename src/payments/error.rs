use std::time::Duration;

use super::types::BackendErrorBody;

/// Failures talking to the order-management backend.
///
/// The workflow reclassifies these by call site: a confirmation failure becomes
/// `CONFIRMATION_FAILED`, a status failure only costs a poll attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Builds an `Http` error from a non-2xx response, preferring the backend's
    /// own `message` field and falling back to the raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<BackendErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| body.trim().to_string());

        let message = if message.is_empty() {
            format!("request failed with status {status}")
        } else {
            message
        };

        BackendError::Http { status, message }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for showing to the user unmodified.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}
