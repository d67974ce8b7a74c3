//! Logging and tracing configuration
//!
//! Provides structured logging with JSON formatting in production and
//! human-readable output in development. Includes masking for order
//! references, redaction for backend error bodies, and timing for calls to
//! the order backend.

use std::env;
use std::future::Future;
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment types for logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from ENV variable
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    /// Get default log level for environment
    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging => Level::INFO,
            Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the tracing subscriber with appropriate formatting
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: Set to "production", "staging", or "development"
/// - `RUST_LOG`: Override log level (e.g., "info", "debug", "warn")
/// - `LOG_FORMAT`: Force format to "json" or "pretty"
pub fn init_tracing() {
    let environment = Environment::from_env();

    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    let default_directives = format!(
        "{}={},tower_http=debug,axum=info,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        environment.default_log_level()
    );
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

/// Mask an order reference or transaction id for logging
///
/// Shows first 3 and last 3 characters, masks the rest
pub fn mask_reference(reference: &str) -> String {
    let chars: Vec<char> = reference.chars().collect();
    if chars.len() <= 6 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Redact sensitive fields from JSON-like structures
///
/// Replaces values for keys like "token", "secret", "password", "authorization"
pub fn redact_sensitive_data(text: &str) -> String {
    let sensitive_keys = [
        "token",
        "accessToken",
        "access_token",
        "secret",
        "password",
        "authorization",
        "vnp_SecureHash",
        "card_number",
        "cardNumber",
    ];

    let mut result = text.to_string();
    for key in &sensitive_keys {
        let pattern = format!(r#""{}":\s*"[^"]*""#, regex::escape(key));
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re
                .replace_all(&result, format!(r#""{}": "[REDACTED]""#, key))
                .to_string();
        }
    }
    result
}

/// Wrap an order-backend call and log its duration and outcome
pub async fn log_external_call<F, T, E>(service: &str, endpoint: &str, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();

    let result = operation.await;
    let duration_ms = start.elapsed().as_millis();

    match &result {
        Ok(_) => {
            info!(
                event_type = "external_call_complete",
                service = %service,
                endpoint = %endpoint,
                duration_ms = %duration_ms,
                "External service call completed"
            );
        }
        Err(e) => {
            warn!(
                event_type = "external_call_error",
                service = %service,
                endpoint = %endpoint,
                duration_ms = %duration_ms,
                error = %e,
                "External service call failed"
            );
        }
    }

    result
}
