//! Runtime configuration
//!
//! Workflow timings come from `RECONCILE_*` variables with defaults that match
//! the storefront's behaviour (6 polls, 2 s apart, 3 s success grace, 10 s
//! failure countdown). Server wiring is loaded through the `config` crate from
//! `CHECKOUT_*` variables.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;
use crate::services::redirect_scheduler::RedirectConfig;
use crate::services::status_poller::{PollBackoff, PollPolicy};

// ============================================================================
// Reconciliation workflow
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Status reads before giving up with a reconciliation timeout
    pub poll_max_attempts: u32,
    /// Delay after each non-settled status read
    pub poll_interval: Duration,
    pub poll_backoff: PollBackoff,
    /// Upper bound on the delay when backoff is exponential
    pub poll_max_interval: Duration,
    /// Per-call timeout for status reads
    pub request_timeout: Duration,
    /// Per-call timeout for the single confirmation call
    pub confirm_timeout: Duration,
    /// Grace period before navigating to the order page on success
    pub success_redirect_delay: Duration,
    /// Seconds shown on the failure countdown
    pub failure_countdown_secs: u64,
    pub landing_route: String,
    pub order_route_prefix: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_max_attempts: 6,
            poll_interval: Duration::from_millis(2000),
            poll_backoff: PollBackoff::Fixed,
            poll_max_interval: Duration::from_millis(10_000),
            request_timeout: Duration::from_millis(2000),
            confirm_timeout: Duration::from_millis(10_000),
            success_redirect_delay: Duration::from_millis(3000),
            failure_countdown_secs: 10,
            landing_route: "/".to_string(),
            order_route_prefix: "/orders".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    parse_setting(key, std::env::var(key).ok())
}

/// Parses a raw setting. A value that is present but malformed is logged and
/// treated as unset.
fn parse_setting<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                variable = key,
                value = %raw,
                "Ignoring malformed configuration value, using default"
            );
            None
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.poll_max_attempts = env_parse("RECONCILE_POLL_MAX_ATTEMPTS").unwrap_or(cfg.poll_max_attempts);
        cfg.poll_interval = env_parse("RECONCILE_POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(cfg.poll_interval);
        cfg.poll_backoff = env_parse("RECONCILE_POLL_BACKOFF").unwrap_or(cfg.poll_backoff);
        cfg.poll_max_interval = env_parse("RECONCILE_POLL_MAX_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(cfg.poll_max_interval);
        // The per-call timeout follows the poll interval unless set explicitly.
        cfg.request_timeout = env_parse("RECONCILE_REQUEST_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(cfg.poll_interval);
        cfg.confirm_timeout = env_parse("RECONCILE_CONFIRM_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(cfg.confirm_timeout);
        cfg.success_redirect_delay = env_parse("RECONCILE_SUCCESS_REDIRECT_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(cfg.success_redirect_delay);
        cfg.failure_countdown_secs =
            env_parse("RECONCILE_FAILURE_COUNTDOWN_SECS").unwrap_or(cfg.failure_countdown_secs);
        if let Ok(route) = std::env::var("RECONCILE_LANDING_ROUTE") {
            cfg.landing_route = route;
        }
        if let Ok(prefix) = std::env::var("RECONCILE_ORDER_ROUTE_PREFIX") {
            cfg.order_route_prefix = prefix;
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "RECONCILE_POLL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.confirm_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeouts must be greater than zero".to_string(),
            ));
        }
        if self.poll_max_interval < self.poll_interval {
            return Err(ConfigError::Invalid(
                "RECONCILE_POLL_MAX_INTERVAL_MS must not be below the poll interval".to_string(),
            ));
        }
        if !self.landing_route.starts_with('/') || !self.order_route_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(
                "navigation routes must be absolute paths".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.poll_max_attempts,
            interval: self.poll_interval,
            backoff: self.poll_backoff,
            max_interval: self.poll_max_interval,
            request_timeout: self.request_timeout,
        }
    }

    pub fn redirect_config(&self) -> RedirectConfig {
        RedirectConfig {
            success_delay: self.success_redirect_delay,
            countdown_secs: self.failure_countdown_secs,
            landing_route: self.landing_route.clone(),
            order_route_prefix: self.order_route_prefix.clone(),
        }
    }

    pub fn order_route(&self, order_reference: &str) -> String {
        self.redirect_config().order_route(order_reference)
    }
}

// ============================================================================
// HTTP server
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backend_connect_timeout_secs() -> u64 {
    5
}

fn default_retain_after_navigation_secs() -> u64 {
    60
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub backend_base_url: String,
    #[serde(default = "default_backend_connect_timeout_secs")]
    pub backend_connect_timeout_secs: u64,
    /// Enables redirect signature verification when set
    #[serde(default)]
    pub gateway_hash_secret: Option<String>,
    /// How long a finished workflow stays queryable after its navigation fires
    #[serde(default = "default_retain_after_navigation_secs")]
    pub retain_after_navigation_secs: u64,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend_base_url", &self.backend_base_url)
            .field("backend_connect_timeout_secs", &self.backend_connect_timeout_secs)
            .field(
                "gateway_hash_secret",
                &self.gateway_hash_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("retain_after_navigation_secs", &self.retain_after_navigation_secs)
            .finish()
    }
}

impl ServerConfig {
    /// Loads `CHECKOUT_*` environment variables, e.g. `CHECKOUT_BACKEND_BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg: ServerConfig = config::Config::builder()
            .add_source(config::Environment::with_prefix("CHECKOUT").try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "CHECKOUT_BACKEND_BASE_URL is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_connect_timeout_secs)
    }

    pub fn retain_after_navigation(&self) -> Duration {
        Duration::from_secs(self.retain_after_navigation_secs)
    }
}
