//! Payment return API endpoints
//!
//! Receives the gateway's browser redirect, runs one reconciliation workflow
//! per order reference, and serves the return page's view of it.

pub mod models;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::gateway::callback::ORDER_REFERENCE;
use crate::gateway::{CallbackParams, CallbackVerdict, GatewayCallbackResult, SignatureVerifier};
use crate::logging::mask_reference;
use crate::payments::{AuthToken, OrderBackend};
use crate::services::redirect_scheduler::{NavigationIntent, Navigator};
use crate::services::unsaved_work_guard::LeaveDecision;
use crate::workers::reconciliation::{ReconciliationState, ReconciliationWorkflow};

pub use models::{ApiError, CallToAction, HealthResponse, Indicator, ReturnView};

type Registry = Arc<RwLock<HashMap<String, Arc<ReconciliationWorkflow>>>>;

/// How long a fresh redirect waits for the workflow to classify the callback
/// before answering.
const CLASSIFY_WAIT: Duration = Duration::from_millis(250);

// ============================================================================
// Registry eviction
// ============================================================================

/// Evicts a workflow from the registry some time after its navigation fires.
struct RegistryNavigator {
    key: String,
    workflow_id: OnceLock<Uuid>,
    registry: Registry,
    retain: Duration,
}

impl Navigator for RegistryNavigator {
    fn navigate(&self, intent: NavigationIntent) {
        let Some(workflow_id) = self.workflow_id.get().copied() else {
            return;
        };
        let key = self.key.clone();
        let registry = self.registry.clone();
        let retain = self.retain;

        debug!(
            key = %mask_reference(&key),
            route = %intent.route(),
            retain_secs = retain.as_secs(),
            "Navigation fired, scheduling eviction"
        );

        tokio::spawn(async move {
            tokio::time::sleep(retain).await;
            let mut registry = registry.write().await;
            if registry.get(&key).map(|wf| wf.id()) == Some(workflow_id) {
                registry.remove(&key);
                info!(key = %mask_reference(&key), "Evicted finished payment return");
            }
        });
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct PaymentReturnService {
    backend: Arc<dyn OrderBackend>,
    config: ReconcilerConfig,
    verifier: Option<SignatureVerifier>,
    retain_after_navigation: Duration,
    registry: Registry,
}

impl PaymentReturnService {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        config: ReconcilerConfig,
        retain_after_navigation: Duration,
    ) -> Self {
        Self {
            backend,
            config,
            verifier: None,
            retain_after_navigation,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_signature_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Registry key: the order reference, or a fresh id when the redirect has none.
    pub fn registry_key(params: &CallbackParams) -> String {
        params
            .get(ORDER_REFERENCE)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()))
    }

    /// Returns the workflow for this redirect, starting one if none exists.
    /// The flag is `true` when this call created it.
    ///
    /// A confirmable redirect replaces a workflow whose earlier redirect was
    /// rejected, so a retried payment still gets confirmed. A repeat from a
    /// different caller is reported as not found.
    pub async fn begin(
        &self,
        params: CallbackParams,
        token: AuthToken,
    ) -> Result<(String, Arc<ReconciliationWorkflow>, bool), ApiError> {
        let key = Self::registry_key(&params);
        let mut registry = self.registry.write().await;

        if let Some(existing) = registry.get(&key) {
            if Self::supersedes(existing, &params) {
                info!(
                    key = %mask_reference(&key),
                    workflow_id = %existing.id(),
                    "Earlier redirect was rejected, replacing workflow"
                );
                existing.cancel();
            } else if existing.is_owned_by(&token) {
                info!(
                    key = %mask_reference(&key),
                    workflow_id = %existing.id(),
                    "Repeated payment return, reusing workflow"
                );
                return Ok((key, existing.clone(), false));
            } else {
                warn!(
                    key = %mask_reference(&key),
                    "Repeated payment return from a different caller"
                );
                return Err(ApiError::NotFound(key));
            }
        }

        let navigator = Arc::new(RegistryNavigator {
            key: key.clone(),
            workflow_id: OnceLock::new(),
            registry: self.registry.clone(),
            retain: self.retain_after_navigation,
        });
        let mut workflow = ReconciliationWorkflow::new(
            self.backend.clone(),
            token,
            &self.config,
            navigator.clone(),
        );
        if let Some(verifier) = &self.verifier {
            workflow = workflow.with_signature_verifier(verifier.clone());
        }
        let workflow = Arc::new(workflow);
        let _ = navigator.workflow_id.set(workflow.id());

        registry.insert(key.clone(), workflow.clone());
        drop(registry);

        info!(
            key = %mask_reference(&key),
            workflow_id = %workflow.id(),
            "Starting payment return reconciliation"
        );
        workflow.start(params);

        Ok((key, workflow, true))
    }

    /// True when `existing` failed on its redirect and `params` can be confirmed.
    fn supersedes(existing: &ReconciliationWorkflow, params: &CallbackParams) -> bool {
        let rejected = existing
            .state()
            .failure_reason()
            .is_some_and(|reason| reason.is_callback_failure());
        rejected
            && matches!(
                GatewayCallbackResult::from_params(params).verdict(),
                CallbackVerdict::Confirmable { .. }
            )
    }

    /// The workflow under `key`, if `token` owns it.
    pub async fn get(&self, key: &str, token: &AuthToken) -> Option<Arc<ReconciliationWorkflow>> {
        self.registry
            .read()
            .await
            .get(key)
            .filter(|workflow| workflow.is_owned_by(token))
            .cloned()
    }

    /// Cancels and forgets the workflow under `key` if `token` owns it.
    pub async fn remove(&self, key: &str, token: &AuthToken) -> Option<Arc<ReconciliationWorkflow>> {
        let mut registry = self.registry.write().await;
        if !registry.get(key)?.is_owned_by(token) {
            return None;
        }
        let workflow = registry.remove(key)?;
        drop(registry);
        workflow.cancel();
        Some(workflow)
    }

    pub async fn active_workflows(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Cancels every tracked workflow.
    pub async fn shutdown(&self) {
        let mut registry = self.registry.write().await;
        for workflow in registry.values() {
            workflow.cancel();
        }
        info!(count = registry.len(), "Cancelled tracked payment returns");
        registry.clear();
    }
}

async fn wait_until_classified(workflow: &ReconciliationWorkflow) {
    let mut states = workflow.subscribe();
    let _ = tokio::time::timeout(
        CLASSIFY_WAIT,
        states.wait_for(|s| {
            !matches!(
                s,
                ReconciliationState::Idle | ReconciliationState::ParsingCallback
            )
        }),
    )
    .await;
}

// ============================================================================
// Handlers
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Result<AuthToken, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(AuthToken::from_authorization_header)
        .ok_or(ApiError::Unauthorized)
}

/// GET /payment/return?<gateway params>
pub async fn receive_payment_return(
    State(service): State<Arc<PaymentReturnService>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<(StatusCode, Json<ReturnView>), ApiError> {
    let token = bearer_token(&headers)?;

    let (key, workflow, created) = service.begin(params, token).await?;
    if created {
        wait_until_classified(&workflow).await;
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ReturnView::from_workflow(&key, &workflow))))
}

/// GET /payment/return/{key}
pub async fn get_payment_return(
    State(service): State<Arc<PaymentReturnService>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<ReturnView>, ApiError> {
    let token = bearer_token(&headers)?;
    let workflow = service
        .get(&key, &token)
        .await
        .ok_or_else(|| ApiError::NotFound(key.clone()))?;
    Ok(Json(ReturnView::from_workflow(&key, &workflow)))
}

/// GET /payment/return/{key}/leave
pub async fn leave_payment_return(
    State(service): State<Arc<PaymentReturnService>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<LeaveDecision>, ApiError> {
    let token = bearer_token(&headers)?;
    let workflow = service
        .get(&key, &token)
        .await
        .ok_or_else(|| ApiError::NotFound(key.clone()))?;
    Ok(Json(workflow.leave_decision()))
}

/// DELETE /payment/return/{key}
pub async fn cancel_payment_return(
    State(service): State<Arc<PaymentReturnService>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)?;
    service
        .remove(&key, &token)
        .await
        .ok_or_else(|| ApiError::NotFound(key.clone()))?;
    info!(key = %mask_reference(&key), "Payment return cancelled by client");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health(State(service): State<Arc<PaymentReturnService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_workflows: service.active_workflows().await,
    })
}

pub fn router(service: Arc<PaymentReturnService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payment/return", get(receive_payment_return))
        .route(
            "/payment/return/{key}",
            get(get_payment_return).delete(cancel_payment_return),
        )
        .route("/payment/return/{key}/leave", get(leave_payment_return))
        .with_state(service)
}
