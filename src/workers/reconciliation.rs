//! Payment Return Reconciliation Worker
//!
//! Drives one gateway redirect from arrival to a terminal state:
//! - Parses and classifies the redirect parameters (no network)
//! - Issues the single payment confirmation to the order backend
//! - Polls order status until the payment settles or the budget runs out
//! - Hands the terminal state to the redirect scheduler
//!
//! The current state is published on a watch channel, which is the only
//! source of truth for anything rendering progress. Once a terminal state is
//! published nothing mutates it, and after `cancel()` nothing mutates state at
//! all.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::error::FailureReason;
use crate::gateway::{CallbackParams, CallbackVerdict, GatewayCallbackResult, SignatureVerifier};
use crate::logging::mask_reference;
use crate::payments::{AuthToken, OrderBackend, OrderStatusSnapshot};
use crate::services::cancelled;
use crate::services::confirmation::ConfirmationClient;
use crate::services::redirect_scheduler::{Navigator, RedirectScheduler};
use crate::services::status_poller::{PollError, StatusPoller};
use crate::services::unsaved_work_guard::{LeaveDecision, UnsavedWorkGuard};

/// Shown when the poll budget runs out; the payment may still have gone through.
pub const TIMEOUT_MESSAGE: &str =
    "Payment status unknown. Please check your orders later or contact support.";

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconciliationState {
    Idle,
    ParsingCallback,
    Confirming {
        order_reference: String,
    },
    Polling {
        order_reference: String,
        /// Attempts completed so far; 0 before the first read returns
        attempt: u32,
        last_snapshot: Option<OrderStatusSnapshot>,
    },
    Settled {
        order_reference: String,
        snapshot: OrderStatusSnapshot,
        attempts: u32,
    },
    Failed {
        reason: FailureReason,
        message: String,
        order_reference: Option<String>,
    },
}

impl ReconciliationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationState::Idle => "idle",
            ReconciliationState::ParsingCallback => "parsing_callback",
            ReconciliationState::Confirming { .. } => "confirming",
            ReconciliationState::Polling { .. } => "polling",
            ReconciliationState::Settled { .. } => "settled",
            ReconciliationState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationState::Settled { .. } | ReconciliationState::Failed { .. }
        )
    }

    /// States during which leaving the page needs confirmation.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ReconciliationState::Confirming { .. } | ReconciliationState::Polling { .. }
        )
    }

    pub fn order_reference(&self) -> Option<&str> {
        match self {
            ReconciliationState::Confirming { order_reference }
            | ReconciliationState::Polling {
                order_reference, ..
            }
            | ReconciliationState::Settled {
                order_reference, ..
            } => Some(order_reference),
            ReconciliationState::Failed {
                order_reference, ..
            } => order_reference.as_deref(),
            ReconciliationState::Idle | ReconciliationState::ParsingCallback => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ReconciliationState::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &ReconciliationState) -> bool {
        use ReconciliationState::*;

        match (self, next) {
            (Idle, ParsingCallback) => true,

            // Callback classification
            (ParsingCallback, Confirming { .. }) => true,
            (ParsingCallback, Failed { reason, .. }) => reason.is_callback_failure(),

            // Confirmation
            (Confirming { .. }, Polling { attempt: 0, .. }) => true,
            (Confirming { .. }, Failed { reason, .. }) => {
                *reason == FailureReason::ConfirmationFailed
            }

            // Polling progress and outcome
            (Polling { attempt: from, .. }, Polling { attempt: to, .. }) => to > from,
            (Polling { .. }, Settled { .. }) => true,
            (Polling { .. }, Failed { reason, .. }) => {
                *reason == FailureReason::ReconciliationTimeout
            }

            _ => false,
        }
    }
}

// ============================================================================
// Workflow
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ReconciliationWorkflow {
    id: Uuid,
    token: AuthToken,
    confirmation: ConfirmationClient,
    poller: StatusPoller,
    verifier: Option<SignatureVerifier>,
    callback: OnceLock<GatewayCallbackResult>,
    state_tx: watch::Sender<ReconciliationState>,
    cancel_tx: watch::Sender<bool>,
    started: AtomicBool,
    guard: UnsavedWorkGuard,
    redirect: RedirectScheduler,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationWorkflow {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        token: AuthToken,
        config: &ReconcilerConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReconciliationState::Idle);
        let (cancel_tx, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            token,
            confirmation: ConfirmationClient::new(backend.clone(), config.confirm_timeout),
            poller: StatusPoller::new(backend, config.poll_policy()),
            verifier: None,
            callback: OnceLock::new(),
            state_tx,
            cancel_tx,
            started: AtomicBool::new(false),
            guard: UnsavedWorkGuard::new(),
            redirect: RedirectScheduler::new(config.redirect_config(), navigator),
            task: Mutex::new(None),
        }
    }

    /// Rejects redirects whose signature does not verify as malformed.
    pub fn with_signature_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether `token` is the credential this workflow confirms and polls with.
    pub fn is_owned_by(&self, token: &AuthToken) -> bool {
        self.token == *token
    }

    pub fn state(&self) -> ReconciliationState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState> {
        self.state_tx.subscribe()
    }

    /// Parsed redirect, available once parsing has happened.
    pub fn callback(&self) -> Option<&GatewayCallbackResult> {
        self.callback.get()
    }

    pub fn guard(&self) -> &UnsavedWorkGuard {
        &self.guard
    }

    pub fn leave_decision(&self) -> LeaveDecision {
        self.guard.on_leave_attempt()
    }

    pub fn redirect(&self) -> &RedirectScheduler {
        &self.redirect
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Spawns the workflow on the runtime. Returns `false` without doing
    /// anything if this instance was already started.
    pub fn start(self: &Arc<Self>, params: CallbackParams) -> bool {
        if !self.claim_start() {
            return false;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.drive(params).await;
        });
        *lock(&self.task) = Some(handle);
        true
    }

    /// Runs the workflow to completion on the current task and returns the
    /// final state. A second call returns the current state immediately.
    pub async fn run(&self, params: CallbackParams) -> ReconciliationState {
        if self.claim_start() {
            self.drive(params).await;
        }
        self.state()
    }

    /// Resolves when the workflow reaches a terminal state or is cancelled.
    pub async fn finished(&self) -> ReconciliationState {
        let mut state_rx = self.state_tx.subscribe();
        let mut cancel_rx = self.cancel_tx.subscribe();

        tokio::select! {
            _ = state_rx.wait_for(|state| state.is_terminal()) => {}
            _ = cancelled(&mut cancel_rx) => {}
        }
        self.state()
    }

    /// Tears the workflow down: stops polling and any countdown, releases the
    /// guard, and freezes the published state.
    pub fn cancel(&self) {
        if self.cancel_tx.send_replace(true) {
            return;
        }

        self.guard.release();
        self.redirect.close();
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }

        info!(
            workflow_id = %self.id,
            state = self.state().as_str(),
            "Reconciliation cancelled"
        );
    }

    fn claim_start(&self) -> bool {
        let claimed = self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !claimed {
            debug!(workflow_id = %self.id, "Workflow already started, ignoring");
        }
        claimed
    }

    #[instrument(skip(self, params), fields(workflow_id = %self.id))]
    async fn drive(&self, params: CallbackParams) {
        let mut cancel_rx = self.cancel_tx.subscribe();

        if !self.transition(ReconciliationState::ParsingCallback) {
            return;
        }

        let callback = GatewayCallbackResult::from_params(&params);
        let order_hint = callback.order_reference.clone();
        let verdict = match self.verifier.as_ref().map(|v| v.verify(&params)) {
            Some(Err(e)) => CallbackVerdict::Rejected {
                reason: FailureReason::MalformedCallback,
                message: format!("Payment result could not be verified: {}", e),
            },
            _ => callback.verdict(),
        };
        let _ = self.callback.set(callback);

        let (order_reference, transaction_id) = match verdict {
            CallbackVerdict::Confirmable {
                order_reference,
                transaction_id,
            } => (order_reference, transaction_id),
            CallbackVerdict::Rejected { reason, message } => {
                self.finish(ReconciliationState::Failed {
                    reason,
                    message,
                    order_reference: order_hint,
                });
                return;
            }
        };

        self.guard.arm();
        if !self.transition(ReconciliationState::Confirming {
            order_reference: order_reference.clone(),
        }) {
            self.guard.release();
            return;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => return,
            outcome = self.confirmation.confirm(&order_reference, &transaction_id, &self.token) => outcome,
        };

        if let Err(e) = outcome {
            self.finish(ReconciliationState::Failed {
                reason: FailureReason::ConfirmationFailed,
                message: e.to_string(),
                order_reference: Some(order_reference),
            });
            return;
        }

        if !self.transition(ReconciliationState::Polling {
            order_reference: order_reference.clone(),
            attempt: 0,
            last_snapshot: None,
        }) {
            return;
        }

        let mut last_snapshot: Option<OrderStatusSnapshot> = None;
        let result = self
            .poller
            .poll_until_settled(&order_reference, &self.token, &mut cancel_rx, |attempt| {
                if attempt.snapshot.is_some() {
                    last_snapshot = attempt.snapshot.clone();
                }
                self.transition(ReconciliationState::Polling {
                    order_reference: order_reference.clone(),
                    attempt: attempt.ordinal,
                    last_snapshot: last_snapshot.clone(),
                });
            })
            .await;

        match result {
            Ok(settled) => self.finish(ReconciliationState::Settled {
                order_reference,
                snapshot: settled.snapshot,
                attempts: settled.attempt,
            }),
            Err(PollError::Timeout { attempts, .. }) => {
                warn!(
                    order_ref = %mask_reference(&order_reference),
                    attempts,
                    "Payment status still unknown after polling"
                );
                self.finish(ReconciliationState::Failed {
                    reason: FailureReason::ReconciliationTimeout,
                    message: TIMEOUT_MESSAGE.to_string(),
                    order_reference: Some(order_reference),
                });
            }
            Err(PollError::Cancelled) => {
                debug!("Polling stopped by cancellation");
            }
        }
    }

    /// Publishes a terminal state and starts its follow-up navigation.
    fn finish(&self, terminal: ReconciliationState) {
        let settled_reference = match &terminal {
            ReconciliationState::Settled {
                order_reference, ..
            } => Some(order_reference.clone()),
            _ => None,
        };

        if !self.transition(terminal) || self.is_cancelled() {
            return;
        }

        match settled_reference {
            Some(order_reference) => self.redirect.schedule_success(&order_reference),
            None => self.redirect.start_countdown(),
        }
    }

    /// Applies `next` if it is a legal move and the workflow is not cancelled.
    fn transition(&self, next: ReconciliationState) -> bool {
        let to = next.as_str();
        let order_ref = next
            .order_reference()
            .map(mask_reference)
            .unwrap_or_default();
        let reason = next.failure_reason();
        let mut from = "";

        let applied = self.state_tx.send_if_modified(|current| {
            from = current.as_str();
            if *self.cancel_tx.borrow() || !current.can_transition_to(&next) {
                return false;
            }
            if next.is_terminal() {
                self.guard.release();
            }
            *current = next;
            true
        });

        if !applied {
            debug!(
                workflow_id = %self.id,
                from,
                to,
                cancelled = self.is_cancelled(),
                "Transition refused"
            );
        } else if from == to {
            debug!(workflow_id = %self.id, order_ref = %order_ref, state = to, "State updated");
        } else {
            info!(
                workflow_id = %self.id,
                order_ref = %order_ref,
                from,
                to,
                reason = reason.map(|r| r.as_str()).unwrap_or(""),
                "Reconciliation state changed"
            );
        }
        applied
    }
}
