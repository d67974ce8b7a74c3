use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{AuthToken, BackendError, OrderBackend, OrderStatus, OrderStatusSnapshot};

/// In-memory order backend for tests.
///
/// Confirmation succeeds unless configured otherwise. Status reads replay a
/// scripted sequence and then keep returning the last entry. Every call is
/// recorded so tests can assert on call counts and spacing.
///
/// Not behind `#[cfg(test)]` because the integration tests in `tests/` build it.
pub struct MockOrderBackend {
    confirm_result: Result<(), BackendError>,
    confirm_delay: Option<Duration>,
    statuses: Mutex<VecDeque<Result<OrderStatus, BackendError>>>,
    last_status: Mutex<Result<OrderStatus, BackendError>>,
    confirm_calls: Mutex<Vec<(String, String)>>,
    status_calls: Mutex<Vec<Instant>>,
    confirm_count: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockOrderBackend {
    /// Confirmation succeeds and the first status read reports `Paid`.
    pub fn new() -> Self {
        Self::with_statuses(vec![OrderStatus::Paid])
    }

    /// Confirmation succeeds; status reads follow `statuses`, repeating the last.
    pub fn with_statuses(statuses: Vec<OrderStatus>) -> Self {
        let last = statuses.last().copied().unwrap_or(OrderStatus::Pending);
        Self {
            confirm_result: Ok(()),
            confirm_delay: None,
            statuses: Mutex::new(statuses.into_iter().map(Ok).collect()),
            last_status: Mutex::new(Ok(last)),
            confirm_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            confirm_count: AtomicUsize::new(0),
        }
    }

    /// Status reads never leave `Pending`.
    pub fn never_settles() -> Self {
        Self::with_statuses(vec![OrderStatus::Pending])
    }

    /// Status reads follow `results`, which may include errors; the last entry repeats.
    pub fn with_status_results(results: Vec<Result<OrderStatus, BackendError>>) -> Self {
        let last = results
            .last()
            .cloned()
            .unwrap_or(Ok(OrderStatus::Pending));
        Self {
            statuses: Mutex::new(results.into_iter().collect()),
            last_status: Mutex::new(last),
            ..Self::new()
        }
    }

    pub fn with_confirm_error(mut self, error: BackendError) -> Self {
        self.confirm_result = Err(error);
        self
    }

    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = Some(delay);
        self
    }

    pub fn confirm_count(&self) -> usize {
        self.confirm_count.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> Vec<(String, String)> {
        lock(&self.confirm_calls).clone()
    }

    pub fn status_count(&self) -> usize {
        lock(&self.status_calls).len()
    }

    /// Instants at which status reads happened, on the tokio clock.
    pub fn status_call_times(&self) -> Vec<Instant> {
        lock(&self.status_calls).clone()
    }

    pub fn backend_calls(&self) -> usize {
        self.confirm_count() + self.status_count()
    }
}

impl Default for MockOrderBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot fixture with no payments attached.
pub fn snapshot(order_reference: &str, status: OrderStatus) -> OrderStatusSnapshot {
    OrderStatusSnapshot {
        order_id: format!("id-{order_reference}"),
        order_code: order_reference.to_string(),
        status,
        payments: Vec::new(),
    }
}

#[async_trait]
impl OrderBackend for MockOrderBackend {
    async fn confirm_payment(
        &self,
        order_reference: &str,
        transaction_id: &str,
        _token: &AuthToken,
    ) -> Result<(), BackendError> {
        self.confirm_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.confirm_calls).push((order_reference.to_string(), transaction_id.to_string()));

        if let Some(delay) = self.confirm_delay {
            tokio::time::sleep(delay).await;
        }

        self.confirm_result.clone()
    }

    async fn order_status(
        &self,
        order_reference: &str,
        _token: &AuthToken,
    ) -> Result<OrderStatusSnapshot, BackendError> {
        lock(&self.status_calls).push(Instant::now());

        let next = lock(&self.statuses).pop_front();
        let result = match next {
            Some(result) => {
                *lock(&self.last_status) = result.clone();
                result
            }
            None => lock(&self.last_status).clone(),
        };

        result.map(|status| snapshot(order_reference, status))
    }
}
