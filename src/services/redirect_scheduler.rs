//! Delayed post-reconciliation navigation
//!
//! A settled order navigates to its detail page after a short grace delay. A
//! failed or timed-out order shows a one-second countdown and navigates to the
//! landing page when it reaches zero. Each schedule fires at most once and a
//! new schedule supersedes the previous one. A closed scheduler never fires.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::logging::mask_reference;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "route", rename_all = "snake_case")]
pub enum NavigationIntent {
    OrderDetail(String),
    Landing(String),
}

impl NavigationIntent {
    pub fn route(&self) -> &str {
        match self {
            NavigationIntent::OrderDetail(route) | NavigationIntent::Landing(route) => route,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationIntent::OrderDetail(_) => "order_detail",
            NavigationIntent::Landing(_) => "landing",
        }
    }
}

/// Receives navigation once a schedule fires.
pub trait Navigator: Send + Sync {
    fn navigate(&self, intent: NavigationIntent);
}

impl Navigator for mpsc::UnboundedSender<NavigationIntent> {
    fn navigate(&self, intent: NavigationIntent) {
        if self.send(intent).is_err() {
            warn!("Navigation receiver dropped");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedirectConfig {
    pub success_delay: Duration,
    pub countdown_secs: u64,
    pub landing_route: String,
    pub order_route_prefix: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_millis(3000),
            countdown_secs: 10,
            landing_route: "/".to_string(),
            order_route_prefix: "/orders".to_string(),
        }
    }
}

impl RedirectConfig {
    pub fn order_route(&self, order_reference: &str) -> String {
        format!(
            "{}/{}",
            self.order_route_prefix.trim_end_matches('/'),
            order_reference
        )
    }
}

struct Inner {
    config: RedirectConfig,
    navigator: Arc<dyn Navigator>,
    countdown: watch::Sender<Option<u64>>,
    navigation: watch::Sender<Option<NavigationIntent>>,
    epoch: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn fire(&self, epoch: u64, intent: NavigationIntent) {
        if !self.is_current(epoch) {
            debug!("Superseded schedule skipped");
            return;
        }
        info!(
            target_kind = intent.as_str(),
            route = %intent.route(),
            "Navigating"
        );
        self.navigation.send_replace(Some(intent.clone()));
        self.navigator.navigate(intent);
    }
}

pub struct RedirectScheduler {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RedirectScheduler {
    pub fn new(config: RedirectConfig, navigator: Arc<dyn Navigator>) -> Self {
        let (countdown, _) = watch::channel(None);
        let (navigation, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                navigator,
                countdown,
                navigation,
                epoch: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RedirectConfig {
        &self.inner.config
    }

    /// Navigates to the order page after the grace delay. Supersedes any
    /// running countdown.
    pub fn schedule_success(&self, order_reference: &str) {
        if self.is_closed() {
            debug!("Scheduler closed, success navigation dropped");
            return;
        }
        let epoch = self.supersede();
        let inner = self.inner.clone();
        let intent = NavigationIntent::OrderDetail(inner.config.order_route(order_reference));
        let delay = inner.config.success_delay;

        info!(
            order_ref = %mask_reference(order_reference),
            delay_ms = delay.as_millis() as u64,
            "Scheduled order page navigation"
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(epoch, intent);
        });
        *lock(&self.task) = Some(handle);
    }

    /// Starts the failure countdown. The landing navigation fires only when the
    /// displayed value reaches zero; a zero-length countdown fires immediately.
    pub fn start_countdown(&self) {
        if self.is_closed() {
            debug!("Scheduler closed, countdown dropped");
            return;
        }
        let epoch = self.supersede();
        let inner = self.inner.clone();
        let seconds = inner.config.countdown_secs;
        let intent = NavigationIntent::Landing(inner.config.landing_route.clone());

        info!(seconds, "Started landing countdown");
        inner.countdown.send_replace(Some(seconds));

        if seconds == 0 {
            inner.fire(epoch, intent);
            return;
        }

        let handle = tokio::spawn(async move {
            let mut remaining = seconds;
            while remaining > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if !inner.is_current(epoch) {
                    return;
                }
                remaining -= 1;
                inner.countdown.send_replace(Some(remaining));
            }
            inner.fire(epoch, intent);
        });
        *lock(&self.task) = Some(handle);
    }

    /// Stops whatever is scheduled. Nothing fires afterwards.
    pub fn cancel(&self) {
        self.supersede();
    }

    /// Cancels and refuses every later schedule. Used on teardown.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.supersede();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Seconds left on the failure countdown, if one is running or finished.
    pub fn countdown(&self) -> Option<u64> {
        *self.inner.countdown.borrow()
    }

    pub fn subscribe_countdown(&self) -> watch::Receiver<Option<u64>> {
        self.inner.countdown.subscribe()
    }

    /// Navigation that has already fired, if any.
    pub fn navigation(&self) -> Option<NavigationIntent> {
        self.inner.navigation.borrow().clone()
    }

    pub fn subscribe_navigation(&self) -> watch::Receiver<Option<NavigationIntent>> {
        self.inner.navigation.subscribe()
    }

    fn supersede(&self) -> u64 {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        self.inner.countdown.send_replace(None);
        epoch
    }
}

impl Drop for RedirectScheduler {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn scheduler(
        config: RedirectConfig,
    ) -> (RedirectScheduler, mpsc::UnboundedReceiver<NavigationIntent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RedirectScheduler::new(config, Arc::new(tx)), rx)
    }

    #[test]
    fn order_route_handles_trailing_slash() {
        let config = RedirectConfig {
            order_route_prefix: "/orders/".to_string(),
            ..RedirectConfig::default()
        };
        assert_eq!(config.order_route("ORD123"), "/orders/ORD123");
    }

    #[tokio::test(start_paused = true)]
    async fn success_navigates_after_grace_delay() {
        let (scheduler, mut rx) = scheduler(RedirectConfig::default());
        scheduler.schedule_success("ORD123");

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            rx.try_recv(),
            Ok(NavigationIntent::OrderDetail("/orders/ORD123".to_string()))
        );
        assert_eq!(
            scheduler.navigation().map(|n| n.route().to_string()),
            Some("/orders/ORD123".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_fires_once_at_zero() {
        let (scheduler, mut rx) = scheduler(RedirectConfig::default());
        scheduler.start_countdown();
        assert_eq!(scheduler.countdown(), Some(10));

        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(scheduler.countdown(), Some(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(scheduler.countdown(), Some(0));
        assert_eq!(rx.try_recv(), Ok(NavigationIntent::Landing("/".to_string())));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_countdown_fires_immediately() {
        let (scheduler, mut rx) = scheduler(RedirectConfig {
            countdown_secs: 0,
            ..RedirectConfig::default()
        });
        scheduler.start_countdown();
        assert_eq!(rx.try_recv(), Ok(NavigationIntent::Landing("/".to_string())));
        assert_eq!(scheduler.countdown(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn success_supersedes_running_countdown() {
        let (scheduler, mut rx) = scheduler(RedirectConfig::default());
        scheduler.start_countdown();
        tokio::time::sleep(Duration::from_millis(4500)).await;

        scheduler.schedule_success("ORD123");
        assert_eq!(scheduler.countdown(), None);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(
            rx.try_recv(),
            Ok(NavigationIntent::OrderDetail("/orders/ORD123".to_string()))
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_navigation() {
        let (scheduler, mut rx) = scheduler(RedirectConfig::default());
        scheduler.start_countdown();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        scheduler.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(!scheduler.is_scheduled());
        assert!(scheduler.navigation().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_scheduler_ignores_later_schedules() {
        let (scheduler, mut rx) = scheduler(RedirectConfig {
            countdown_secs: 0,
            ..RedirectConfig::default()
        });
        scheduler.close();

        scheduler.schedule_success("ORD123");
        scheduler.start_countdown();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(scheduler.is_closed());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(scheduler.countdown(), None);
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_a_pending_success_navigation() {
        let (scheduler, mut rx) = scheduler(RedirectConfig::default());
        scheduler.schedule_success("ORD123");
        tokio::time::sleep(Duration::from_millis(1000)).await;

        scheduler.close();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(scheduler.navigation().is_none());
    }
}
