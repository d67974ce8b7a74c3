//! Integration tests for the payment return reconciliation workflow
//!
//! Tests cover:
//! - Storefront scenarios: success, gateway cancel, status timeout, malformed redirect
//! - Single confirmation per workflow regardless of re-fires
//! - Early exit and bounded polling
//! - Cancellation freezing state, network calls and timers

#[cfg(test)]
mod tests {
    use checkout_reconciler::error::FailureReason;
    use checkout_reconciler::gateway::CallbackParams;
    use checkout_reconciler::payments::mock::MockOrderBackend;
    use checkout_reconciler::payments::{AuthToken, BackendError, OrderStatus};
    use checkout_reconciler::services::redirect_scheduler::NavigationIntent;
    use checkout_reconciler::workers::reconciliation::TIMEOUT_MESSAGE;
    use checkout_reconciler::{ReconcilerConfig, ReconciliationState, ReconciliationWorkflow};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
    use tokio::time::Instant;

    fn params(pairs: &[(&str, &str)]) -> CallbackParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn success_redirect() -> CallbackParams {
        params(&[
            ("vnp_ResponseCode", "00"),
            ("vnp_Amount", "10000000"),
            ("vnp_TxnRef", "ORD123"),
            ("vnp_TransactionNo", "TXN789"),
        ])
    }

    fn workflow(
        backend: Arc<MockOrderBackend>,
    ) -> (Arc<ReconciliationWorkflow>, UnboundedReceiver<NavigationIntent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let wf = ReconciliationWorkflow::new(
            backend,
            AuthToken::new("bearer-token"),
            &ReconcilerConfig::default(),
            Arc::new(tx),
        );
        (Arc::new(wf), rx)
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn scenario_a_paid_on_first_poll_navigates_to_order() {
        // Given: a successful redirect and a backend that reports Paid at once
        let backend = Arc::new(MockOrderBackend::new());
        let (wf, mut nav) = workflow(backend.clone());

        // When: the workflow runs
        assert!(wf.start(success_redirect()));
        let state = wf.finished().await;

        // Then: one confirmation with the gateway identifiers, settled on attempt 1
        assert_eq!(
            backend.confirm_calls(),
            vec![("ORD123".to_string(), "TXN789".to_string())]
        );
        match state {
            ReconciliationState::Settled {
                order_reference,
                attempts,
                snapshot,
            } => {
                assert_eq!(order_reference, "ORD123");
                assert_eq!(attempts, 1);
                assert_eq!(snapshot.status, OrderStatus::Paid);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(backend.status_count(), 1);

        // And: navigation to the order page about 3 s later
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(nav.try_recv(), Err(TryRecvError::Empty));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            nav.try_recv(),
            Ok(NavigationIntent::OrderDetail("/orders/ORD123".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_b_cancelled_at_gateway_counts_down_to_landing() {
        // Given: the customer cancelled at the gateway
        let backend = Arc::new(MockOrderBackend::new());
        let (wf, mut nav) = workflow(backend.clone());

        // When
        wf.start(params(&[("vnp_ResponseCode", "24"), ("vnp_TxnRef", "ORD123")]));
        let state = wf.finished().await;

        // Then: no backend traffic and a gateway rejection
        assert_eq!(backend.backend_calls(), 0);
        assert_eq!(state.failure_reason(), Some(FailureReason::GatewayRejected));
        assert_eq!(wf.redirect().countdown(), Some(10));

        // And: the landing navigation fires only when the countdown hits zero
        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(wf.redirect().countdown(), Some(1));
        assert_eq!(nav.try_recv(), Err(TryRecvError::Empty));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(nav.try_recv(), Ok(NavigationIntent::Landing("/".to_string())));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(nav.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_c_never_paid_times_out_as_uncertain() {
        // Given: an order that never leaves Pending
        let backend = Arc::new(MockOrderBackend::never_settles());
        let (wf, _nav) = workflow(backend.clone());
        let started = Instant::now();

        // When
        wf.start(success_redirect());
        let state = wf.finished().await;

        // Then: six reads two seconds apart, then a timeout distinct from a
        // confirmation failure
        assert_eq!(backend.confirm_count(), 1);
        assert_eq!(backend.status_count(), 6);
        for pair in backend.status_call_times().windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(2));
        }
        assert_eq!(started.elapsed(), Duration::from_secs(12));

        match state {
            ReconciliationState::Failed {
                reason, message, ..
            } => {
                assert_eq!(reason, FailureReason::ReconciliationTimeout);
                assert_ne!(reason, FailureReason::ConfirmationFailed);
                assert!(reason.is_uncertain());
                assert_eq!(message, TIMEOUT_MESSAGE);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_d_success_without_transaction_id_is_malformed() {
        let backend = Arc::new(MockOrderBackend::new());
        let (wf, _nav) = workflow(backend.clone());

        let state = wf
            .run(params(&[
                ("vnp_ResponseCode", "00"),
                ("vnp_Amount", "10000000"),
                ("vnp_TxnRef", "ORD123"),
            ]))
            .await;

        assert_eq!(state.failure_reason(), Some(FailureReason::MalformedCallback));
        assert_eq!(state.order_reference(), Some("ORD123"));
        assert_eq!(backend.backend_calls(), 0);
    }

    // ========================================================================
    // Properties
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn confirmation_failure_is_terminal_and_never_polls() {
        let backend = Arc::new(MockOrderBackend::new().with_confirm_error(
            BackendError::Http {
                status: 400,
                message: "Transaction TXN789 does not match order ORD123".to_string(),
            },
        ));
        let (wf, mut nav) = workflow(backend.clone());

        let state = wf.run(success_redirect()).await;

        match state {
            ReconciliationState::Failed {
                reason, message, ..
            } => {
                assert_eq!(reason, FailureReason::ConfirmationFailed);
                assert_eq!(message, "Transaction TXN789 does not match order ORD123");
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(backend.confirm_count(), 1);
        assert_eq!(backend.status_count(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(nav.try_recv(), Ok(NavigationIntent::Landing("/".to_string())));
        assert_eq!(backend.confirm_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refired_redirect_confirms_only_once() {
        let backend = Arc::new(MockOrderBackend::never_settles());
        let (wf, _nav) = workflow(backend.clone());

        assert!(wf.start(success_redirect()));
        assert!(!wf.start(success_redirect()));
        assert!(!wf.start(success_redirect()));
        wf.finished().await;
        let again = wf.run(success_redirect()).await;

        assert!(again.is_terminal());
        assert_eq!(backend.confirm_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settling_on_attempt_k_stops_polling() {
        let backend = Arc::new(MockOrderBackend::with_statuses(vec![
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Paid,
        ]));
        let (wf, _nav) = workflow(backend.clone());

        wf.start(success_redirect());
        let state = wf.finished().await;

        assert!(matches!(
            state,
            ReconciliationState::Settled { attempts: 3, .. }
        ));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.status_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_starts_after_confirmation_settles() {
        let backend =
            Arc::new(MockOrderBackend::new().with_confirm_delay(Duration::from_secs(5)));
        let (wf, _nav) = workflow(backend.clone());
        let started = Instant::now();

        wf.start(success_redirect());
        wf.finished().await;

        let first_read = backend.status_call_times()[0];
        assert!(first_read - started >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_failures_do_not_end_the_workflow() {
        let backend = Arc::new(MockOrderBackend::with_status_results(vec![
            Err(BackendError::Timeout(Duration::from_secs(2))),
            Err(BackendError::Decode("unexpected end of input".to_string())),
            Ok(OrderStatus::Paid),
        ]));
        let (wf, _nav) = workflow(backend.clone());

        let state = wf.run(success_redirect()).await;

        assert!(matches!(
            state,
            ReconciliationState::Settled { attempts: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_publishes_each_attempt() {
        let backend = Arc::new(MockOrderBackend::with_statuses(vec![
            OrderStatus::Pending,
            OrderStatus::Pending,
            OrderStatus::Paid,
        ]));
        let (wf, _nav) = workflow(backend.clone());
        let mut states = wf.subscribe();

        wf.start(success_redirect());

        states
            .wait_for(|s| matches!(s, ReconciliationState::Polling { attempt: 1, .. }))
            .await
            .unwrap();
        assert!(wf.guard().is_armed());

        states
            .wait_for(|s| matches!(s, ReconciliationState::Polling { attempt: 2, .. }))
            .await
            .unwrap();
        match wf.state() {
            ReconciliationState::Polling { last_snapshot, .. } => {
                assert_eq!(last_snapshot.map(|s| s.status), Some(OrderStatus::Pending));
            }
            other => panic!("unexpected state {:?}", other),
        }

        wf.finished().await;
        assert!(!wf.guard().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_polling_freezes_everything() {
        // Given: a workflow polling an order that never settles
        let backend = Arc::new(MockOrderBackend::never_settles());
        let (wf, mut nav) = workflow(backend.clone());
        wf.start(success_redirect());

        // When: it is cancelled between the second and third reads
        tokio::time::sleep(Duration::from_millis(3000)).await;
        wf.cancel();
        let frozen = wf.state();
        let calls = backend.status_count();

        // Then: no more reads, no state change, no navigation, guard released
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls, 2);
        assert_eq!(backend.status_count(), calls);
        assert_eq!(wf.state(), frozen);
        assert!(matches!(frozen, ReconciliationState::Polling { attempt: 2, .. }));
        assert_eq!(nav.try_recv(), Err(TryRecvError::Empty));
        assert!(!wf.guard().is_armed());
        assert!(wf.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_countdown_suppresses_navigation() {
        let backend = Arc::new(MockOrderBackend::new());
        let (wf, mut nav) = workflow(backend.clone());

        wf.run(params(&[("vnp_ResponseCode", "11")])).await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        wf.cancel();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(nav.try_recv(), Err(TryRecvError::Empty));
        assert!(wf.redirect().navigation().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start_prevents_any_work() {
        let backend = Arc::new(MockOrderBackend::new());
        let (wf, _nav) = workflow(backend.clone());

        wf.cancel();
        let state = wf.run(success_redirect()).await;

        assert_eq!(state, ReconciliationState::Idle);
        assert_eq!(backend.backend_calls(), 0);
    }
}
