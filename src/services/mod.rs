pub mod confirmation;
pub mod redirect_scheduler;
pub mod status_poller;
pub mod unsaved_work_guard;

use tokio::sync::watch;

/// Resolves once the cancel flag flips to `true`.
///
/// If the sender is dropped without cancelling, never resolves.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
