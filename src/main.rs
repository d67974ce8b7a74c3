use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use checkout_reconciler::api::{router, PaymentReturnService};
use checkout_reconciler::gateway::SignatureVerifier;
use checkout_reconciler::logging::init_tracing;
use checkout_reconciler::middleware::logging::{request_logging_middleware, UuidRequestId};
use checkout_reconciler::payments::http::HttpOrderBackend;
use checkout_reconciler::{ReconcilerConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting checkout return reconciler");

    let server_config = ServerConfig::from_env().map_err(|e| {
        error!("Failed to load server configuration: {}", e);
        e
    })?;
    let reconciler_config = ReconcilerConfig::from_env();
    reconciler_config.validate().map_err(|e| {
        error!("Invalid reconciliation configuration: {}", e);
        e
    })?;

    info!(
        config = ?server_config,
        poll_max_attempts = reconciler_config.poll_max_attempts,
        poll_interval_ms = reconciler_config.poll_interval.as_millis() as u64,
        poll_backoff = reconciler_config.poll_backoff.as_str(),
        "Configuration loaded"
    );

    let backend = HttpOrderBackend::new(
        &server_config.backend_base_url,
        server_config.backend_connect_timeout(),
        reconciler_config
            .confirm_timeout
            .max(reconciler_config.request_timeout),
    )
    .map_err(|e| {
        error!("Failed to initialize order backend client: {}", e);
        e
    })?;

    let mut service = PaymentReturnService::new(
        Arc::new(backend),
        reconciler_config,
        server_config.retain_after_navigation(),
    );
    match &server_config.gateway_hash_secret {
        Some(secret) => {
            service = service.with_signature_verifier(SignatureVerifier::new(secret.clone()));
            info!("Gateway redirect signature verification enabled");
        }
        None => info!("Gateway redirect signature verification disabled"),
    }
    let service = Arc::new(service);

    let app = router(service.clone()).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let address = server_config.bind_address();
    let listener = TcpListener::bind(&address).await.map_err(|e| {
        error!("Failed to bind {}: {}", address, e);
        e
    })?;
    info!(address = %address, "Return server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    info!("Checkout return reconciler stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
