//! HTTP surface
//!
//! - `GET /` - liveness probe, always `200` with an empty body
//! - `/github-hook` - webhook ingestion, answered by the verifier
//!
//! [`serve`] runs the router until the shutdown future resolves, then waits
//! for in-flight publishes to drain, bounded by the grace period.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::delivery::Delivery;
use crate::verifier::InboundRequest;

/// Path GitHub is configured to deliver to
pub const HOOK_PATH: &str = "/github-hook";

/// How the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight publish completed
    Drained,
    /// The grace period ran out first; remaining publishes may be lost
    TimedOut {
        /// Publishes still outstanding at the deadline
        abandoned: usize,
    },
}

/// Build the router for `delivery`
pub fn router(delivery: Arc<Delivery>) -> Router {
    Router::new()
        .route("/", get(health))
        .route(HOOK_PATH, any(hook))
        .layer(TraceLayer::new_for_http())
        .with_state(delivery)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn hook(
    State(delivery): State<Arc<Delivery>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest {
        method,
        headers,
        body,
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr),
    };
    delivery.handle(request)
}

/// Serve until `shutdown` resolves, then drain in-flight publishes.
///
/// New connections stop being accepted as soon as `shutdown` fires. The
/// drain is abandoned after `grace_period`.
pub async fn serve<F>(
    listener: TcpListener,
    delivery: Arc<Delivery>,
    shutdown: F,
    grace_period: Duration,
) -> std::io::Result<DrainOutcome>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&delivery));

    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    let tracker = delivery.tracker();
    info!(
        in_flight = tracker.in_flight(),
        "HTTP server stopped, waiting for in-flight publishes"
    );

    match tokio::time::timeout(grace_period, tracker.drain()).await {
        Ok(()) => {
            info!("All in-flight publishes completed");
            Ok(DrainOutcome::Drained)
        }
        Err(_) => {
            let abandoned = tracker.in_flight();
            error!(
                abandoned,
                grace_period_secs = grace_period.as_secs(),
                "Grace period elapsed before publishes drained"
            );
            Ok(DrainOutcome::TimedOut { abandoned })
        }
    }
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            warn!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
