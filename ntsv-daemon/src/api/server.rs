//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::runtime::DaemonHandle;
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use ntsv_common::events::EventBus;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub handle: DaemonHandle,
    /// Lifecycle events, streamed over SSE
    pub bus: EventBus,
}

/// Build the router with every control endpoint
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        // Notifications
        .route(
            "/notifications",
            post(super::handlers::play_notification).get(super::handlers::list_notifications),
        )
        .route("/notifications/:id", delete(super::handlers::stop_notification))
        // Audio policy authority traffic
        .route("/policy/:class/command", post(super::handlers::policy_command))
        .route("/policy/:class/hint", post(super::handlers::policy_hint))
        // Desktop state
        .route("/senders/:sender", delete(super::handlers::sender_vanished))
        .route("/foreground", put(super::handlers::set_foreground))
        .route("/profile", patch(super::handlers::update_profile))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the control surface until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, ctx: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Http(format!("Listener has no address: {}", e)))?;
    info!("HTTP control surface listening on {}", addr);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP control surface stopped");
    Ok(())
}
