//! HTTP request handlers

use crate::api::server::AppContext;
use crate::error::{Error, Result};
use crate::facade::{ProfileChange, ProfileUpdate};
use crate::notification::{ManagerSnapshot, NotificationId};
use crate::policy::PolicyEvent;
use crate::runtime::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use ntsv_common::events::NsvEvent;
use ntsv_common::{NotificationHints, PolicyClass, PolicyState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

impl StatusResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    #[serde(default)]
    pub hints: NotificationHints,
    /// Requesting client; its disappearance finishes tracked notifications
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    /// -1 when the request was rejected
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PlayResponse {
    fn rejected(reason: String) -> Self {
        Self {
            id: -1,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PolicyCommandRequest {
    pub state: PolicyState,
}

#[derive(Debug, Deserialize)]
pub struct PolicyHintRequest {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ForegroundRequest {
    /// `null` when no application window is in the foreground
    #[serde(default)]
    pub window: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ProfileUpdateResponse {
    pub changes: Vec<ProfileChange>,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "ntsvd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Notifications
// ============================================================================

/// POST /notifications
///
/// Rejections (unknown category, lost preemption, handler failure) are not
/// HTTP errors: they answer `{"id": -1}` with the reason.
pub async fn play_notification(
    State(ctx): State<AppContext>,
    Json(request): Json<PlayRequest>,
) -> Result<Json<PlayResponse>> {
    let hints = match request.hints.resolve() {
        Ok(hints) => hints,
        Err(e) => {
            info!("Rejecting notification: {}", e);
            ctx.bus.emit_lossy(NsvEvent::NotificationRejected {
                category: None,
                reason: e.to_string(),
                timestamp: chrono::Utc::now(),
            });
            return Ok(Json(PlayResponse::rejected(e.to_string())));
        }
    };

    match ctx.handle.play(hints, request.sender).await {
        Ok(id) => Ok(Json(PlayResponse {
            id: i64::from(id.0),
            reason: None,
        })),
        Err(Error::Rejected(reason)) => Ok(Json(PlayResponse::rejected(reason))),
        Err(e) => Err(e),
    }
}

/// GET /notifications
pub async fn list_notifications(State(ctx): State<AppContext>) -> Result<Json<ManagerSnapshot>> {
    Ok(Json(ctx.handle.snapshot().await?))
}

/// DELETE /notifications/:id
pub async fn stop_notification(
    State(ctx): State<AppContext>,
    Path(id): Path<u32>,
) -> Result<Json<StatusResponse>> {
    ctx.handle.stop(NotificationId(id)).await?;
    Ok(Json(StatusResponse::new("stopped")))
}

// ============================================================================
// Audio policy
// ============================================================================

/// POST /policy/:class/command - authority commands the class holder
pub async fn policy_command(
    State(ctx): State<AppContext>,
    Path(class): Path<String>,
    Json(request): Json<PolicyCommandRequest>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    let class: PolicyClass = class.parse()?;
    debug!("Policy command {} for class {}", request.state, class);
    ctx.handle.post(DaemonEvent::Policy(PolicyEvent::StateRequest {
        class,
        state: request.state,
    }));
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::new("accepted"))))
}

/// POST /policy/:class/hint - authority broadcast for a passive class
pub async fn policy_hint(
    State(ctx): State<AppContext>,
    Path(class): Path<String>,
    Json(request): Json<PolicyHintRequest>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    let class: PolicyClass = class.parse()?;
    debug!("Policy hint for class {}: allowed={}", class, request.allowed);
    ctx.handle.post(DaemonEvent::Policy(PolicyEvent::StateHint {
        class,
        allowed: request.allowed,
    }));
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::new("accepted"))))
}

// ============================================================================
// Desktop state
// ============================================================================

/// DELETE /senders/:sender - the sending client went away
pub async fn sender_vanished(
    State(ctx): State<AppContext>,
    Path(sender): Path<String>,
) -> (StatusCode, Json<StatusResponse>) {
    ctx.handle.post(DaemonEvent::SenderVanished(sender));
    (StatusCode::ACCEPTED, Json(StatusResponse::new("accepted")))
}

/// PUT /foreground
pub async fn set_foreground(
    State(ctx): State<AppContext>,
    Json(request): Json<ForegroundRequest>,
) -> (StatusCode, Json<StatusResponse>) {
    ctx.handle
        .post(DaemonEvent::ForegroundChanged(request.window));
    (StatusCode::ACCEPTED, Json(StatusResponse::new("accepted")))
}

/// PATCH /profile
pub async fn update_profile(
    State(ctx): State<AppContext>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileUpdateResponse>> {
    let changes = ctx.handle.update_profile(update).await?;
    info!("Profile updated ({} changes)", changes.len());
    Ok(Json(ProfileUpdateResponse { changes }))
}
