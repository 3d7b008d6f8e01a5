//! Worker control endpoints
//!
//! These stand in for the events a browser would dispatch to the worker:
//! page messages, background and periodic sync, push deliveries and
//! notification clicks.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use offline_core::{
    CacheStats, ControlReply, Lifecycle, PeriodicSyncTag, RefreshReport, SyncReport, SyncTag,
};
use offline_storage::PendingSubmission;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Body of a notification click
#[derive(Debug, Deserialize)]
pub struct NotificationClickRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct NotificationClickResponse {
    /// URL the client should open, if any
    pub open: Option<String>,
}

/// Body of a queued form submission
#[derive(Debug, Deserialize)]
pub struct QueueSubmissionRequest {
    pub id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub total_size_human: String,
    pub hit_rate: f64,
    pub max_size: u64,
}

// ==================== Messages ====================

/// POST /__sw/message
///
/// Malformed bodies are acknowledged with an `ignored` reply, never an error.
async fn message(State(state): State<AppState>, body: Bytes) -> Json<ControlReply> {
    let reply = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(raw) => state.worker.handle_raw_message(raw).await,
        Err(e) => {
            warn!("Ignoring unreadable control message: {}", e);
            ControlReply::Ignored {
                reason: e.to_string(),
            }
        }
    };

    Json(reply)
}

// ==================== Sync ====================

/// POST /__sw/sync/{tag}
async fn sync(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<SyncReport>, ApiError> {
    let tag: SyncTag = tag.parse().inspect_err(|e| warn!("{}", e))?;
    Ok(Json(state.worker.sync(tag).await?))
}

/// POST /__sw/periodic-sync/{tag}
async fn periodic_sync(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<RefreshReport>, ApiError> {
    let tag: PeriodicSyncTag = tag.parse().inspect_err(|e| warn!("{}", e))?;
    Ok(Json(state.worker.periodic_sync(tag).await?))
}

// ==================== Push ====================

/// POST /__sw/push
async fn push(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let data = (!body.is_empty()).then_some(&body[..]);

    match state.worker.push_notification(data)? {
        Some(notification) => Ok(Json(notification).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /__sw/notification-click
async fn notification_click(
    State(state): State<AppState>,
    Json(request): Json<NotificationClickRequest>,
) -> Json<NotificationClickResponse> {
    let open = state
        .worker
        .notification_click(&request.action, &request.data);
    Json(NotificationClickResponse { open })
}

// ==================== Pending Submissions ====================

/// GET /__sw/pending
async fn list_pending(
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingSubmission>>, ApiError> {
    Ok(Json(state.worker.pending_submissions().await?))
}

/// POST /__sw/pending
async fn queue_pending(
    State(state): State<AppState>,
    Json(request): Json<QueueSubmissionRequest>,
) -> Result<(StatusCode, Json<PendingSubmission>), ApiError> {
    let submission = state
        .worker
        .queue_submission(request.id, request.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

// ==================== Inspection ====================

/// GET /__sw/state
async fn worker_state(State(state): State<AppState>) -> Json<Lifecycle> {
    Json(state.worker.lifecycle().await)
}

/// GET /__sw/stats
async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let cache = state.worker.cache();
    let stats = cache.stats().await?;

    let lookups = stats.hit_count + stats.miss_count;
    let hit_rate = if lookups > 0 {
        stats.hit_count as f64 / lookups as f64
    } else {
        0.0
    };

    info!("Cache stats requested ({} bytes)", stats.total_size);

    Ok(Json(StatsResponse {
        total_size_human: format_bytes(stats.total_size),
        hit_rate,
        max_size: cache.config().max_size,
        stats,
    }))
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Create worker control routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/__sw/message", post(message))
        .route("/__sw/sync/{tag}", post(sync))
        .route("/__sw/periodic-sync/{tag}", post(periodic_sync))
        .route("/__sw/push", post(push))
        .route("/__sw/notification-click", post(notification_click))
        .route("/__sw/pending", get(list_pending).post(queue_pending))
        .route("/__sw/state", get(worker_state))
        .route("/__sw/stats", get(stats))
}
