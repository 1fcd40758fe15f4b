use crate::error::StorageError;
use crate::siren::SirenState;
use crate::storage::{DetectionEvent, DetectionEventPatch};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct SystemToggleRequest {
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct SirenToggleRequest {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Combined security-system status for the dashboard
pub async fn system_status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let system_active = state.armed.is_armed();
    let camera_connected = state.connected.load(Ordering::Relaxed);

    let (status_display, message) = match (system_active, camera_connected) {
        (true, true) => (
            "ON - Connected",
            "System is active and camera is connected.",
        ),
        (true, false) => (
            "ON - Disconnected",
            "System is active but camera is disconnected.",
        ),
        (false, _) => ("OFF", "System is paused."),
    };

    Json(json!({
        "status": state.armed.state().as_str(),
        "status_display": status_display,
        "message": message,
        "camera_connected": camera_connected,
        "siren_state": state.siren.state().as_str(),
    }))
}

/// Manually turn the security system ON or OFF
pub async fn toggle_system_handler(
    State(state): State<ApiState>,
    Json(request): Json<SystemToggleRequest>,
) -> Response {
    match request.state.to_uppercase().as_str() {
        "ON" => state.armed.arm(),
        "OFF" => state.armed.disarm().await,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "State must be ON or OFF." })),
            )
                .into_response()
        }
    }

    let new_state = state.armed.state().as_str();
    Json(json!({
        "success": true,
        "new_state": new_state,
        "message": format!("System turned {}", new_state),
    }))
    .into_response()
}

/// Manual siren control
pub async fn toggle_siren_handler(
    State(state): State<ApiState>,
    Json(request): Json<SirenToggleRequest>,
) -> Response {
    let desired = match SirenState::from_action(&request.action) {
        Some(desired) => desired,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Action must be ON or OFF." })),
            )
                .into_response()
        }
    };

    let success = state.siren.toggle(desired).await;
    Json(json!({
        "success": success,
        "siren_state": state.siren.state().as_str(),
        "message": format!("Siren turned {}", desired.as_str()),
    }))
    .into_response()
}

pub async fn siren_status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "siren_state": state.siren.state().as_str() }))
}

/// Camera connectivity status
pub async fn camera_status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let connected = state.connected.load(Ordering::Relaxed);
    Json(json!({
        "status": if connected { "streaming" } else { "disconnected" },
        "url": state.stream_url,
        "system_active": state.armed.is_armed(),
    }))
}

/// Continuous MJPEG live feed
pub async fn live_feed_handler(State(state): State<ApiState>) -> impl IntoResponse {
    info!("New live feed client connected");

    let stream = async_stream::stream! {
        let mut frame_interval = interval(state.frame_interval);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            frame_interval.tick().await;

            let Some(frame) = state.latest_frame.get() else {
                debug!("No frame available for live feed yet");
                continue;
            };

            let boundary = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                frame.len(),
            );

            yield Ok::<_, axum::Error>(Bytes::from(boundary));
            yield Ok(Bytes::from(frame.data.to_vec()));
            yield Ok(Bytes::from("\r\n"));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(axum::body::Body::from_stream(stream))
        .unwrap()
}

/// Frontend-compat alert list
pub async fn list_alerts_handler(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Response {
    match state.store.list_events(params.limit).await {
        Ok(events) => {
            let alerts: Vec<_> = events
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "timestamp": e.timestamp.map(|t| t.to_rfc3339()),
                        "type": e.detection_type,
                        "device": e.device_id,
                        "siren": e.siren_activated,
                        "notified": e.notified,
                        "video": e.video_filename,
                    })
                })
                .collect();
            Json(alerts).into_response()
        }
        Err(e) => storage_error_response(e),
    }
}

pub async fn create_event_handler(
    State(state): State<ApiState>,
    Json(event): Json<DetectionEvent>,
) -> Response {
    match state.store.insert_event(&event).await {
        Ok(id) => match state.store.get_event(id).await {
            Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
            Err(e) => storage_error_response(e),
        },
        Err(e) => storage_error_response(e),
    }
}

pub async fn list_events_handler(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Response {
    match state.store.list_events(params.limit).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => storage_error_response(e),
    }
}

pub async fn get_event_handler(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.store.get_event(id).await {
        Ok(event) => Json(event).into_response(),
        Err(e) => storage_error_response(e),
    }
}

pub async fn patch_event_handler(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(patch): Json<DetectionEventPatch>,
) -> Response {
    match state.store.patch_event(id, patch).await {
        Ok(event) => Json(event).into_response(),
        Err(e) => storage_error_response(e),
    }
}

pub async fn delete_event_handler(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_event(id).await {
        Ok(()) => Json(json!({ "status": "deleted", "id": id })).into_response(),
        Err(e) => storage_error_response(e),
    }
}

/// Health endpoint with pipeline observability fields
pub async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let latest_frame = state.latest_frame.get();
    let buffer_stats = state.buffer.stats();

    Json(json!({
        "status": "healthy",
        "armed": state.armed.is_armed(),
        "siren_state": state.siren.state().as_str(),
        "camera_connected": state.connected.load(Ordering::Relaxed),
        "frames_available": latest_frame.is_some(),
        "latest_frame_id": latest_frame.map(|f| f.id),
        "recording_active": state.recorder.is_recording(),
        "buffer_stats": {
            "frames_pushed": buffer_stats.frames_pushed,
            "frames_evicted": buffer_stats.frames_evicted,
            "frames_drained": buffer_stats.frames_drained,
        },
    }))
}

fn storage_error_response(error: StorageError) -> Response {
    match error {
        StorageError::NotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Detection event not found" })),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": other.to_string() })),
        )
            .into_response(),
    }
}
