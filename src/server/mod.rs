mod handlers;

use crate::arming::ArmedController;
use crate::config::ServerConfig;
use crate::error::{Result, StreamError};
use crate::frame::LatestFrame;
use crate::frame_buffer::FrameBuffer;
use crate::recorder::ClipRecorder;
use crate::siren::SirenController;
use crate::storage::EventStore;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use handlers::{
    camera_status_handler, create_event_handler, delete_event_handler, get_event_handler,
    health_handler, list_alerts_handler, list_events_handler, live_feed_handler,
    patch_event_handler, siren_status_handler, system_status_handler, toggle_siren_handler,
    toggle_system_handler,
};

/// Shared state for the axum handlers
#[derive(Clone)]
pub struct ApiState {
    pub(crate) armed: Arc<ArmedController>,
    pub(crate) siren: Arc<SirenController>,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) latest_frame: Arc<LatestFrame>,
    pub(crate) buffer: Arc<FrameBuffer>,
    pub(crate) recorder: Arc<ClipRecorder>,
    pub(crate) store: EventStore,
    pub(crate) stream_url: String,
    pub(crate) frame_interval: Duration,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        armed: Arc<ArmedController>,
        siren: Arc<SirenController>,
        connected: Arc<AtomicBool>,
        latest_frame: Arc<LatestFrame>,
        buffer: Arc<FrameBuffer>,
        recorder: Arc<ClipRecorder>,
        store: EventStore,
        stream_url: String,
        target_fps: u32,
    ) -> Self {
        Self {
            armed,
            siren,
            connected,
            latest_frame,
            buffer,
            recorder,
            store,
            stream_url,
            frame_interval: Duration::from_micros(1_000_000u64 / target_fps.max(1) as u64),
        }
    }
}

/// Build the operator/frontend API router
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/system/status", get(system_status_handler))
        .route("/api/system/toggle", post(toggle_system_handler))
        .route("/api/system/siren/toggle", post(toggle_siren_handler))
        .route("/api/system/siren/status", get(siren_status_handler))
        .route("/camera/status", get(camera_status_handler))
        .route("/camera/live_feed", get(live_feed_handler))
        .route("/alerts", get(list_alerts_handler))
        .route(
            "/events",
            get(list_events_handler).post(create_event_handler),
        )
        .route(
            "/events/:id",
            get(get_event_handler)
                .patch(patch_event_handler)
                .delete(delete_event_handler),
        )
        .route("/health", get(health_handler))
        // The original served a browser frontend from another origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server exposing status, manual controls, the live feed and event CRUD
pub struct ApiServer {
    config: ServerConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    /// Bind and serve until the cancellation token fires
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let app = build_router(self.state);
        let addr = format!("{}:{}", self.config.ip, self.config.port);

        info!("Starting API server on {}", addr);

        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| StreamError::BindFailed {
                    address: addr.clone(),
                    source: e,
                })?;

        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| StreamError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        Ok(())
    }
}
