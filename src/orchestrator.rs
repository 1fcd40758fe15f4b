use crate::arming::ArmedController;
use crate::camera::ConnectionManager;
use crate::detection::{AcceptedDetection, DetectionGate};
use crate::frame::LatestFrame;
use crate::frame_buffer::FrameBuffer;
use crate::notify::PushNotifier;
use crate::recorder::ClipRecorder;
use crate::siren::{SirenController, SirenState};
use crate::storage::{DetectionEvent, EventStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The long-lived control loop tying the pipeline together:
/// read frame -> buffer -> (every Nth frame) detect -> on accepted alert,
/// record + siren + notify + persist.
///
/// Every side-effect step isolates its own failure; nothing thrown by the
/// detector, actuator, notifier or store can terminate the loop.
pub struct AlertOrchestrator {
    connection: ConnectionManager,
    buffer: Arc<FrameBuffer>,
    gate: Arc<DetectionGate>,
    armed: Arc<ArmedController>,
    siren: Arc<SirenController>,
    notifier: Arc<PushNotifier>,
    recorder: Arc<ClipRecorder>,
    store: EventStore,
    latest_frame: Arc<LatestFrame>,
    device_id: String,
    frame_interval: Duration,
    idle_poll: Duration,
    cancel: CancellationToken,
}

pub struct OrchestratorHandles {
    pub connection: ConnectionManager,
    pub buffer: Arc<FrameBuffer>,
    pub gate: Arc<DetectionGate>,
    pub armed: Arc<ArmedController>,
    pub siren: Arc<SirenController>,
    pub notifier: Arc<PushNotifier>,
    pub recorder: Arc<ClipRecorder>,
    pub store: EventStore,
    pub latest_frame: Arc<LatestFrame>,
}

impl AlertOrchestrator {
    pub fn new(
        handles: OrchestratorHandles,
        device_id: String,
        fps: u32,
        idle_poll: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection: handles.connection,
            buffer: handles.buffer,
            gate: handles.gate,
            armed: handles.armed,
            siren: handles.siren,
            notifier: handles.notifier,
            recorder: handles.recorder,
            store: handles.store,
            latest_frame: handles.latest_frame,
            device_id,
            frame_interval: Duration::from_millis(1000 / fps.max(1) as u64),
            idle_poll,
            cancel,
        }
    }

    /// Run until the cancellation token fires
    pub async fn run(mut self) {
        info!(
            "Alert orchestrator started (frame interval {:?})",
            self.frame_interval
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Power-saving policy: no capture or detection while disarmed
            if !self.armed.is_armed() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_poll) => {}
                }
                continue;
            }

            let frame = match self.connection.acquire().await {
                Some(frame) => frame,
                // Reconnect backoff already applied inside acquire
                None => continue,
            };

            self.latest_frame.set(frame.clone());
            self.buffer.push(frame.clone());

            if let Some(alert) = self.gate.evaluate(&frame).await {
                self.handle_alert(alert).await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.frame_interval) => {}
            }
        }

        info!("Alert orchestrator stopped");
    }

    /// Execute the alert side-effect sequence.
    ///
    /// Order matters: the cooldown state was already updated inside the
    /// gate, so concurrent frames cannot double-trigger; recording starts
    /// before the siren so the clip captures the approach; persistence runs
    /// last and its failure never unwinds the physical side effects.
    async fn handle_alert(&self, alert: AcceptedDetection) {
        warn!(
            "ALERT: {} detected (confidence {:.2})",
            alert.label, alert.confidence
        );

        // A. Start clip recording; false means disabled or already running
        let recording_started = self.recorder.start(&alert.label);
        if recording_started {
            info!("Recording started for {} alert", alert.label);
        }
        let video_filename = self.recorder.active_session().map(|s| s.filename);

        // B. Siren on
        let siren_activated = self.siren.toggle(SirenState::On).await;
        if !siren_activated {
            warn!("Siren activation did not complete; continuing alert sequence");
        }

        // C. Push notification
        let notified = self
            .notifier
            .broadcast(
                "Intrusion Alert!",
                &format!(
                    "{} detected on {} - immediate action requested",
                    alert.label, self.device_id
                ),
            )
            .await;

        // D. Persist the event
        let event = DetectionEvent {
            id: None,
            timestamp: Some(Utc::now()),
            detection_type: alert.label.clone(),
            device_id: Some(self.device_id.clone()),
            siren_activated,
            notified,
            video_filename,
            confidence: Some(alert.confidence as f64),
            extra: None,
        };

        match self.store.insert_event(&event).await {
            Ok(id) => info!("Event {} logged: {}", id, alert.label),
            Err(e) => error!("Failed to persist detection event: {}", e),
        }

        // E. Schedule the siren auto-off
        Arc::clone(&self.siren).schedule_auto_off();
    }
}
