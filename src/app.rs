use crate::arming::ArmedController;
use crate::camera::ConnectionManager;
use crate::config::FarmcamConfig;
use crate::detection::{DetectionGate, Detector, HttpDetector};
use crate::error::Result;
use crate::frame::LatestFrame;
use crate::frame_buffer::FrameBuffer;
use crate::notify::PushNotifier;
use crate::orchestrator::{AlertOrchestrator, OrchestratorHandles};
use crate::recorder::ClipRecorder;
use crate::server::{ApiServer, ApiState};
use crate::siren::SirenController;
use crate::storage::EventStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Wires the pipeline together and owns the process lifecycle:
/// orchestrator loop, API server, signal handling, ordered shutdown.
pub struct FarmcamApp {
    orchestrator: AlertOrchestrator,
    server: ApiServer,
    armed: Arc<ArmedController>,
    siren: Arc<SirenController>,
    cancel: CancellationToken,
}

impl FarmcamApp {
    pub fn new(config: FarmcamConfig) -> Result<Self> {
        let cancel = CancellationToken::new();

        let store = EventStore::new(&config.database.path)?;

        let siren = Arc::new(SirenController::from_config(&config.siren)?);
        let armed = Arc::new(ArmedController::new(
            Arc::clone(&siren),
            Duration::from_secs(config.arming.auto_rearm_minutes * 60),
        ));
        let notifier = Arc::new(PushNotifier::from_config(&config.notifier));

        let buffer_capacity =
            (config.camera.fps as usize) * (config.recording.pre_event_seconds as usize);
        let buffer = Arc::new(FrameBuffer::new(buffer_capacity.max(1)));

        let detector = HttpDetector::from_config(&config.detection)?
            .map(|d| Arc::new(d) as Arc<dyn Detector>);
        let gate = Arc::new(DetectionGate::new(&config.detection, detector));

        let recorder = Arc::new(ClipRecorder::new(
            config.recording.clone(),
            config.camera.fps,
            Arc::clone(&buffer),
            cancel.child_token(),
        ));

        let connection = ConnectionManager::from_config(&config.camera)?;
        let connected = connection.connected_flag();

        let latest_frame = Arc::new(LatestFrame::new());

        let state = ApiState::new(
            Arc::clone(&armed),
            Arc::clone(&siren),
            connected,
            Arc::clone(&latest_frame),
            Arc::clone(&buffer),
            Arc::clone(&recorder),
            store.clone(),
            config
                .camera
                .stream_urls
                .first()
                .cloned()
                .unwrap_or_default(),
            config.camera.fps,
        );
        let server = ApiServer::new(config.server.clone(), state);

        let orchestrator = AlertOrchestrator::new(
            OrchestratorHandles {
                connection,
                buffer,
                gate,
                armed: Arc::clone(&armed),
                siren: Arc::clone(&siren),
                notifier,
                recorder,
                store,
                latest_frame,
            },
            config.system.device_id.clone(),
            config.camera.fps,
            Duration::from_millis(config.arming.idle_poll_ms),
            cancel.child_token(),
        );

        Ok(Self {
            orchestrator,
            server,
            armed,
            siren,
            cancel,
        })
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let FarmcamApp {
            orchestrator,
            server,
            armed,
            siren,
            cancel,
        } = self;

        let orchestrator_task = tokio::spawn(orchestrator.run());

        let server_cancel = cancel.child_token();
        let server_task = tokio::spawn(async move {
            if let Err(e) = server.serve(server_cancel).await {
                error!("API server terminated: {}", e);
            }
        });

        wait_for_shutdown_signal().await;
        info!("Shutdown signal received; stopping components");

        // Stop the loop and any active recording, then drain the one-shot
        // timers so nothing fires into a torn-down system.
        cancel.cancel();
        armed.shutdown();
        siren.shutdown();

        if tokio::time::timeout(Duration::from_secs(10), orchestrator_task)
            .await
            .is_err()
        {
            warn!("Orchestrator did not stop within timeout");
        }

        if tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .is_err()
        {
            warn!("API server did not stop within timeout");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}
