use crate::config::SirenConfig;
use crate::error::SirenError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SirenState {
    On,
    Off,
}

impl SirenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SirenState::On => "ON",
            SirenState::Off => "OFF",
        }
    }

    /// Parse an "ON"/"OFF" action string (case-insensitive)
    pub fn from_action(action: &str) -> Option<Self> {
        match action.to_uppercase().as_str() {
            "ON" => Some(SirenState::On),
            "OFF" => Some(SirenState::Off),
            _ => None,
        }
    }
}

/// Capability seam for the physical siren device
#[async_trait]
pub trait SirenActuator: Send + Sync {
    async fn set_state(&self, state: SirenState) -> Result<(), SirenError>;
}

/// Fire-and-forget HTTP actuator for a remote siren relay
pub struct HttpSirenActuator {
    client: reqwest::Client,
    url: String,
}

impl HttpSirenActuator {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SirenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SirenError::Actuator {
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl SirenActuator for HttpSirenActuator {
    async fn set_state(&self, state: SirenState) -> Result<(), SirenError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "state": state.as_str() }))
            .send()
            .await
            .map_err(|e| SirenError::Actuator {
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SirenError::DeviceStatus {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

/// Local-only actuator used when no siren device is configured
pub struct NoopActuator;

#[async_trait]
impl SirenActuator for NoopActuator {
    async fn set_state(&self, state: SirenState) -> Result<(), SirenError> {
        info!("Siren {} (no actuator device configured)", state.as_str());
        Ok(())
    }
}

/// Serializes siren state changes and schedules the post-alert auto-off.
///
/// The in-flight guard is the concurrency primitive: a toggle attempt that
/// finds another toggle in flight returns `false` immediately instead of
/// queueing. Local state is optimistic: it reflects the last attempted
/// state even when the device call failed, and the boolean return tells the
/// caller whether the actuator confirmed.
pub struct SirenController {
    actuator: Arc<dyn SirenActuator>,
    state: Mutex<SirenState>,
    in_flight: AtomicBool,
    auto_off_delay: Duration,
    auto_off_task: Mutex<Option<JoinHandle<()>>>,
}

impl SirenController {
    pub fn new(actuator: Arc<dyn SirenActuator>, auto_off_delay: Duration) -> Self {
        Self {
            actuator,
            state: Mutex::new(SirenState::Off),
            in_flight: AtomicBool::new(false),
            auto_off_delay,
            auto_off_task: Mutex::new(None),
        }
    }

    /// Build a controller from configuration, choosing the HTTP actuator
    /// when a device URL is set and the local-only actuator otherwise.
    pub fn from_config(config: &SirenConfig) -> Result<Self, SirenError> {
        let actuator: Arc<dyn SirenActuator> = match &config.url {
            Some(url) => Arc::new(HttpSirenActuator::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?),
            None => {
                warn!("No siren device URL configured; siren state is local-only");
                Arc::new(NoopActuator)
            }
        };

        Ok(Self::new(
            actuator,
            Duration::from_secs(config.auto_off_seconds),
        ))
    }

    pub fn state(&self) -> SirenState {
        *self.state.lock()
    }

    /// Attempt to switch the siren.
    ///
    /// Returns `false` either when another toggle is already in flight
    /// (state unchanged, try again later) or when the device call failed
    /// (local state reflects the attempt regardless).
    pub async fn toggle(&self, desired: SirenState) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "Siren toggle to {} rejected: another toggle is in flight",
                desired.as_str()
            );
            return false;
        }

        let result = self.actuator.set_state(desired).await;

        *self.state.lock() = desired;
        self.in_flight.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                info!("Siren {}", desired.as_str());
                true
            }
            Err(e) => {
                error!(
                    "Siren actuator call failed (local state set to {}): {}",
                    desired.as_str(),
                    e
                );
                false
            }
        }
    }

    /// Schedule the one-shot auto-off, replacing any pending one so the
    /// siren stays on for the full window after the latest alert.
    pub fn schedule_auto_off(self: Arc<Self>) {
        let mut task = self.auto_off_task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
            debug!("Replaced pending siren auto-off timer");
        }

        let controller = Arc::clone(&self);
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(controller.auto_off_delay).await;
            info!(
                "Siren auto-off after {}s",
                controller.auto_off_delay.as_secs()
            );
            if !controller.toggle(SirenState::Off).await {
                warn!("Siren auto-off toggle did not complete cleanly");
            }
        }));
    }

    /// Abort any pending auto-off timer (shutdown path)
    pub fn shutdown(&self) {
        if let Some(task) = self.auto_off_task.lock().take() {
            task.abort();
            debug!("Aborted pending siren auto-off timer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    /// Actuator recording every requested state
    struct RecordingActuator {
        calls: Mutex<Vec<SirenState>>,
        fail: AtomicBool,
    }

    impl RecordingActuator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SirenActuator for RecordingActuator {
        async fn set_state(&self, state: SirenState) -> Result<(), SirenError> {
            self.calls.lock().push(state);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SirenError::Actuator {
                    details: "scripted failure".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Actuator that blocks until released, for exercising the in-flight guard
    struct BlockingActuator {
        release: Notify,
        entered: Notify,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SirenActuator for BlockingActuator {
        async fn set_state(&self, _state: SirenState) -> Result<(), SirenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_toggle_updates_state() {
        let actuator = RecordingActuator::new();
        let controller = SirenController::new(actuator.clone(), Duration::from_secs(60));

        assert_eq!(controller.state(), SirenState::Off);
        assert!(controller.toggle(SirenState::On).await);
        assert_eq!(controller.state(), SirenState::On);
        assert!(controller.toggle(SirenState::Off).await);
        assert_eq!(controller.state(), SirenState::Off);

        assert_eq!(
            *actuator.calls.lock(),
            vec![SirenState::On, SirenState::Off]
        );
    }

    #[tokio::test]
    async fn test_actuator_failure_reports_false_but_tracks_attempt() {
        let actuator = RecordingActuator::new();
        actuator.fail.store(true, Ordering::SeqCst);
        let controller = SirenController::new(actuator, Duration::from_secs(60));

        assert!(!controller.toggle(SirenState::On).await);
        // Local state is optimistic
        assert_eq!(controller.state(), SirenState::On);
    }

    #[tokio::test]
    async fn test_concurrent_toggle_rejected() {
        let actuator = Arc::new(BlockingActuator {
            release: Notify::new(),
            entered: Notify::new(),
            calls: AtomicU32::new(0),
        });
        let controller = Arc::new(SirenController::new(
            actuator.clone(),
            Duration::from_secs(60),
        ));

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.toggle(SirenState::On).await })
        };

        // Wait until the first toggle is inside the actuator call
        actuator.entered.notified().await;

        // Second toggle must fail fast without touching the actuator
        assert!(!controller.toggle(SirenState::Off).await);
        assert_eq!(actuator.calls.load(Ordering::SeqCst), 1);

        actuator.release.notify_one();
        assert!(first.await.unwrap());

        // Final state is the one requested by the accepted toggle
        assert_eq!(controller.state(), SirenState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_off_fires_after_delay() {
        let actuator = RecordingActuator::new();
        let controller = Arc::new(SirenController::new(actuator, Duration::from_secs(60)));

        assert!(controller.toggle(SirenState::On).await);
        Arc::clone(&controller).schedule_auto_off();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(controller.state(), SirenState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_alert_replaces_pending_auto_off() {
        let actuator = RecordingActuator::new();
        let controller = Arc::new(SirenController::new(actuator, Duration::from_secs(60)));

        assert!(controller.toggle(SirenState::On).await);
        Arc::clone(&controller).schedule_auto_off();

        // A second alert 30s later reschedules the timer
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(controller.toggle(SirenState::On).await);
        Arc::clone(&controller).schedule_auto_off();

        // 65s after the first alert the original timer would have fired
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(controller.state(), SirenState::On);

        // 60s after the second alert it switches off
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.state(), SirenState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending_auto_off() {
        let actuator = RecordingActuator::new();
        let controller = Arc::new(SirenController::new(actuator, Duration::from_secs(60)));

        assert!(controller.toggle(SirenState::On).await);
        Arc::clone(&controller).schedule_auto_off();
        controller.shutdown();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(controller.state(), SirenState::On);
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!(SirenState::from_action("on"), Some(SirenState::On));
        assert_eq!(SirenState::from_action("OFF"), Some(SirenState::Off));
        assert_eq!(SirenState::from_action("blare"), None);
    }
}
