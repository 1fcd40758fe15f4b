use crate::siren::{SirenController, SirenState};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArmedState {
    Armed,
    Disarmed,
}

impl ArmedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmedState::Armed => "ON",
            ArmedState::Disarmed => "OFF",
        }
    }
}

struct ArmedInner {
    state: Mutex<StateSlot>,
    siren: Arc<SirenController>,
    rearm_delay: Duration,
}

struct StateSlot {
    armed: bool,
    rearm_task: Option<JoinHandle<()>>,
}

impl ArmedInner {
    /// Shared arming path for the manual toggle and the auto-rearm timer.
    /// Any pending reactivation task is cancelled so a stale timer can never
    /// fire after a manual re-arm.
    fn complete_arm(&self, trigger: &str) {
        let mut slot = self.state.lock();
        if let Some(task) = slot.rearm_task.take() {
            task.abort();
            debug!("Cancelled pending auto-rearm timer");
        }
        if slot.armed {
            debug!("System already armed ({})", trigger);
            return;
        }
        slot.armed = true;
        info!("System armed ({})", trigger);
    }
}

/// Armed/disarmed state machine with automatic reactivation.
///
/// Disarming forces the siren off and schedules a one-shot timer that
/// re-arms the system after the configured delay; a manual re-arm cancels
/// the timer. While disarmed the orchestrator performs no capture,
/// detection, actuation or notification.
pub struct ArmedController {
    inner: Arc<ArmedInner>,
}

impl ArmedController {
    pub fn new(siren: Arc<SirenController>, rearm_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ArmedInner {
                state: Mutex::new(StateSlot {
                    armed: true,
                    rearm_task: None,
                }),
                siren,
                rearm_delay,
            }),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed
    }

    pub fn state(&self) -> ArmedState {
        if self.is_armed() {
            ArmedState::Armed
        } else {
            ArmedState::Disarmed
        }
    }

    /// Manually arm the system, cancelling any pending auto-rearm
    pub fn arm(&self) {
        self.inner.complete_arm("manual");
    }

    /// Disarm the system: siren off, auto-rearm scheduled
    pub async fn disarm(&self) {
        {
            let mut slot = self.inner.state.lock();
            if let Some(task) = slot.rearm_task.take() {
                task.abort();
            }
            slot.armed = false;
        }

        info!(
            "System disarmed for {} minutes",
            self.inner.rearm_delay.as_secs() / 60
        );

        if !self.inner.siren.toggle(SirenState::Off).await {
            warn!("Forcing siren off on disarm did not complete cleanly");
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.rearm_delay).await;
            inner.complete_arm("auto-reactivation");
        });

        // Register the timer unless someone re-armed in the meantime
        let mut slot = self.inner.state.lock();
        if slot.armed {
            task.abort();
        } else {
            slot.rearm_task = Some(task);
        }
    }

    /// Abort any pending auto-rearm timer (shutdown path)
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.state.lock().rearm_task.take() {
            task.abort();
            debug!("Aborted pending auto-rearm timer");
        }
    }
}
