use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::source::{Backend, FrameSource, HttpConnector, HttpSnapshot, SnapshotSource, StreamConnector};

/// Owns the single live camera handle and its reconnection policy.
///
/// `acquire` never fails loudly: every failure path degrades to `None` plus
/// an updated `connected` flag for the status surface. After
/// `max_consecutive_failures` failed stream reads the handle is dropped so
/// the next acquisition performs a full reconnect across the candidate URL
/// list instead of retrying a broken handle indefinitely.
pub struct ConnectionManager {
    connector: Box<dyn StreamConnector>,
    snapshot: Option<Box<dyn SnapshotSource>>,
    stream_urls: Vec<String>,
    stream: Option<ActiveStream>,
    connected: Arc<AtomicBool>,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    retry_delay: Duration,
    reconnect_delay: Duration,
    last_release: Option<Instant>,
    frame_counter: u64,
}

struct ActiveStream {
    source: Box<dyn FrameSource>,
    url: String,
    backend: Backend,
}

impl ConnectionManager {
    pub fn new(
        config: &CameraConfig,
        connector: Box<dyn StreamConnector>,
        snapshot: Option<Box<dyn SnapshotSource>>,
    ) -> Self {
        Self {
            connector,
            snapshot,
            stream_urls: config.stream_urls.clone(),
            stream: None,
            connected: Arc::new(AtomicBool::new(false)),
            consecutive_failures: 0,
            max_consecutive_failures: config.max_consecutive_failures,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            last_release: None,
            frame_counter: 0,
        }
    }

    /// Build a manager with the production HTTP connector and snapshot client
    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        let connector = HttpConnector::new(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
        )?;

        let snapshot = match &config.snapshot_url {
            Some(url) => Some(Box::new(HttpSnapshot::new(
                url.clone(),
                Duration::from_secs(3),
            )?) as Box<dyn SnapshotSource>),
            None => None,
        };

        Ok(Self::new(config, Box::new(connector), snapshot))
    }

    /// Shared connectivity flag, readable by the status surface
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Attempt to acquire one frame.
    ///
    /// Returns `None` when no frame could be obtained this cycle; the
    /// appropriate retry delay has already been applied internally.
    pub async fn acquire(&mut self) -> Option<Frame> {
        if self.stream.is_none() {
            // Longer pause after a forced release before reconnecting
            if let Some(released) = self.last_release {
                let since = released.elapsed();
                if since < self.reconnect_delay {
                    tokio::time::sleep(self.reconnect_delay - since).await;
                }
                self.last_release = None;
            }

            if !self.try_connect().await {
                self.connected.store(false, Ordering::Relaxed);
                if let Some(frame) = self.try_snapshot().await {
                    return Some(frame);
                }
                tokio::time::sleep(self.retry_delay).await;
                return None;
            }
        }

        let read = match self.stream.as_mut() {
            Some(active) => active.source.read_frame().await,
            None => Err(CameraError::StreamClosed),
        };

        match read {
            Ok(data) => {
                self.consecutive_failures = 0;
                self.connected.store(true, Ordering::Relaxed);
                Some(self.stamp(data))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.connected.store(false, Ordering::Relaxed);
                warn!(
                    "Stream read failed ({} consecutive): {}",
                    self.consecutive_failures, e
                );

                if self.consecutive_failures >= self.max_consecutive_failures {
                    self.release_stream();
                }

                // Snapshot fallback keeps the pipeline fed; it does not
                // reset the stream failure count.
                if let Some(frame) = self.try_snapshot().await {
                    return Some(frame);
                }

                tokio::time::sleep(self.retry_delay).await;
                None
            }
        }
    }

    /// Drop the live handle so the next acquire performs a full reconnect
    fn release_stream(&mut self) {
        if let Some(active) = self.stream.take() {
            warn!(
                "Releasing stream handle to {} after {} consecutive failures",
                active.url, self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.last_release = Some(Instant::now());
    }

    /// Try each candidate URL with each backend until one connects
    async fn try_connect(&mut self) -> bool {
        for url in self.stream_urls.clone() {
            for backend in Backend::ALL {
                match self.connector.connect(&url, backend).await {
                    Ok(source) => {
                        info!("Connected to camera stream at {} ({})", url, backend.name());
                        self.stream = Some(ActiveStream {
                            source,
                            url,
                            backend,
                        });
                        self.connected.store(true, Ordering::Relaxed);
                        return true;
                    }
                    Err(e) => {
                        debug!("Connect to {} via {} failed: {}", url, backend.name(), e);
                    }
                }
            }
        }

        warn!(
            "Failed to connect to any of {} camera stream URL(s)",
            self.stream_urls.len()
        );
        false
    }

    async fn try_snapshot(&mut self) -> Option<Frame> {
        let snapshot = self.snapshot.as_ref()?;
        match snapshot.snapshot().await {
            Ok(data) => {
                debug!("Using snapshot fallback frame ({} bytes)", data.len());
                Some(self.stamp(data))
            }
            Err(e) => {
                debug!("Snapshot fallback failed: {}", e);
                None
            }
        }
    }

    fn stamp(&mut self, data: Vec<u8>) -> Frame {
        let id = self.frame_counter;
        self.frame_counter += 1;
        Frame::new(id, SystemTime::now(), data)
    }

    /// Backend of the currently active stream, if any
    pub fn active_backend(&self) -> Option<Backend> {
        self.stream.as_ref().map(|s| s.backend)
    }
}
