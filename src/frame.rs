use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A single captured camera frame.
///
/// Frames are opaque JPEG buffers; the payload is shared via `Arc` so that
/// cloning a frame for the buffer, the recorder and the live feed never
/// copies pixel data. No component mutates frame bytes after capture.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when the frame was captured
    pub timestamp: SystemTime,
    /// Raw JPEG bytes (shared ownership)
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    pub fn new(id: u64, timestamp: SystemTime, data: Vec<u8>) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
        }
    }

    /// Frame payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Check if the frame is older than the specified duration
    pub fn is_older_than(&self, duration: Duration) -> bool {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|age| age > duration)
            .unwrap_or(false)
    }
}

/// Shared slot holding the most recent frame for the live feed.
///
/// The orchestrator writes it once per iteration; any number of stream
/// clients read it independently of the frame buffer, which may be drained
/// by an active recording.
#[derive(Default)]
pub struct LatestFrame {
    slot: parking_lot::RwLock<Option<Frame>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, frame: Frame) {
        *self.slot.write() = Some(frame);
    }

    pub fn get(&self) -> Option<Frame> {
        self.slot.read().clone()
    }
}
