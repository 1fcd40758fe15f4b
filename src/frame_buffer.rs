use crate::frame::Frame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace};

/// Bounded frame buffer providing pre-event context for clip recording.
///
/// While no recording is active the buffer behaves as a ring of the most
/// recent `capacity` frames (capacity = fps x pre-event seconds), evicting
/// the oldest frame on overflow. When a recording starts the recorder drains
/// the pending content in one step and switches the buffer into retain mode,
/// after which live frames queue up for `pop_next` instead of being evicted.
pub struct FrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    retain: AtomicBool,
    stats: FrameBufferStats,
}

/// Counters for buffer monitoring
#[derive(Debug)]
pub struct FrameBufferStats {
    pub frames_pushed: AtomicU64,
    pub frames_evicted: AtomicU64,
    pub frames_drained: AtomicU64,
}

/// Snapshot of buffer statistics
#[derive(Debug, Clone)]
pub struct FrameBufferStatsSnapshot {
    pub frames_pushed: u64,
    pub frames_evicted: u64,
    pub frames_drained: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer holding at most `capacity` frames while idle
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Frame buffer capacity must be greater than 0");

        debug!("Created frame buffer with capacity {}", capacity);

        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            retain: AtomicBool::new(false),
            stats: FrameBufferStats {
                frames_pushed: AtomicU64::new(0),
                frames_evicted: AtomicU64::new(0),
                frames_drained: AtomicU64::new(0),
            },
        }
    }

    /// Push a frame, evicting the oldest one on overflow unless retaining
    pub fn push(&self, frame: Frame) {
        let mut frames = self.frames.lock();
        frames.push_back(frame);

        if !self.retain.load(Ordering::Acquire) && frames.len() > self.capacity {
            frames.pop_front();
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            trace!("Evicted oldest frame (buffer at capacity {})", self.capacity);
        }

        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically transfer out and clear all pending frames (oldest first)
    pub fn drain(&self) -> Vec<Frame> {
        let mut frames = self.frames.lock();
        let drained: Vec<Frame> = frames.drain(..).collect();
        self.stats
            .frames_drained
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        debug!("Drained {} frames from buffer", drained.len());
        drained
    }

    /// Pop the oldest pending frame, if any
    pub fn pop_next(&self) -> Option<Frame> {
        self.frames.lock().pop_front()
    }

    /// Number of pending frames
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Switch retain mode: while retaining, overflow eviction is suspended
    /// so that an active recording consumes every frame exactly once.
    pub fn set_retain(&self, retain: bool) {
        self.retain.store(retain, Ordering::Release);
        debug!("Frame buffer retain mode: {}", retain);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FrameBufferStatsSnapshot {
        FrameBufferStatsSnapshot {
            frames_pushed: self.stats.frames_pushed.load(Ordering::Relaxed),
            frames_evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
            frames_drained: self.stats.frames_drained.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn test_frame(id: u64) -> Frame {
        Frame::new(id, SystemTime::now(), vec![0u8; 64])
    }

    #[test]
    fn test_push_and_len() {
        let buffer = FrameBuffer::new(5);
        assert!(buffer.is_empty());

        buffer.push(test_frame(1));
        buffer.push(test_frame(2));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let buffer = FrameBuffer::new(3);

        for i in 1..=5 {
            buffer.push(test_frame(i));
        }

        assert_eq!(buffer.len(), 3);
        // Oldest surviving frame should be id 3
        assert_eq!(buffer.pop_next().unwrap().id, 3);

        let stats = buffer.stats();
        assert_eq!(stats.frames_pushed, 5);
        assert_eq!(stats.frames_evicted, 2);
    }

    #[test]
    fn test_drain_transfers_and_clears() {
        let buffer = FrameBuffer::new(10);

        for i in 1..=4 {
            buffer.push(test_frame(i));
        }

        let drained = buffer.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[0].id, 1);
        assert_eq!(drained[3].id, 4);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_retain_suspends_eviction() {
        let buffer = FrameBuffer::new(2);
        buffer.set_retain(true);

        for i in 1..=6 {
            buffer.push(test_frame(i));
        }

        // Nothing evicted while retaining
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.stats().frames_evicted, 0);

        // Frames come out oldest first
        assert_eq!(buffer.pop_next().unwrap().id, 1);
        assert_eq!(buffer.pop_next().unwrap().id, 2);

        buffer.set_retain(false);
        for i in 7..=10 {
            buffer.push(test_frame(i));
        }
        // Eviction resumes once retain mode is off
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_pop_next_on_empty() {
        let buffer = FrameBuffer::new(2);
        assert!(buffer.pop_next().is_none());
    }
}
