use crate::config::RecordingConfig;
use crate::error::RecordingError;
use crate::frame::Frame;
use crate::frame_buffer::FrameBuffer;
use chrono::Local;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Metadata of the clip currently being recorded
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub id: Uuid,
    pub label: String,
    pub filename: String,
    pub started_at: SystemTime,
}

/// Records alert clips from buffered pre-event frames plus live frames.
///
/// At most one session may be active at a time: `start` claims the active
/// flag by compare-exchange and returns `false` when a recording is already
/// running (or when recording is disabled). The clip artifact is a raw
/// MJPEG file (concatenated JPEG frames); video encoding proper is outside
/// this system.
pub struct ClipRecorder {
    config: RecordingConfig,
    frame_interval: Duration,
    buffer: Arc<FrameBuffer>,
    active: Arc<AtomicBool>,
    session: Arc<Mutex<Option<RecordingSession>>>,
    cancel: CancellationToken,
}

impl ClipRecorder {
    pub fn new(
        config: RecordingConfig,
        fps: u32,
        buffer: Arc<FrameBuffer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            frame_interval: Duration::from_millis(1000 / fps.max(1) as u64),
            buffer,
            active: Arc::new(AtomicBool::new(false)),
            session: Arc::new(Mutex::new(None)),
            cancel,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn active_session(&self) -> Option<RecordingSession> {
        self.session.lock().clone()
    }

    /// Start a clip for the given detection label.
    ///
    /// Returns `false` when recording is disabled, a session is already
    /// active, or no pre-event frames are available.
    pub fn start(&self, label: &str) -> bool {
        if !self.config.enabled {
            debug!("Clip recording disabled; ignoring start for {}", label);
            return false;
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Recording already active; start for {} ignored", label);
            return false;
        }

        self.buffer.set_retain(true);
        let preroll = self.buffer.drain();

        if preroll.is_empty() {
            warn!("No frames available; not starting a clip for {}", label);
            self.buffer.set_retain(false);
            self.active.store(false, Ordering::SeqCst);
            return false;
        }

        let filename = format!(
            "{}_{}.mjpeg",
            Local::now().format("%Y%m%d_%H%M%S"),
            label
        );

        let session = RecordingSession {
            id: Uuid::new_v4(),
            label: label.to_string(),
            filename: filename.clone(),
            started_at: SystemTime::now(),
        };
        *self.session.lock() = Some(session);

        info!(
            "Starting {}s clip {} ({} pre-event frames)",
            self.config.clip_seconds,
            filename,
            preroll.len()
        );

        let buffer = Arc::clone(&self.buffer);
        let active = Arc::clone(&self.active);
        let session_slot = Arc::clone(&self.session);
        let cancel = self.cancel.clone();
        let dir = PathBuf::from(&self.config.path);
        let clip_duration = Duration::from_secs(self.config.clip_seconds);
        let frame_interval = self.frame_interval;

        tokio::spawn(async move {
            let result = write_clip(
                preroll,
                &buffer,
                dir,
                &filename,
                clip_duration,
                frame_interval,
                cancel,
            )
            .await;

            if let Err(e) = result {
                error!("Clip {} failed: {}", filename, e);
            }

            buffer.set_retain(false);
            *session_slot.lock() = None;
            active.store(false, Ordering::SeqCst);
        });

        true
    }
}

/// Write pre-event frames, then consume live frames until the clip duration
/// elapses, waiting one frame interval whenever no frame is pending.
async fn write_clip(
    preroll: Vec<Frame>,
    buffer: &FrameBuffer,
    dir: PathBuf,
    filename: &str,
    clip_duration: Duration,
    frame_interval: Duration,
    cancel: CancellationToken,
) -> Result<(), RecordingError> {
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| RecordingError::DirectoryCreation {
            path: dir.display().to_string(),
            source: e,
        })?;

    let path = dir.join(filename);
    let file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| RecordingError::ClipWrite {
            path: path.display().to_string(),
            source: e,
        })?;
    let mut writer = BufWriter::new(file);

    let mut frames_written = 0usize;

    for frame in &preroll {
        writer
            .write_all(&frame.data)
            .await
            .map_err(|e| RecordingError::ClipWrite {
                path: path.display().to_string(),
                source: e,
            })?;
        frames_written += 1;
    }

    let started = tokio::time::Instant::now();

    while started.elapsed() < clip_duration {
        if cancel.is_cancelled() {
            warn!("Recording cancelled; finalizing clip {} early", filename);
            break;
        }

        match buffer.pop_next() {
            Some(frame) => {
                writer
                    .write_all(&frame.data)
                    .await
                    .map_err(|e| RecordingError::ClipWrite {
                        path: path.display().to_string(),
                        source: e,
                    })?;
                frames_written += 1;
            }
            None => tokio::time::sleep(frame_interval).await,
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| RecordingError::ClipWrite {
            path: path.display().to_string(),
            source: e,
        })?;

    info!(
        "Finished clip {} ({} frames, {} pre-event)",
        path.display(),
        frames_written,
        preroll.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_frame(id: u64, payload: &[u8]) -> Frame {
        Frame::new(id, SystemTime::now(), payload.to_vec())
    }

    fn recorder_with(
        dir: &std::path::Path,
        enabled: bool,
        clip_seconds: u64,
        buffer: Arc<FrameBuffer>,
    ) -> ClipRecorder {
        let config = RecordingConfig {
            enabled,
            path: dir.display().to_string(),
            clip_seconds,
            pre_event_seconds: 5,
        };
        ClipRecorder::new(config, 10, buffer, CancellationToken::new())
    }

    async fn wait_until_idle(recorder: &ClipRecorder) {
        for _ in 0..1000 {
            if !recorder.is_recording() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("recorder did not finish");
    }

    fn clip_files(dir: &std::path::Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_start_disabled_returns_false() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(FrameBuffer::new(10));
        buffer.push(test_frame(1, b"frame"));

        let recorder = recorder_with(dir.path(), false, 1, buffer);
        assert!(!recorder.start("person"));
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_empty_buffer_aborts_without_artifact() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(FrameBuffer::new(10));

        let recorder = recorder_with(dir.path(), true, 1, Arc::clone(&buffer));
        assert!(!recorder.start("person"));

        // Flag released so a later start can succeed
        assert!(!recorder.is_recording());
        // Retain mode was rolled back
        buffer.push(test_frame(1, b"a"));
        assert!(clip_files(dir.path()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_while_active() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(FrameBuffer::new(10));
        buffer.push(test_frame(1, b"frame-1"));

        let recorder = recorder_with(dir.path(), true, 2, buffer);

        assert!(recorder.start("person"));
        assert!(recorder.is_recording());
        assert!(!recorder.start("person"));

        wait_until_idle(&recorder).await;

        // Exactly one clip artifact was produced
        assert_eq!(clip_files(dir.path()).len(), 1);

        // After completion a new session may start
        recorder.buffer.push(test_frame(2, b"frame-2"));
        assert!(recorder.start("cow"));
        wait_until_idle(&recorder).await;
        assert_eq!(clip_files(dir.path()).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clip_contains_preroll_and_live_frames() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(FrameBuffer::new(10));
        buffer.push(test_frame(1, b"AAA"));
        buffer.push(test_frame(2, b"BBB"));

        let recorder = recorder_with(dir.path(), true, 1, Arc::clone(&buffer));
        assert!(recorder.start("person"));

        let session = recorder.active_session().expect("session info");
        assert_eq!(session.label, "person");
        assert!(session.filename.ends_with("_person.mjpeg"));

        // Live frames pushed while recording are consumed by the clip
        buffer.push(test_frame(3, b"CCC"));

        wait_until_idle(&recorder).await;
        assert!(recorder.active_session().is_none());

        let files = clip_files(dir.path());
        assert_eq!(files.len(), 1);
        let contents = std::fs::read(&files[0]).unwrap();
        assert_eq!(contents, b"AAABBBCCC".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_finalizes_early() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(FrameBuffer::new(10));
        buffer.push(test_frame(1, b"AAA"));

        let cancel = CancellationToken::new();
        let config = RecordingConfig {
            enabled: true,
            path: dir.path().display().to_string(),
            clip_seconds: 3600,
            pre_event_seconds: 5,
        };
        let recorder = ClipRecorder::new(config, 10, Arc::clone(&buffer), cancel.clone());

        assert!(recorder.start("person"));
        cancel.cancel();
        wait_until_idle(&recorder).await;

        // The artifact exists with the pre-event content
        let files = clip_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"AAA".to_vec());
    }
}
