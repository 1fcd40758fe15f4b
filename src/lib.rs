pub mod app;
pub mod arming;
pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod frame_buffer;
pub mod notify;
pub mod orchestrator;
pub mod recorder;
pub mod server;
pub mod siren;
pub mod storage;

pub use app::FarmcamApp;
pub use arming::{ArmedController, ArmedState};
pub use camera::{Backend, ConnectionManager, FrameSource, SnapshotSource, StreamConnector};
pub use config::FarmcamConfig;
pub use detection::{AcceptedDetection, Detection, DetectionGate, Detector, HttpDetector};
pub use error::{FarmcamError, Result};
pub use frame::{Frame, LatestFrame};
pub use frame_buffer::{FrameBuffer, FrameBufferStatsSnapshot};
pub use notify::PushNotifier;
pub use orchestrator::AlertOrchestrator;
pub use recorder::{ClipRecorder, RecordingSession};
pub use server::{ApiServer, ApiState};
pub use siren::{SirenActuator, SirenController, SirenState};
pub use storage::{DetectionEvent, DetectionEventPatch, EventStore};
