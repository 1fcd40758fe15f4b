mod gate;
mod remote;

pub use gate::{AcceptedDetection, DetectionGate, GateStatsSnapshot};
pub use remote::HttpDetector;

use crate::error::DetectionError;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single raw detection as returned by the external detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub class_id: i64,
}

/// Capability seam for the external object detector.
///
/// Production uses [`HttpDetector`] against a remote inference service;
/// tests inject scripted mocks. The detector is a pure function of its
/// input frame.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}
