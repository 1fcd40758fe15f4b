use super::{Detection, Detector};
use crate::config::DetectionConfig;
use crate::error::DetectionError;
use crate::frame::Frame;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Client for a remote inference service.
///
/// Sends the JPEG frame as a multipart upload and expects a JSON array of
/// `{label, confidence, class_id}` objects back.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Request {
                details: format!("failed to build HTTP client: {}", e),
            })?;

        info!("Detector endpoint: {}", url);

        Ok(Self { client, url })
    }

    /// Build a detector from configuration; `None` when no endpoint is set,
    /// in which case detection stays disabled for the process lifetime.
    pub fn from_config(config: &DetectionConfig) -> Result<Option<Self>, DetectionError> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let part = Part::bytes(frame.data.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| DetectionError::Request {
                details: e.to_string(),
            })?;

        let form = Form::new().part("frame", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DetectionError::Request {
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DetectionError::Request {
                details: format!("detector returned status {}", response.status()),
            });
        }

        let detections: Vec<Detection> =
            response
                .json()
                .await
                .map_err(|e| DetectionError::MalformedResponse {
                    details: e.to_string(),
                })?;

        if !detections.is_empty() {
            debug!("Detector found {} object(s) in frame {}", detections.len(), frame.id);
        } else {
            trace!("No objects in frame {}", frame.id);
        }

        Ok(detections)
    }
}
