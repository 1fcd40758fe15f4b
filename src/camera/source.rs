use crate::error::CameraError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound on buffered stream bytes while hunting for a complete JPEG.
/// A camera that never produces frame markers would otherwise grow the
/// buffer without bound.
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Connection strategies tried per candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Persistent MJPEG pull: one long-lived HTTP response, frames extracted
    /// from the byte stream
    Multipart,
    /// One GET per frame, for cameras that only serve stills
    Poll,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Multipart, Backend::Poll];

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Multipart => "multipart",
            Backend::Poll => "poll",
        }
    }
}

/// A live handle onto a camera feed yielding JPEG frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Read the next JPEG frame, bounded by the source's read timeout.
    async fn read_frame(&mut self) -> Result<Vec<u8>, CameraError>;
}

/// Opens frame sources; the seam that lets tests inject failing streams.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        backend: Backend,
    ) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Single-shot frame retrieval used when the stream is unavailable.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<u8>, CameraError>;
}

/// reqwest-backed connector for HTTP cameras
pub struct HttpConnector {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CameraError::Connect {
                url: String::new(),
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            read_timeout,
        })
    }
}

#[async_trait]
impl StreamConnector for HttpConnector {
    async fn connect(
        &self,
        url: &str,
        backend: Backend,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        debug!("Connecting to {} via {} backend", url, backend.name());

        match backend {
            Backend::Multipart => {
                let response =
                    self.client
                        .get(url)
                        .send()
                        .await
                        .map_err(|e| CameraError::Connect {
                            url: url.to_string(),
                            details: e.to_string(),
                        })?;

                if !response.status().is_success() {
                    return Err(CameraError::Connect {
                        url: url.to_string(),
                        details: format!("HTTP status {}", response.status()),
                    });
                }

                Ok(Box::new(MjpegStream {
                    chunks: Box::pin(response.bytes_stream()),
                    pending: Vec::new(),
                    read_timeout: self.read_timeout,
                }))
            }
            Backend::Poll => Ok(Box::new(PollSource {
                client: self.client.clone(),
                url: url.to_string(),
                read_timeout: self.read_timeout,
            })),
        }
    }
}

/// Frame source over a persistent MJPEG response.
///
/// Frames are located by scanning for JPEG SOI/EOI markers rather than
/// parsing multipart headers; ESP32-class cameras are loose about boundary
/// formatting and the marker scan handles both proper multipart and raw
/// concatenated JPEG streams.
struct MjpegStream {
    chunks: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Sync>>,
    pending: Vec<u8>,
    read_timeout: Duration,
}

#[async_trait]
impl FrameSource for MjpegStream {
    async fn read_frame(&mut self) -> Result<Vec<u8>, CameraError> {
        loop {
            if let Some(jpeg) = extract_jpeg(&mut self.pending) {
                trace!("Extracted {}-byte JPEG from stream", jpeg.len());
                return Ok(jpeg);
            }

            if self.pending.len() > MAX_PENDING_BYTES {
                self.pending.clear();
                return Err(CameraError::StreamRead {
                    details: format!(
                        "no frame markers within {} buffered bytes",
                        MAX_PENDING_BYTES
                    ),
                });
            }

            let chunk = tokio::time::timeout(self.read_timeout, self.chunks.next())
                .await
                .map_err(|_| CameraError::ReadTimeout {
                    timeout_ms: self.read_timeout.as_millis() as u64,
                })?;

            match chunk {
                Some(Ok(bytes)) => self.pending.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Err(CameraError::StreamRead {
                        details: e.to_string(),
                    })
                }
                None => return Err(CameraError::StreamClosed),
            }
        }
    }
}

/// Frame source issuing one GET per frame
struct PollSource {
    client: reqwest::Client,
    url: String,
    read_timeout: Duration,
}

#[async_trait]
impl FrameSource for PollSource {
    async fn read_frame(&mut self) -> Result<Vec<u8>, CameraError> {
        let response = tokio::time::timeout(self.read_timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| CameraError::ReadTimeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            })?
            .map_err(|e| CameraError::StreamRead {
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CameraError::StreamRead {
                details: format!("HTTP status {}", response.status()),
            });
        }

        let body = response.bytes().await.map_err(|e| CameraError::StreamRead {
            details: e.to_string(),
        })?;

        if body.is_empty() {
            return Err(CameraError::StreamRead {
                details: "empty response body".to_string(),
            });
        }

        Ok(body.to_vec())
    }
}

/// HTTP snapshot fallback (single JPEG per request)
pub struct HttpSnapshot {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshot {
    pub fn new(url: String, timeout: Duration) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CameraError::Snapshot {
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshot {
    async fn snapshot(&self) -> Result<Vec<u8>, CameraError> {
        let response =
            self.client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| CameraError::Snapshot {
                    details: e.to_string(),
                })?;

        if !response.status().is_success() {
            return Err(CameraError::Snapshot {
                details: format!("HTTP status {}", response.status()),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CameraError::Snapshot {
                details: e.to_string(),
            })?;

        if body.is_empty() {
            return Err(CameraError::Snapshot {
                details: "empty response body".to_string(),
            });
        }

        Ok(body.to_vec())
    }
}

/// Extract the first complete JPEG (SOI..EOI inclusive) from `pending`,
/// discarding any bytes before the frame start.
fn extract_jpeg(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let soi = find_marker(pending, [0xFF, 0xD8])?;
    let eoi = find_marker(&pending[soi + 2..], [0xFF, 0xD9])?;

    let end = soi + 2 + eoi + 2;
    let jpeg = pending[soi..end].to_vec();
    pending.drain(..end);
    Some(jpeg)
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_jpeg_complete_frame() {
        let mut pending = vec![0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];
        let jpeg = extract_jpeg(&mut pending).unwrap();
        assert_eq!(jpeg, vec![0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_extract_jpeg_skips_boundary_preamble() {
        // Multipart boundary bytes before the frame start must be discarded
        let mut pending = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        pending.extend_from_slice(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        pending.extend_from_slice(b"\r\n--frame");

        let jpeg = extract_jpeg(&mut pending).unwrap();
        assert_eq!(jpeg, vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        // Trailing boundary bytes remain for the next scan
        assert_eq!(pending, b"\r\n--frame".to_vec());
    }

    #[test]
    fn test_extract_jpeg_incomplete_frame() {
        let mut pending = vec![0xFF, 0xD8, 0x01, 0x02];
        assert!(extract_jpeg(&mut pending).is_none());
        // Partial data is kept until the EOI marker arrives
        assert_eq!(pending.len(), 4);

        pending.extend_from_slice(&[0xFF, 0xD9]);
        assert!(extract_jpeg(&mut pending).is_some());
    }

    #[test]
    fn test_extract_jpeg_two_frames_in_buffer() {
        let mut pending = vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9, 0xFF, 0xD8, 0x02, 0xFF, 0xD9];
        let first = extract_jpeg(&mut pending).unwrap();
        assert_eq!(first[2], 0x01);
        let second = extract_jpeg(&mut pending).unwrap();
        assert_eq!(second[2], 0x02);
        assert!(extract_jpeg(&mut pending).is_none());
    }
}
