use super::{Detection, Detector};
use crate::config::DetectionConfig;
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// A detection that passed filtering and the cooldown gate
#[derive(Debug, Clone)]
pub struct AcceptedDetection {
    pub label: String,
    pub confidence: f32,
    pub class_id: i64,
    pub accepted_at: SystemTime,
}

/// Cooldown tracking for alert deduplication
struct CooldownState {
    last_alert_type: Option<String>,
    last_alert_time: Option<Instant>,
}

/// Runs the external detector on every Nth frame, filters the results and
/// suppresses repeat alerts within the cooldown window.
///
/// The cooldown read-then-write is atomic with respect to concurrent
/// evaluations: `last_alert_type`/`last_alert_time` are updated under the
/// same lock that decides whether to alert, so two frames arriving in the
/// same narrow window cannot double-trigger.
pub struct DetectionGate {
    detector: Option<Arc<dyn Detector>>,
    confidence_threshold: f32,
    allowed_classes: Vec<String>,
    frame_skip: u64,
    cooldown: Duration,
    frame_counter: AtomicU64,
    state: Mutex<CooldownState>,
    stats: GateStats,
}

#[derive(Debug)]
struct GateStats {
    frames_evaluated: AtomicU64,
    detections_observed: AtomicU64,
    alerts_accepted: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct GateStatsSnapshot {
    pub frames_evaluated: u64,
    pub detections_observed: u64,
    pub alerts_accepted: u64,
}

impl DetectionGate {
    pub fn new(config: &DetectionConfig, detector: Option<Arc<dyn Detector>>) -> Self {
        if detector.is_none() {
            warn!("No detector configured; detection is disabled");
        }

        Self {
            detector,
            confidence_threshold: config.confidence_threshold,
            allowed_classes: config
                .allowed_classes
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            frame_skip: config.frame_skip.max(1) as u64,
            cooldown: Duration::from_secs(config.cooldown_seconds),
            frame_counter: AtomicU64::new(0),
            state: Mutex::new(CooldownState {
                last_alert_type: None,
                last_alert_time: None,
            }),
            stats: GateStats {
                frames_evaluated: AtomicU64::new(0),
                detections_observed: AtomicU64::new(0),
                alerts_accepted: AtomicU64::new(0),
            },
        }
    }

    /// Whether a detector is available at all
    pub fn detection_enabled(&self) -> bool {
        self.detector.is_some()
    }

    /// Evaluate one frame.
    ///
    /// Returns `Some` only for a detection that survived the confidence
    /// threshold, the class allow-list and the cooldown window. Detector
    /// failures are logged and treated as "no detection this cycle".
    pub async fn evaluate(&self, frame: &Frame) -> Option<AcceptedDetection> {
        let count = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.frame_skip != 0 {
            return None;
        }

        let detector = match &self.detector {
            Some(d) => d,
            None => {
                trace!("Detection disabled; skipping frame {}", frame.id);
                return None;
            }
        };

        self.stats.frames_evaluated.fetch_add(1, Ordering::Relaxed);

        let detections = match detector.detect(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detection error on frame {}: {}", frame.id, e);
                return None;
            }
        };

        let candidate = self.filter(detections)?;

        self.stats
            .detections_observed
            .fetch_add(1, Ordering::Relaxed);

        // Cooldown decision and update must be one atomic step
        {
            let mut state = self.state.lock();
            let now = Instant::now();

            let should_alert = match (&state.last_alert_type, state.last_alert_time) {
                (Some(last_type), Some(last_time)) => {
                    *last_type != candidate.label || now.duration_since(last_time) >= self.cooldown
                }
                _ => true,
            };

            if !should_alert {
                info!(
                    "Detection: {} (confidence {:.2}) - cooldown active",
                    candidate.label, candidate.confidence
                );
                return None;
            }

            state.last_alert_type = Some(candidate.label.clone());
            state.last_alert_time = Some(now);
        }

        self.stats.alerts_accepted.fetch_add(1, Ordering::Relaxed);

        Some(AcceptedDetection {
            label: candidate.label,
            confidence: candidate.confidence,
            class_id: candidate.class_id,
            accepted_at: SystemTime::now(),
        })
    }

    /// Apply the confidence threshold and allow-list; keep the first survivor
    fn filter(&self, detections: Vec<Detection>) -> Option<Detection> {
        detections.into_iter().find(|d| {
            if d.confidence <= self.confidence_threshold {
                debug!(
                    "Detection {} below confidence threshold ({:.2} <= {:.2})",
                    d.label, d.confidence, self.confidence_threshold
                );
                return false;
            }

            let label = d.label.to_lowercase();
            let allowed = self.allowed_classes.iter().any(|c| label.contains(c));
            if !allowed {
                debug!("Detection {} not in allowed classes", d.label);
            }
            allowed
        })
    }

    pub fn stats(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            frames_evaluated: self.stats.frames_evaluated.load(Ordering::Relaxed),
            detections_observed: self.stats.detections_observed.load(Ordering::Relaxed),
            alerts_accepted: self.stats.alerts_accepted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectionError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    struct MockDetector {
        responses: Mutex<VecDeque<Result<Vec<Detection>, ()>>>,
        calls: AtomicU32,
    }

    impl MockDetector {
        fn always(detections: Vec<Detection>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from(vec![Ok(detections)])),
                calls: AtomicU32::new(0),
            })
        }

        fn scripted(script: Vec<Result<Vec<Detection>, ()>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from(script)),
                calls: AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Detector for MockDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            let next = match responses.len() {
                // Keep replaying the last scripted response
                0 | 1 => responses.front().cloned(),
                _ => responses.pop_front(),
            };
            match next {
                Some(Ok(detections)) => Ok(detections),
                Some(Err(())) => Err(DetectionError::Request {
                    details: "scripted failure".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            class_id: 0,
        }
    }

    fn gate_config(frame_skip: u32, cooldown_seconds: u64) -> DetectionConfig {
        DetectionConfig {
            url: None,
            confidence_threshold: 0.3,
            allowed_classes: vec!["person".to_string(), "cow".to_string()],
            frame_skip,
            cooldown_seconds,
            timeout_secs: 5,
        }
    }

    fn test_frame(id: u64) -> Frame {
        Frame::new(id, SystemTime::now(), vec![0xFF, 0xD8, 0xFF, 0xD9])
    }

    #[tokio::test]
    async fn test_frame_skip_bounds_detector_calls() {
        let detector = MockDetector::always(vec![]);
        let gate = DetectionGate::new(&gate_config(3, 30), Some(detector.clone()));

        for i in 0..9 {
            gate.evaluate(&test_frame(i)).await;
        }

        // Nine frames with frame_skip=3 means three detector invocations
        assert_eq!(detector.call_count(), 3);
    }

    #[tokio::test]
    async fn test_accepts_qualifying_detection() {
        let detector = MockDetector::always(vec![detection("person", 0.91)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        let accepted = gate.evaluate(&test_frame(1)).await.expect("alert");
        assert_eq!(accepted.label, "person");
        assert_eq!(gate.stats().alerts_accepted, 1);
    }

    #[tokio::test]
    async fn test_filters_low_confidence() {
        // Threshold is strict: exactly-at-threshold must not qualify
        let detector = MockDetector::always(vec![detection("person", 0.3)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_none());
        assert_eq!(gate.stats().alerts_accepted, 0);
    }

    #[tokio::test]
    async fn test_filters_disallowed_class() {
        let detector = MockDetector::always(vec![detection("bicycle", 0.95)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_allow_list_is_case_insensitive_substring() {
        let detector = MockDetector::always(vec![detection("Person-Walking", 0.8)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        let accepted = gate.evaluate(&test_frame(1)).await.expect("alert");
        assert_eq!(accepted.label, "Person-Walking");
    }

    #[tokio::test]
    async fn test_first_qualifying_detection_wins() {
        let detector = MockDetector::always(vec![
            detection("bicycle", 0.99),
            detection("cow", 0.7),
            detection("person", 0.9),
        ]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        let accepted = gate.evaluate(&test_frame(1)).await.expect("alert");
        assert_eq!(accepted.label, "cow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_same_label() {
        let detector = MockDetector::always(vec![detection("person", 0.9)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(gate.evaluate(&test_frame(2)).await.is_none());
        assert_eq!(gate.stats().detections_observed, 2);
        assert_eq!(gate.stats().alerts_accepted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expiry_allows_new_alert() {
        let detector = MockDetector::always(vec![detection("person", 0.9)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_some());

        tokio::time::advance(Duration::from_secs(35)).await;
        assert!(gate.evaluate(&test_frame(2)).await.is_some());
        assert_eq!(gate.stats().alerts_accepted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_label_bypasses_cooldown() {
        let detector = MockDetector::scripted(vec![
            Ok(vec![detection("person", 0.9)]),
            Ok(vec![detection("cow", 0.8)]),
        ]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        let accepted = gate.evaluate(&test_frame(2)).await.expect("alert");
        assert_eq!(accepted.label, "cow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_detection_leaves_cooldown_untouched() {
        let detector = MockDetector::always(vec![detection("person", 0.9)]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_some());

        // A suppressed detection at t=20 must not extend the window:
        // the next one at t=32 is past the original cooldown and alerts.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(gate.evaluate(&test_frame(2)).await.is_none());

        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(gate.evaluate(&test_frame(3)).await.is_some());
    }

    #[tokio::test]
    async fn test_detector_error_means_no_detection() {
        let detector = MockDetector::scripted(vec![Err(()), Ok(vec![detection("person", 0.9)])]);
        let gate = DetectionGate::new(&gate_config(1, 30), Some(detector));

        assert!(gate.evaluate(&test_frame(1)).await.is_none());
        // The loop survives the error and the next frame alerts normally
        assert!(gate.evaluate(&test_frame(2)).await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_detector_never_alerts() {
        let gate = DetectionGate::new(&gate_config(1, 30), None);
        assert!(!gate.detection_enabled());
        assert!(gate.evaluate(&test_frame(1)).await.is_none());
        assert_eq!(gate.stats().frames_evaluated, 0);
    }
}
