use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FarmcamConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub arming: ArmingConfig,
    pub siren: SirenConfig,
    pub notifier: NotifierConfig,
    pub recording: RecordingConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Candidate stream URLs, tried in order on (re)connect
    #[serde(default = "default_stream_urls")]
    pub stream_urls: Vec<String>,

    /// Single-shot snapshot URL used as a fallback when stream reads fail
    #[serde(default)]
    pub snapshot_url: Option<String>,

    /// Target processing frame rate
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Timeout for a single stream read in seconds
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Timeout for opening a stream connection in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Consecutive failed reads before the stream handle is force-released
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Delay between read retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay after a forced release before reconnecting, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Inference endpoint; detection is disabled when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Minimum confidence (exclusive) for a detection to qualify
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Class names that may trigger an alert (case-insensitive substring match)
    #[serde(default = "default_allowed_classes")]
    pub allowed_classes: Vec<String>,

    /// Run the detector every Nth frame
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,

    /// Minimum seconds between alerts of the same type
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Timeout for a single detector call in seconds
    #[serde(default = "default_detection_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArmingConfig {
    /// Minutes the system stays disarmed before re-arming itself
    #[serde(default = "default_auto_rearm_minutes")]
    pub auto_rearm_minutes: u64,

    /// Poll interval of the orchestrator while disarmed, in milliseconds
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SirenConfig {
    /// Siren device endpoint; state changes are local-only when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Seconds after an alert before the siren is switched off automatically
    #[serde(default = "default_auto_off_seconds")]
    pub auto_off_seconds: u64,

    /// Timeout for a single actuator call in seconds
    #[serde(default = "default_siren_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifierConfig {
    /// Push application identifier; notifications are skipped when unset
    #[serde(default)]
    pub app_id: Option<String>,

    /// Push API credential; notifications are skipped when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// Push provider endpoint
    #[serde(default = "default_notifier_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Enable clip recording on alerts
    #[serde(default = "default_recording_enabled")]
    pub enabled: bool,

    /// Base path for storing clips
    #[serde(default = "default_recording_path")]
    pub path: String,

    /// Clip duration in seconds
    #[serde(default = "default_clip_seconds")]
    pub clip_seconds: u64,

    /// Pre-event context retained in the frame buffer, in seconds
    #[serde(default = "default_pre_event_seconds")]
    pub pre_event_seconds: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file path
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Device identifier recorded on persisted events
    #[serde(default = "default_device_id")]
    pub device_id: String,
}

impl FarmcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("farmcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.stream_urls", default_stream_urls())?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.read_timeout_secs", default_read_timeout_secs())?
            .set_default(
                "camera.connect_timeout_secs",
                default_connect_timeout_secs(),
            )?
            .set_default(
                "camera.max_consecutive_failures",
                default_max_consecutive_failures(),
            )?
            .set_default("camera.retry_delay_ms", default_retry_delay_ms())?
            .set_default("camera.reconnect_delay_ms", default_reconnect_delay_ms())?
            .set_default(
                "detection.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default("detection.allowed_classes", default_allowed_classes())?
            .set_default("detection.frame_skip", default_frame_skip())?
            .set_default("detection.cooldown_seconds", default_cooldown_seconds())?
            .set_default("detection.timeout_secs", default_detection_timeout_secs())?
            .set_default("arming.auto_rearm_minutes", default_auto_rearm_minutes())?
            .set_default("arming.idle_poll_ms", default_idle_poll_ms())?
            .set_default("siren.auto_off_seconds", default_auto_off_seconds())?
            .set_default("siren.timeout_secs", default_siren_timeout_secs())?
            .set_default("notifier.api_url", default_notifier_api_url())?
            .set_default("recording.enabled", default_recording_enabled())?
            .set_default("recording.path", default_recording_path())?
            .set_default("recording.clip_seconds", default_clip_seconds())?
            .set_default("recording.pre_event_seconds", default_pre_event_seconds())?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("database.path", default_database_path())?
            .set_default("system.device_id", default_device_id())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with FARMCAM_ prefix
            .add_source(Environment::with_prefix("FARMCAM").separator("_"))
            .build()?;

        let config: FarmcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.stream_urls.is_empty() {
            return Err(ConfigError::Message(
                "At least one camera stream URL must be configured".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.camera.max_consecutive_failures == 0 {
            return Err(ConfigError::Message(
                "Camera max_consecutive_failures must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Message(
                "Detection confidence_threshold must be between 0 and 1".to_string(),
            ));
        }

        if self.detection.frame_skip == 0 {
            return Err(ConfigError::Message(
                "Detection frame_skip must be greater than 0".to_string(),
            ));
        }

        if self.recording.clip_seconds == 0 {
            return Err(ConfigError::Message(
                "Recording clip_seconds must be greater than 0".to_string(),
            ));
        }

        if self.recording.pre_event_seconds == 0 {
            return Err(ConfigError::Message(
                "Recording pre_event_seconds must be greater than 0".to_string(),
            ));
        }

        if self.arming.auto_rearm_minutes == 0 {
            return Err(ConfigError::Message(
                "Arming auto_rearm_minutes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for FarmcamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                stream_urls: default_stream_urls(),
                snapshot_url: None,
                fps: default_camera_fps(),
                read_timeout_secs: default_read_timeout_secs(),
                connect_timeout_secs: default_connect_timeout_secs(),
                max_consecutive_failures: default_max_consecutive_failures(),
                retry_delay_ms: default_retry_delay_ms(),
                reconnect_delay_ms: default_reconnect_delay_ms(),
            },
            detection: DetectionConfig {
                url: None,
                confidence_threshold: default_confidence_threshold(),
                allowed_classes: default_allowed_classes(),
                frame_skip: default_frame_skip(),
                cooldown_seconds: default_cooldown_seconds(),
                timeout_secs: default_detection_timeout_secs(),
            },
            arming: ArmingConfig {
                auto_rearm_minutes: default_auto_rearm_minutes(),
                idle_poll_ms: default_idle_poll_ms(),
            },
            siren: SirenConfig {
                url: None,
                auto_off_seconds: default_auto_off_seconds(),
                timeout_secs: default_siren_timeout_secs(),
            },
            notifier: NotifierConfig {
                app_id: None,
                api_key: None,
                api_url: default_notifier_api_url(),
            },
            recording: RecordingConfig {
                enabled: default_recording_enabled(),
                path: default_recording_path(),
                clip_seconds: default_clip_seconds(),
                pre_event_seconds: default_pre_event_seconds(),
            },
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            database: DatabaseConfig {
                path: default_database_path(),
            },
            system: SystemConfig {
                device_id: default_device_id(),
            },
        }
    }
}

// Default value functions
fn default_stream_urls() -> Vec<String> {
    vec!["http://192.168.43.77:81/stream".to_string()]
}
fn default_camera_fps() -> u32 {
    15
}
fn default_read_timeout_secs() -> u64 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    300
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_confidence_threshold() -> f32 {
    0.3
}
fn default_allowed_classes() -> Vec<String> {
    vec![
        "person".to_string(),
        "elephant".to_string(),
        "cow".to_string(),
    ]
}
fn default_frame_skip() -> u32 {
    3
}
fn default_cooldown_seconds() -> u64 {
    30
}
fn default_detection_timeout_secs() -> u64 {
    10
}

fn default_auto_rearm_minutes() -> u64 {
    60
}
fn default_idle_poll_ms() -> u64 {
    1000
}

fn default_auto_off_seconds() -> u64 {
    60
}
fn default_siren_timeout_secs() -> u64 {
    3
}

fn default_notifier_api_url() -> String {
    "https://onesignal.com/api/v1/notifications".to_string()
}

fn default_recording_enabled() -> bool {
    true
}
fn default_recording_path() -> String {
    "./clips".to_string()
}
fn default_clip_seconds() -> u64 {
    120
}
fn default_pre_event_seconds() -> u32 {
    5
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8000
}

fn default_database_path() -> String {
    "farmcam.db".to_string()
}

fn default_device_id() -> String {
    "ESP32-CAM-01".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FarmcamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.frame_skip, 3);
        assert_eq!(config.detection.cooldown_seconds, 30);
        assert_eq!(config.siren.auto_off_seconds, 60);
    }

    #[test]
    fn test_config_validation() {
        let mut config = FarmcamConfig::default();

        config.camera.stream_urls.clear();
        assert!(config.validate().is_err());
        config.camera.stream_urls = default_stream_urls();
        assert!(config.validate().is_ok());

        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
        config.detection.confidence_threshold = 0.3;

        config.detection.frame_skip = 0;
        assert!(config.validate().is_err());
        config.detection.frame_skip = 3;

        config.recording.pre_event_seconds = 0;
        assert!(config.validate().is_err());
        config.recording.pre_event_seconds = 5;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = FarmcamConfig::load_from_file("definitely-not-a-real-file.toml").unwrap();
        assert_eq!(config.camera.fps, default_camera_fps());
        assert_eq!(config.detection.allowed_classes, default_allowed_classes());
        assert!(config.detection.url.is_none());
        assert!(config.notifier.app_id.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("farmcam.toml");
        std::fs::write(
            &path,
            r#"
[camera]
stream_urls = ["http://10.0.0.5:81/stream", "http://10.0.0.5/stream"]
fps = 30

[detection]
url = "http://127.0.0.1:9000/detect"
cooldown_seconds = 10

[recording]
enabled = false
"#,
        )
        .unwrap();

        let config = FarmcamConfig::load_from_file(&path).unwrap();
        assert_eq!(config.camera.stream_urls.len(), 2);
        assert_eq!(config.camera.fps, 30);
        assert_eq!(
            config.detection.url.as_deref(),
            Some("http://127.0.0.1:9000/detect")
        );
        assert_eq!(config.detection.cooldown_seconds, 10);
        assert!(!config.recording.enabled);
        // Untouched sections keep their defaults
        assert_eq!(config.siren.auto_off_seconds, default_auto_off_seconds());
        assert!(config.validate().is_ok());
    }
}
