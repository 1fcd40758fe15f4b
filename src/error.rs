use thiserror::Error;

#[derive(Error, Debug)]
pub enum FarmcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Siren error: {0}")]
    Siren(#[from] SirenError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Stream server error: {0}")]
    Stream(#[from] StreamError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FarmcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors from the camera connection layer (stream pull and snapshot fallback)
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to connect to {url}: {details}")]
    Connect { url: String, details: String },

    #[error("Stream read failed: {details}")]
    StreamRead { details: String },

    #[error("Stream read timed out after {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },

    #[error("Snapshot request failed: {details}")]
    Snapshot { details: String },

    #[error("Stream ended unexpectedly")]
    StreamClosed,
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detector request failed: {details}")]
    Request { details: String },

    #[error("Detector returned malformed response: {details}")]
    MalformedResponse { details: String },

    #[error("Detector is not configured")]
    NotConfigured,
}

#[derive(Error, Debug)]
pub enum SirenError {
    #[error("Actuator call failed: {details}")]
    Actuator { details: String },

    #[error("Actuator returned status {status}")]
    DeviceStatus { status: u16 },
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Push request failed: {details}")]
    Request { details: String },

    #[error("Push provider returned status {status}: {body}")]
    ProviderStatus { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open database at {path}: {details}")]
    Open { path: String, details: String },

    #[error("Database query failed: {details}")]
    Query { details: String },

    #[error("Database worker terminated unexpectedly")]
    WorkerGone,

    #[error("Event {id} not found")]
    NotFound { id: i64 },

    #[error("Migration failed: {details}")]
    Migration { details: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Query {
            details: e.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to create clip directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write clip {path}: {source}")]
    ClipWrite {
        path: String,
        source: std::io::Error,
    },

    #[error("No frames available to start a clip")]
    EmptyBuffer,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },
}

pub type Result<T> = std::result::Result<T, FarmcamError>;
