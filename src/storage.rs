use crate::error::StorageError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{error, info};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS detection_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    detection_type TEXT NOT NULL,
    device_id TEXT,
    siren_activated INTEGER NOT NULL DEFAULT 0,
    notified INTEGER NOT NULL DEFAULT 0,
    video_filename TEXT,
    confidence REAL,
    extra TEXT
);
CREATE INDEX IF NOT EXISTS idx_detection_events_timestamp
    ON detection_events(timestamp DESC);
";

/// A persisted alert event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub detection_type: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub siren_activated: bool,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub video_filename: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// Partial update for an existing event; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionEventPatch {
    pub detection_type: Option<String>,
    pub device_id: Option<String>,
    pub siren_activated: Option<bool>,
    pub notified: Option<bool>,
    pub video_filename: Option<String>,
    pub confidence: Option<f64>,
    pub extra: Option<serde_json::Value>,
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct EventStoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for EventStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if self.sender.send(DbCommand::Shutdown).is_err() {
                error!("Failed to send shutdown to database thread");
            }
            if handle.join().is_err() {
                error!("Failed to join database thread");
            }
        }
    }
}

/// SQLite-backed event store.
///
/// All database access runs on a dedicated worker thread; async callers
/// submit closures over a channel and await the reply, so the runtime is
/// never blocked on SQLite I/O.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<EventStoreInner>,
    db_path: Arc<PathBuf>,
}

impl EventStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Open {
                    path: db_path.display().to_string(),
                    details: format!("failed to create database directory: {}", e),
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StorageError>>();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("farmcam-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(conn) => conn,
                    Err(e) => {
                        let _ = ready_tx.send(Err(StorageError::Open {
                            path: path_for_thread.display().to_string(),
                            details: e.to_string(),
                        }));
                        return;
                    }
                };

                if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {}", e);
                }
                if let Err(e) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {}", e);
                }

                let init_result = run_migrations(&mut conn);
                if ready_tx.send(init_result).is_err() {
                    error!("Database initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .map_err(|e| StorageError::Open {
                path: db_path.display().to_string(),
                details: format!("failed to spawn database worker: {}", e),
            })?;

        ready_rx.recv().map_err(|_| StorageError::WorkerGone)??;

        info!("Event store initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(EventStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Database caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| StorageError::WorkerGone)?;

        reply_rx.await.map_err(|_| StorageError::WorkerGone)?
    }

    /// Append a new event; returns the assigned row id
    pub async fn insert_event(&self, event: &DetectionEvent) -> Result<i64, StorageError> {
        let record = event.clone();
        self.execute(move |conn| {
            let timestamp = record.timestamp.unwrap_or_else(Utc::now);
            conn.execute(
                "INSERT INTO detection_events
                     (timestamp, detection_type, device_id, siren_activated,
                      notified, video_filename, confidence, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    timestamp.to_rfc3339(),
                    record.detection_type,
                    record.device_id,
                    record.siren_activated,
                    record.notified,
                    record.video_filename,
                    record.confidence,
                    record
                        .extra
                        .as_ref()
                        .map(|v| v.to_string()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// List events, most recent first
    pub async fn list_events(&self, limit: usize) -> Result<Vec<DetectionEvent>, StorageError> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, detection_type, device_id, siren_activated,
                        notified, video_filename, confidence, extra
                 FROM detection_events
                 ORDER BY timestamp DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }

    pub async fn get_event(&self, id: i64) -> Result<DetectionEvent, StorageError> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, detection_type, device_id, siren_activated,
                        notified, video_filename, confidence, extra
                 FROM detection_events
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_event(row),
                None => Err(StorageError::NotFound { id }),
            }
        })
        .await
    }

    /// Apply a partial update and return the patched event
    pub async fn patch_event(
        &self,
        id: i64,
        patch: DetectionEventPatch,
    ) -> Result<DetectionEvent, StorageError> {
        let mut event = self.get_event(id).await?;

        if let Some(detection_type) = patch.detection_type {
            event.detection_type = detection_type;
        }
        if let Some(device_id) = patch.device_id {
            event.device_id = Some(device_id);
        }
        if let Some(siren_activated) = patch.siren_activated {
            event.siren_activated = siren_activated;
        }
        if let Some(notified) = patch.notified {
            event.notified = notified;
        }
        if let Some(video_filename) = patch.video_filename {
            event.video_filename = Some(video_filename);
        }
        if let Some(confidence) = patch.confidence {
            event.confidence = Some(confidence);
        }
        if let Some(extra) = patch.extra {
            event.extra = Some(extra);
        }

        let record = event.clone();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE detection_events
                 SET detection_type = ?1,
                     device_id = ?2,
                     siren_activated = ?3,
                     notified = ?4,
                     video_filename = ?5,
                     confidence = ?6,
                     extra = ?7
                 WHERE id = ?8",
                params![
                    record.detection_type,
                    record.device_id,
                    record.siren_activated,
                    record.notified,
                    record.video_filename,
                    record.confidence,
                    record.extra.as_ref().map(|v| v.to_string()),
                    id,
                ],
            )?;

            if updated == 0 {
                return Err(StorageError::NotFound { id });
            }
            Ok(())
        })
        .await?;

        Ok(event)
    }

    pub async fn delete_event(&self, id: i64) -> Result<(), StorageError> {
        self.execute(move |conn| {
            let deleted = conn.execute("DELETE FROM detection_events WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(StorageError::NotFound { id });
            }
            Ok(())
        })
        .await
    }

    pub async fn event_count(&self) -> Result<i64, StorageError> {
        self.execute(|conn| {
            let count =
                conn.query_row("SELECT COUNT(*) FROM detection_events", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StorageError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| StorageError::Migration {
            details: format!("failed to read user_version: {}", e),
        })?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::Migration {
            details: format!(
                "database version ({}) is newer than supported schema ({})",
                version, CURRENT_SCHEMA_VERSION
            ),
        });
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction().map_err(|e| StorageError::Migration {
        details: format!("failed to open migration transaction: {}", e),
    })?;

    tx.execute_batch(SCHEMA_V1)
        .map_err(|e| StorageError::Migration {
            details: format!("failed to apply schema v1: {}", e),
        })?;

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .map_err(|e| StorageError::Migration {
            details: format!("failed to update user_version: {}", e),
        })?;

    tx.commit().map_err(|e| StorageError::Migration {
        details: format!("failed to commit migration: {}", e),
    })?;

    Ok(())
}

fn row_to_event(row: &Row) -> Result<DetectionEvent, StorageError> {
    let timestamp: String = row.get("timestamp")?;
    let extra: Option<String> = row.get("extra")?;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            details: format!("invalid timestamp '{}': {}", timestamp, e),
        })?;

    let extra = match extra {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| StorageError::Query {
                details: format!("invalid extra payload: {}", e),
            })?,
        ),
        None => None,
    };

    Ok(DetectionEvent {
        id: Some(row.get("id")?),
        timestamp: Some(timestamp),
        detection_type: row.get("detection_type")?,
        device_id: row.get("device_id")?,
        siren_activated: row.get("siren_activated")?,
        notified: row.get("notified")?,
        video_filename: row.get("video_filename")?,
        confidence: row.get("confidence")?,
        extra,
    })
}
