// yarp/src/conn_log.rs
// Captures every frame a session sends or receives into a SQLite database.

use crate::base::RithmicError;
use crate::protocol_decoder::peek_template_id;
use crate::template::template;

use rusqlite::{params, Connection as DbConnection, OptionalExtension};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const CENTER_DOT: char = '·'; // Unicode U+00B7

/// Converts a payload to text, replacing the NUL field separators with CENTER_DOT.
fn payload_to_text(bytes: &[u8]) -> String {
  String::from_utf8_lossy(bytes).replace('\0', &CENTER_DOT.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
  Send,
  Recv,
}

impl fmt::Display for LogDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LogDirection::Send => write!(f, "SEND"),
      LogDirection::Recv => write!(f, "RECV"),
    }
  }
}

impl LogDirection {
  fn parse(s: &str) -> Option<Self> {
    match s {
      "SEND" => Some(LogDirection::Send),
      "RECV" => Some(LogDirection::Recv),
      _ => None,
    }
  }
}

/// One frame read back from a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedFrame {
  pub direction: LogDirection,
  pub relative_timestamp_ms: f64,
  pub template_id: Option<i32>,
  pub template_name: Option<String>,
  pub payload: Vec<u8>,
}

struct ConnectionLoggerInner {
  db: DbConnection,
  session_id: i64,
  start_time_instant: Instant,
}

/// Clones share the same database connection.
#[derive(Clone)]
pub struct ConnectionLogger {
  inner: Arc<Mutex<ConnectionLoggerInner>>,
}

impl ConnectionLogger {
  /// Opens (or creates) the capture database, replaces any previous session with the
  /// same name, and starts a new session record.
  pub fn new<P: AsRef<Path>>(db_path: P, session_name: &str, peer: &str) -> Result<Self, RithmicError> {
    log::info!(
      "Initializing connection logger at path: {:?}, Session Name: '{}'",
      db_path.as_ref(), session_name
    );
    let mut db = DbConnection::open(db_path)
      .map_err(|e| RithmicError::ConfigurationError(format!("Failed to open logger database: {}", e)))?;

    db.pragma_update(None, "journal_mode", "WAL")
      .map_err(|e| RithmicError::ConfigurationError(format!("Failed to set WAL mode: {}", e)))?;
    db.execute("PRAGMA foreign_keys = ON;", [])
      .map_err(|e| RithmicError::ConfigurationError(format!("Failed to enable foreign keys: {}", e)))?;

    Self::create_tables(&db)?;

    let start_time_unix_ms = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_err(|e| RithmicError::InternalError(format!("System time error: {}", e)))?
      .as_millis() as i64;

    let session_id = Self::replace_session(&mut db, session_name, start_time_unix_ms, peer)?;
    log::info!("Started logger session ID: {} for name '{}'", session_id, session_name);

    Ok(Self {
      inner: Arc::new(Mutex::new(ConnectionLoggerInner {
        db,
        session_id,
        start_time_instant: Instant::now(),
      })),
    })
  }

  fn create_tables(db: &DbConnection) -> Result<(), RithmicError> {
    db.execute_batch(
      "BEGIN;
             CREATE TABLE IF NOT EXISTS sessions (
                 session_id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 session_name        TEXT NOT NULL UNIQUE,
                 start_time_unix_ms  INTEGER NOT NULL,
                 peer                TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS frames (
                 frame_id              INTEGER PRIMARY KEY AUTOINCREMENT,
                 session_id            INTEGER NOT NULL,
                 direction             TEXT NOT NULL CHECK(direction IN ('SEND', 'RECV')),
                 relative_timestamp_ms REAL NOT NULL,
                 template_id           INTEGER NULL,
                 template_name         TEXT NULL,
                 payload               BLOB NOT NULL,
                 payload_text          TEXT NOT NULL,
                 FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_name ON sessions (session_name);
             CREATE INDEX IF NOT EXISTS idx_frames_session_time ON frames (session_id, relative_timestamp_ms);
             CREATE INDEX IF NOT EXISTS idx_frames_session_template ON frames (session_id, template_id);
             COMMIT;"
    ).map_err(|e| RithmicError::ConfigurationError(format!("Failed to create logger tables: {}", e)))?;
    Ok(())
  }

  fn replace_session(
    db: &mut DbConnection,
    session_name: &str,
    start_time_unix_ms: i64,
    peer: &str,
  ) -> Result<i64, RithmicError> {
    let tx = db.transaction()
      .map_err(|e| RithmicError::LoggingError(format!("Failed to start logger transaction: {}", e)))?;

    // ON DELETE CASCADE removes the old frames
    let deleted_count = tx.execute("DELETE FROM sessions WHERE session_name = ?1", params![session_name])
      .map_err(|e| RithmicError::LoggingError(format!("Failed to delete previous session '{}': {}", session_name, e)))?;
    if deleted_count > 0 {
      log::warn!("Deleted {} previous log session(s) named '{}'", deleted_count, session_name);
    }

    tx.execute(
      "INSERT INTO sessions (session_name, start_time_unix_ms, peer) VALUES (?1, ?2, ?3)",
      params![session_name, start_time_unix_ms, peer],
    ).map_err(|e| RithmicError::LoggingError(format!("Failed to insert new session '{}': {}", session_name, e)))?;

    let new_session_id = tx.last_insert_rowid();
    tx.commit()
      .map_err(|e| RithmicError::LoggingError(format!("Failed to commit logger transaction: {}", e)))?;
    Ok(new_session_id)
  }

  /// Logs a single frame payload. Failures are reported through `log` only, so that a
  /// broken capture never takes the session down.
  pub fn log_frame(&self, direction: LogDirection, payload: &[u8]) {
    let template_id = peek_template_id(payload).ok();
    let template_name = template_id.and_then(template::name);
    let payload_text = payload_to_text(payload);

    match self.inner.lock() {
      Ok(guard) => {
        let relative_ms = guard.start_time_instant.elapsed().as_secs_f64() * 1000.0;
        match guard.db.execute(
          "INSERT INTO frames (session_id, direction, relative_timestamp_ms, template_id, template_name, payload, payload_text)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          params![
            guard.session_id,
            direction.to_string(),
            relative_ms,
            template_id,
            template_name,
            payload,
            payload_text
          ],
        ) {
          Ok(_) => {
            log::trace!(
              "Logged {} frame: Template={}, RelTime={:.3}ms, Size={}",
              direction,
              template_name.unwrap_or("UNKNOWN"),
              relative_ms,
              payload.len()
            );
          }
          Err(e) => {
            log::error!("Failed to log frame to database: {}", e);
          }
        }
      }
      Err(poisoned) => {
        log::error!("ConnectionLogger mutex poisoned: {}", poisoned);
      }
    }
  }
}

/// Read back every frame of a named capture session, in order.
pub fn load_frames<P: AsRef<Path>>(db_path: P, session_name: &str) -> Result<Vec<LoggedFrame>, RithmicError> {
  let db = DbConnection::open(db_path)
    .map_err(|e| RithmicError::LoggingError(format!("Failed to open logger database: {}", e)))?;

  let session_id: Option<i64> = db
    .query_row(
      "SELECT session_id FROM sessions WHERE session_name = ?1",
      params![session_name],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| RithmicError::LoggingError(format!("Failed to look up session '{}': {}", session_name, e)))?;
  let session_id = session_id
    .ok_or_else(|| RithmicError::LoggingError(format!("No capture session named '{}'", session_name)))?;

  let mut stmt = db
    .prepare(
      "SELECT direction, relative_timestamp_ms, template_id, template_name, payload
         FROM frames WHERE session_id = ?1 ORDER BY frame_id",
    )
    .map_err(|e| RithmicError::LoggingError(format!("Failed to prepare frame query: {}", e)))?;

  let rows = stmt
    .query_map(params![session_id], |row| {
      let direction: String = row.get(0)?;
      let relative_timestamp_ms: f64 = row.get(1)?;
      let template_id: Option<i32> = row.get(2)?;
      let template_name: Option<String> = row.get(3)?;
      let payload: Vec<u8> = row.get(4)?;
      Ok((direction, relative_timestamp_ms, template_id, template_name, payload))
    })
    .map_err(|e| RithmicError::LoggingError(format!("Failed to query frames: {}", e)))?;

  let mut frames = Vec::new();
  for row in rows {
    let (direction, relative_timestamp_ms, template_id, template_name, payload) =
      row.map_err(|e| RithmicError::LoggingError(format!("Failed to read frame row: {}", e)))?;
    let direction = LogDirection::parse(&direction)
      .ok_or_else(|| RithmicError::LoggingError(format!("Bad direction '{}' in capture", direction)))?;
    frames.push(LoggedFrame { direction, relative_timestamp_ms, template_id, template_name, payload });
  }
  Ok(frames)
}
