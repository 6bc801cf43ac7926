//! Persistent run lifecycle, one row per content id.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::ErrorKind;
use crate::staging::ContentId;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS simulations (
    content_id      TEXT PRIMARY KEY,
    sequence_number INTEGER NOT NULL,
    params          TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Forward-only lifecycle; repeating the current status is a no-op.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        self == next
            || matches!(
                (self, next),
                (Created, Running) | (Created, Failed) | (Running, Completed) | (Running, Failed)
            )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(RunStatus::Created),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(StatusError::InvalidStatus { value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub content_id: ContentId,
    pub sequence_number: u32,
    pub params_repr: String,
    pub status: RunStatus,
    pub created_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("unrecognized run status {value:?}")]
    InvalidStatus { value: String },

    #[error("run {content_id} cannot move from {from} to {to}")]
    InvalidTransition {
        content_id: ContentId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("no run recorded for {content_id}")]
    UnknownRun { content_id: ContentId },

    #[error("stored {column} {value:?} is malformed")]
    CorruptRecord { column: &'static str, value: String },

    #[error("stored parameters of {content_id} are not a JSON object")]
    CorruptParams {
        content_id: ContentId,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot create status store directory {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("status store query failed")]
    Sqlite(#[from] rusqlite::Error),
}

impl StatusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StatusError::InvalidStatus { .. } | StatusError::InvalidTransition { .. } => {
                ErrorKind::InvalidStatus
            }
            StatusError::UnknownRun { .. }
            | StatusError::CorruptRecord { .. }
            | StatusError::CorruptParams { .. }
            | StatusError::Io { .. }
            | StatusError::Sqlite(_) => ErrorKind::Storage,
        }
    }
}

type RawRow = (String, i64, String, String, String);

fn into_record(raw: RawRow) -> Result<RunRecord, StatusError> {
    let (id, seq, params_repr, status, created_at) = raw;
    let content_id = ContentId::parse(&id).ok_or(StatusError::CorruptRecord {
        column: "content_id",
        value: id,
    })?;
    let sequence_number = u32::try_from(seq).map_err(|_| StatusError::CorruptRecord {
        column: "sequence_number",
        value: seq.to_string(),
    })?;
    Ok(RunRecord {
        content_id,
        sequence_number,
        params_repr,
        status: status.parse()?,
        created_at,
    })
}

pub struct StatusStore {
    conn: Connection,
}

impl StatusStore {
    pub fn open(path: &Path) -> Result<Self, StatusError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StatusError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        debug!(db = %path.display(), "opened status store");
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StatusError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StatusError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    /// Records a new run as CREATED. Returns false when the id already exists.
    pub fn insert(&self, id: &ContentId, sequence_number: u32, params_repr: &str) -> Result<bool, StatusError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO simulations (content_id, sequence_number, params, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), sequence_number, params_repr, RunStatus::Created.as_str()],
        )?;
        Ok(changed == 1)
    }

    pub fn update_status(&self, id: &ContentId, next: RunStatus) -> Result<(), StatusError> {
        let current = self
            .get(id)?
            .ok_or_else(|| StatusError::UnknownRun { content_id: id.clone() })?
            .status;
        if !current.can_transition_to(next) {
            return Err(StatusError::InvalidTransition {
                content_id: id.clone(),
                from: current,
                to: next,
            });
        }
        self.conn.execute(
            "UPDATE simulations SET status = ?1 WHERE content_id = ?2",
            params![next.as_str(), id.as_str()],
        )?;
        debug!(content_id = %id, from = %current, to = %next, "status updated");
        Ok(())
    }

    /// Same as [`update_status`](Self::update_status) for a raw status string.
    pub fn update_status_str(&self, id: &ContentId, next: &str) -> Result<(), StatusError> {
        self.update_status(id, next.parse()?)
    }

    pub fn get(&self, id: &ContentId) -> Result<Option<RunRecord>, StatusError> {
        let raw: Option<RawRow> = self
            .conn
            .query_row(
                "SELECT content_id, sequence_number, params, status, created_at
                 FROM simulations WHERE content_id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        raw.map(into_record).transpose()
    }

    pub fn list(&self) -> Result<Vec<RunRecord>, StatusError> {
        let mut stmt = self.conn.prepare(
            "SELECT content_id, sequence_number, params, status, created_at
             FROM simulations ORDER BY sequence_number, content_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(into_record(raw?)?);
        }
        Ok(out)
    }

    pub fn params_for(&self, id: &ContentId) -> Result<Option<Map<String, Value>>, StatusError> {
        let Some(record) = self.get(id)? else {
            return Ok(None);
        };
        serde_json::from_str(&record.params_repr)
            .map(Some)
            .map_err(|source| StatusError::CorruptParams {
                content_id: id.clone(),
                source,
            })
    }
}
