use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Origin, Session, generate_id, round2};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode session data: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode session data: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("record has no backend identity")]
    MissingId,
    #[error("record not found in store")]
    NotFound,
}

/// Durable storage of the session list. Callers must not assume any
/// operation succeeds; every failure surfaces as a `StorageError`.
pub trait SessionStore {
    fn load(&self) -> Result<Vec<Session>, StorageError>;
    fn replace_all(&self, sessions: &[Session]) -> Result<(), StorageError>;
    /// Persists one record, returning it possibly augmented with a
    /// backend-assigned identity.
    fn append(&self, session: Session) -> Result<Session, StorageError>;
    fn delete(&self, session: &Session) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Local backend: the whole list lives in one serialized blob under a
/// well-known file name. No identities are assigned.
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionStore for LocalStore {
    fn load(&self) -> Result<Vec<Session>, StorageError> {
        read_blob(&self.path)
    }

    fn replace_all(&self, sessions: &[Session]) -> Result<(), StorageError> {
        write_blob(&self.path, sessions)
    }

    fn append(&self, session: Session) -> Result<Session, StorageError> {
        let mut sessions = self.load()?;
        sessions.push(session.clone());
        self.replace_all(&sessions)?;
        Ok(session)
    }

    fn delete(&self, session: &Session) -> Result<(), StorageError> {
        let mut sessions = self.load()?;
        let position = sessions
            .iter()
            .position(|candidate| candidate.same_record(session))
            .ok_or(StorageError::NotFound)?;
        sessions.remove(position);
        self.replace_all(&sessions)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.replace_all(&[])
    }
}

/// A row in the remote session table. Reads accept the second observed
/// header variant via aliases; writes always emit the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteRow {
    id: String,
    #[serde(alias = "Start")]
    start: DateTime<Local>,
    #[serde(alias = "End")]
    end: DateTime<Local>,
    #[serde(alias = "Duration_minutes")]
    duration: f64,
    #[serde(default, alias = "Task")]
    task: String,
    #[serde(default, alias = "Date")]
    date: Option<NaiveDate>,
}

impl RemoteRow {
    fn into_session(self) -> Session {
        Session {
            id: Some(self.id),
            start: self.start,
            end: self.end,
            duration: round2(self.duration),
            task: self.task,
            date: self.date,
            origin: Origin::Remote,
        }
    }

    fn from_session(session: &Session, id: String) -> Self {
        Self {
            id,
            start: session.start,
            end: session.end,
            duration: round2(session.duration),
            task: session.task.clone(),
            date: Some(session.date_key()),
        }
    }
}

/// Remote backend: a table of rows queryable by ascending start time.
/// Every insert is assigned an identity; deletes require one. The
/// transport is out of scope here, so the table is file-backed and only
/// the row operations are modeled.
pub struct RemoteStore {
    path: PathBuf,
}

impl RemoteStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load_rows(&self) -> Result<Vec<RemoteRow>, StorageError> {
        read_blob(&self.path)
    }

    fn save_rows(&self, rows: &[RemoteRow]) -> Result<(), StorageError> {
        write_blob(&self.path, rows)
    }
}

impl SessionStore for RemoteStore {
    fn load(&self) -> Result<Vec<Session>, StorageError> {
        let mut rows = self.load_rows()?;
        rows.sort_by_key(|row| row.start);
        Ok(rows.into_iter().map(RemoteRow::into_session).collect())
    }

    fn replace_all(&self, sessions: &[Session]) -> Result<(), StorageError> {
        let rows = sessions
            .iter()
            .map(|session| {
                let id = session.id.clone().unwrap_or_else(generate_id);
                RemoteRow::from_session(session, id)
            })
            .collect::<Vec<_>>();
        self.save_rows(&rows)
    }

    fn append(&self, mut session: Session) -> Result<Session, StorageError> {
        let mut rows = self.load_rows()?;
        let id = generate_id();
        rows.push(RemoteRow::from_session(&session, id.clone()));
        self.save_rows(&rows)?;
        session.id = Some(id);
        Ok(session)
    }

    fn delete(&self, session: &Session) -> Result<(), StorageError> {
        let id = session.id.as_deref().ok_or(StorageError::MissingId)?;
        let mut rows = self.load_rows()?;
        let position = rows
            .iter()
            .position(|row| row.id == id)
            .ok_or(StorageError::NotFound)?;
        rows.remove(position);
        self.save_rows(&rows)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.save_rows(&[])
    }
}

fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StorageError::Io(err)),
    };

    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&raw).map_err(StorageError::Decode)
}

fn write_blob<T: Serialize>(path: &Path, items: &[T]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let blob = serde_json::to_string_pretty(items).map_err(StorageError::Encode)?;
    fs::write(path, blob)?;
    Ok(())
}
