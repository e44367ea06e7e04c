use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Session;
use crate::store::StorageError;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("a task label is required to start a session")]
    EmptyTask,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimerState {
    #[default]
    Idle,
    Running {
        task: String,
        started_at: DateTime<Local>,
    },
}

/// The session-producing state machine. Owns the `Idle`/`Running`
/// transition exclusively; duplicate triggers are absorbed as no-ops.
#[derive(Debug, Default)]
pub struct TimerController {
    state: TimerState,
}

impl TimerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: TimerState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    /// Starts a session for `task` at `now`. Returns `Ok(false)` when a
    /// session is already running (duplicate trigger, nothing changes).
    pub fn start(&mut self, task: &str, now: DateTime<Local>) -> Result<bool, ValidationError> {
        if self.is_running() {
            return Ok(false);
        }

        let task = task.trim();
        if task.is_empty() {
            return Err(ValidationError::EmptyTask);
        }

        self.state = TimerState::Running {
            task: task.to_string(),
            started_at: now,
        };
        Ok(true)
    }

    /// Ends the running session at `now` and returns the produced record.
    /// Returns `None` when no session is running.
    pub fn end(&mut self, now: DateTime<Local>) -> Option<Session> {
        let TimerState::Running { task, started_at } =
            std::mem::replace(&mut self.state, TimerState::Idle)
        else {
            return None;
        };

        Some(Session::new_local(task, started_at, now))
    }

    pub fn running_since(&self) -> Option<(&str, DateTime<Local>)> {
        match &self.state {
            TimerState::Running { task, started_at } => Some((task.as_str(), *started_at)),
            TimerState::Idle => None,
        }
    }
}

/// The running timer outlives a single CLI invocation, so its state is
/// kept in a small JSON file in the state directory.
pub fn load_timer_state(path: &Path) -> Result<TimerState, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(TimerState::Idle),
        Err(err) => return Err(StorageError::Io(err)),
    };

    if raw.trim().is_empty() {
        return Ok(TimerState::Idle);
    }

    serde_json::from_str(&raw).map_err(StorageError::Decode)
}

pub fn save_timer_state(path: &Path, state: &TimerState) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }
    }

    let blob = serde_json::to_string(state).map_err(StorageError::Encode)?;
    fs::write(path, blob).map_err(StorageError::Io)
}

pub fn clear_timer_state(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::Io(err)),
    }
}
