use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::domain::{Origin, Session};
use crate::store::{SessionStore, StorageError};

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("only sessions recorded on this device can be deleted")]
    Permission,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Concatenates session sources in the order given. Deliberately no
/// deduplication: sources are mutually exclusive backends in practice.
pub fn merge(sources: impl IntoIterator<Item = Vec<Session>>) -> Vec<Session> {
    sources.into_iter().flatten().collect()
}

/// The in-memory merged collection driving aggregation and display.
/// Source of truth for the current process; durable writes follow it.
#[derive(Debug, Default)]
pub struct WorkingSet {
    sessions: Vec<Session>,
}

impl WorkingSet {
    pub fn from_sources(sources: impl IntoIterator<Item = Vec<Session>>) -> Self {
        Self {
            sessions: merge(sources),
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn sessions_on(&self, date: NaiveDate) -> Vec<&Session> {
        self.sessions
            .iter()
            .filter(|session| session.date_key() == date)
            .collect()
    }

    /// Appends a finished session and requests a durable write. The
    /// append is optimistic: a failed write leaves the session visible
    /// in memory and surfaces the error to the caller.
    pub fn commit(
        &mut self,
        session: Session,
        store: &dyn SessionStore,
    ) -> Result<(), StorageError> {
        self.sessions.push(session.clone());
        match store.append(session) {
            Ok(stored) => {
                if let Some(last) = self.sessions.last_mut() {
                    *last = stored;
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "durable write failed; session kept in memory");
                Err(err)
            }
        }
    }

    /// Deletes `target` if its origin permits. Non-local records are
    /// denied before the store is touched; a store rejection leaves the
    /// working collection unchanged.
    pub fn request_delete(
        &mut self,
        target: &Session,
        store: &dyn SessionStore,
    ) -> Result<(), DeleteError> {
        if target.origin != Origin::Local {
            return Err(DeleteError::Permission);
        }

        store.delete(target)?;
        if let Some(position) = self
            .sessions
            .iter()
            .position(|session| session.same_record(target))
        {
            self.sessions.remove(position);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::{DateTime, Local, TimeZone};

    use crate::domain::{aggregate_by_date, classify, total_for_date, Intensity};
    use crate::import::{RawRecord, import_records};
    use crate::store::LocalStore;
    use crate::timer::TimerController;

    use super::*;

    fn local(d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, d, h, mi, 0).unwrap()
    }

    fn sample(task: &str, origin: Origin) -> Session {
        let mut session =
            Session::new_local(task.to_string(), local(5, 9, 0), local(5, 10, 0));
        session.origin = origin;
        session
    }

    fn temp_store(name: &str) -> (LocalStore, PathBuf) {
        let mut path = std::env::temp_dir();
        path.push(format!("{}_{}", name, std::process::id()));
        let _ = fs::remove_file(&path);
        (LocalStore::new(path.clone()), path)
    }

    struct FailingStore;

    impl SessionStore for FailingStore {
        fn load(&self) -> Result<Vec<Session>, StorageError> {
            Err(StorageError::Io(std::io::Error::other("backend down")))
        }
        fn replace_all(&self, _sessions: &[Session]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("backend down")))
        }
        fn append(&self, _session: Session) -> Result<Session, StorageError> {
            Err(StorageError::Io(std::io::Error::other("backend down")))
        }
        fn delete(&self, _session: &Session) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("backend down")))
        }
        fn clear(&self) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("backend down")))
        }
    }

    #[test]
    fn merge_concatenates_in_order_without_dedup() {
        let duplicate = sample("Read", Origin::Imported);
        let merged = merge([
            vec![duplicate.clone()],
            vec![duplicate.clone(), sample("Write", Origin::Local)],
        ]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].task, "Read");
        assert_eq!(merged[1].task, "Read");
        assert_eq!(merged[2].task, "Write");
    }

    #[test]
    fn non_local_sessions_are_delete_protected() {
        let (store, path) = temp_store("study_merge_protected.json");
        let imported = sample("Read", Origin::Imported);
        let remote = sample("Fetched", Origin::Remote);
        let mut working = WorkingSet::from_sources([vec![imported.clone(), remote.clone()]]);

        assert!(matches!(
            working.request_delete(&imported, &store),
            Err(DeleteError::Permission)
        ));
        assert!(matches!(
            working.request_delete(&remote, &store),
            Err(DeleteError::Permission)
        ));
        assert_eq!(working.sessions().len(), 2);
        assert!(store.load().expect("load").is_empty());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn local_delete_removes_from_memory_and_store() {
        let (store, path) = temp_store("study_merge_delete.json");
        let mut working = WorkingSet::default();
        working
            .commit(sample("Write", Origin::Local), &store)
            .expect("commit should work");

        let target = working.sessions()[0].clone();
        working
            .request_delete(&target, &store)
            .expect("delete should work");
        assert!(working.sessions().is_empty());
        assert!(store.load().expect("load").is_empty());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn rejected_delete_rolls_nothing_back() {
        let local_session = sample("Write", Origin::Local);
        let mut working = WorkingSet::from_sources([vec![local_session.clone()]]);

        assert!(matches!(
            working.request_delete(&local_session, &FailingStore),
            Err(DeleteError::Storage(_))
        ));
        assert_eq!(working.sessions().len(), 1);
    }

    #[test]
    fn failed_durable_write_keeps_the_session_visible() {
        let mut working = WorkingSet::default();
        let result = working.commit(sample("Write", Origin::Local), &FailingStore);

        assert!(result.is_err());
        assert_eq!(working.sessions().len(), 1);
    }

    #[test]
    fn import_then_track_end_to_end() {
        let (store, path) = temp_store("study_merge_scenario.json");
        let outcome = import_records(&[
            RawRecord {
                date: "2024/03/05".to_string(),
                task: "Read".to_string(),
                start: "09:00 AM".to_string(),
                end: "10:30 AM".to_string(),
                duration_minutes: None,
            },
            RawRecord {
                date: "not-a-date".to_string(),
                task: "Lost".to_string(),
                start: "09:00 AM".to_string(),
                end: "10:00 AM".to_string(),
                duration_minutes: None,
            },
        ]);
        assert_eq!(outcome.dropped, 1);

        let mut working =
            WorkingSet::from_sources([outcome.sessions, store.load().expect("load")]);
        let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(aggregate_by_date(working.sessions()).get(&day), Some(&90.0));

        let mut timer = TimerController::new();
        timer.start("Write", local(5, 14, 0)).expect("start");
        let session = timer.end(local(5, 15, 30)).expect("session");
        working.commit(session, &store).expect("commit");

        let total = total_for_date(working.sessions(), day);
        assert_eq!(total, 180.0);
        // exactly three hours stays in the Low bucket
        assert_eq!(classify(total), Intensity::Low);
        let _ = fs::remove_file(path);
    }
}
