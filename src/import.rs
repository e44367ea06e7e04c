use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::{Origin, Session, minutes_between, normalize_date, round2};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse import file: {0}")]
    Decode(#[source] serde_json::Error),
}

/// One record of the spreadsheet-derived import file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "Task", default)]
    pub task: String,
    #[serde(rename = "Start", default)]
    pub start: String,
    #[serde(rename = "End", default)]
    pub end: String,
    #[serde(rename = "Duration_minutes", default)]
    pub duration_minutes: Option<NumberOrText>,
}

/// The spreadsheet converter emits the duration column either as a
/// number or as a formatted string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    fn as_minutes(&self) -> Option<f64> {
        match self {
            NumberOrText::Number(value) => Some(*value),
            NumberOrText::Text(raw) => raw.trim().parse::<f64>().ok(),
        }
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub sessions: Vec<Session>,
    pub dropped: usize,
}

pub fn read_import_file(path: &Path) -> Result<Vec<RawRecord>, ImportError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(ImportError::Decode)
}

/// Converts raw records into `imported`-origin sessions. Records that
/// fail date or time parsing are dropped with a warning; the batch is
/// never aborted, and input order is preserved for the records kept.
pub fn import_records(records: &[RawRecord]) -> ImportOutcome {
    let mut sessions = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for (index, record) in records.iter().enumerate() {
        match convert_record(record) {
            Some(session) => sessions.push(session),
            None => {
                dropped += 1;
                warn!(
                    index,
                    date = %record.date,
                    task = %record.task,
                    "dropping import record that failed normalization"
                );
            }
        }
    }

    ImportOutcome { sessions, dropped }
}

fn convert_record(record: &RawRecord) -> Option<Session> {
    let date = normalize_date(&record.date)?;
    let start_time = parse_clock_time(&record.start)?;
    let end_time = parse_clock_time(&record.end)?;

    let start_naive = date.and_time(start_time);
    let mut end_naive = date.and_time(end_time);
    // An end clock time earlier than the start means the session crossed
    // midnight; the end lands on the following day.
    if end_naive < start_naive {
        end_naive = end_naive + Duration::days(1);
    }

    let start = resolve_local(start_naive)?;
    let end = resolve_local(end_naive)?;

    // An explicit duration from the source is authoritative, but it must
    // still be a non-negative real number of minutes.
    let duration = match record
        .duration_minutes
        .as_ref()
        .and_then(NumberOrText::as_minutes)
    {
        Some(minutes) if minutes.is_finite() && minutes >= 0.0 => round2(minutes),
        Some(_) => return None,
        None => minutes_between(start, end),
    };

    Some(Session {
        id: None,
        start,
        end,
        duration,
        task: record.task.trim().to_string(),
        date: Some(date),
        origin: Origin::Imported,
    })
}

fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .ok()
}

fn resolve_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(timestamp) => Some(timestamp),
        LocalResult::Ambiguous(first, second) => Some(first.min(second)),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn record(date: &str, task: &str, start: &str, end: &str) -> RawRecord {
        RawRecord {
            date: date.to_string(),
            task: task.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            duration_minutes: None,
        }
    }

    #[test]
    fn converts_a_plain_record() {
        let outcome = import_records(&[record("2024/03/05", "Read", "09:00 AM", "10:30 AM")]);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.sessions.len(), 1);

        let session = &outcome.sessions[0];
        assert_eq!(session.duration, 90.0);
        assert_eq!(session.origin, Origin::Imported);
        assert_eq!(session.date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(session.task, "Read");
        assert!(session.id.is_none());
    }

    #[test]
    fn overnight_sessions_wrap_to_the_next_day() {
        let outcome = import_records(&[record("2024-03-05", "Read", "11:30 PM", "12:15 AM")]);
        let session = &outcome.sessions[0];

        assert_eq!(session.duration, 45.0);
        assert_eq!(
            session.start.date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert_eq!(
            session.end.date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
        );
        assert_eq!(session.date, NaiveDate::from_ymd_opt(2024, 3, 5));
    }

    #[test]
    fn explicit_duration_is_authoritative() {
        let mut with_number = record("2024-03-05", "Read", "09:00 AM", "10:30 AM");
        with_number.duration_minutes = Some(NumberOrText::Number(120.0));
        let mut with_text = record("2024-03-05", "Read", "09:00 AM", "10:30 AM");
        with_text.duration_minutes = Some(NumberOrText::Text("75.5".to_string()));

        let outcome = import_records(&[with_number, with_text]);
        assert_eq!(outcome.sessions[0].duration, 120.0);
        assert_eq!(outcome.sessions[1].duration, 75.5);
    }

    #[test]
    fn unparseable_explicit_duration_falls_back_to_the_instants() {
        let mut bad_text = record("2024-03-05", "Read", "09:00 AM", "10:30 AM");
        bad_text.duration_minutes = Some(NumberOrText::Text("No Time".to_string()));

        let outcome = import_records(&[bad_text]);
        assert_eq!(outcome.sessions[0].duration, 90.0);
    }

    #[test]
    fn negative_or_non_finite_explicit_durations_drop_the_record() {
        let mut negative = record("2024-03-05", "Backwards", "09:00 AM", "10:30 AM");
        negative.duration_minutes = Some(NumberOrText::Number(-30.0));
        let mut not_a_number = record("2024-03-05", "NaN", "09:00 AM", "10:30 AM");
        not_a_number.duration_minutes = Some(NumberOrText::Text("NaN".to_string()));
        let kept = record("2024-03-05", "Kept", "09:00 AM", "10:30 AM");

        let outcome = import_records(&[negative, not_a_number, kept]);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.sessions.len(), 1);
        assert_eq!(outcome.sessions[0].task, "Kept");
        assert!(outcome.sessions.iter().all(|session| session.duration >= 0.0));
    }

    #[test]
    fn invalid_records_are_dropped_without_aborting_the_batch() {
        let outcome = import_records(&[
            record("not-a-date", "Lost", "09:00 AM", "10:00 AM"),
            record("2024-03-05", "Read", "No Start Time", "10:00 AM"),
            record("2024-03-05", "Kept", "09:00 AM", "10:00 AM"),
            record("2024-03-06", "Also kept", "01:00 PM", "02:30 PM"),
        ]);

        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.sessions.len(), 2);
        // order-preserving relative to input
        assert_eq!(outcome.sessions[0].task, "Kept");
        assert_eq!(outcome.sessions[1].task, "Also kept");
    }

    #[test]
    fn legacy_records_may_have_empty_tasks() {
        let outcome = import_records(&[record("2024-03-05", "", "09:00 AM", "10:00 AM")]);
        let session = &outcome.sessions[0];
        assert_eq!(session.task, "");
        assert_eq!(session.display_task(), crate::domain::NO_TASK_LABEL);
    }
}
