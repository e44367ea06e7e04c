use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};

const ID_LEN: usize = 8;

/// Shown in place of an empty task label; never stored.
pub const NO_TASK_LABEL: &str = "No Task Available";

/// Provenance of a session record. Governs deletability: only `Local`
/// records, created by this instance's timer, may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Local,
    Imported,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Backend-assigned identity; present only once a remote backend has
    /// accepted the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    /// Minutes, kept at two-decimal precision once persisted.
    pub duration: f64,
    #[serde(default)]
    pub task: String,
    /// Canonical calendar-day key. Absent in legacy blobs, in which case
    /// the day is derived from `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub origin: Origin,
}

impl Session {
    pub fn new_local(task: String, start: DateTime<Local>, end: DateTime<Local>) -> Self {
        Self {
            id: None,
            duration: minutes_between(start, end),
            date: Some(start.date_naive()),
            start,
            end,
            task,
            origin: Origin::Local,
        }
    }

    pub fn date_key(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| self.start.date_naive())
    }

    pub fn display_task(&self) -> &str {
        if self.task.trim().is_empty() {
            NO_TASK_LABEL
        } else {
            &self.task
        }
    }

    /// Identity comparison used for deletion: backend id when both sides
    /// carry one, otherwise the natural key.
    pub fn same_record(&self, other: &Session) -> bool {
        match (&self.id, &other.id) {
            (Some(left), Some(right)) => left == right,
            _ => {
                self.start == other.start
                    && self.end == other.end
                    && self.task == other.task
                    && self.origin == other.origin
            }
        }
    }
}

/// Heat-map bucket for a day's total study time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    None,
    Low,
    Medium,
    High,
}

/// Boundary semantics are deliberate: five hours is inclusive, three
/// hours is exclusive.
pub fn classify(total_minutes: f64) -> Intensity {
    if total_minutes / 60.0 >= 5.0 {
        Intensity::High
    } else if total_minutes / 60.0 > 3.0 {
        Intensity::Medium
    } else if total_minutes > 0.0 {
        Intensity::Low
    } else {
        Intensity::None
    }
}

/// Reduces the working collection to cumulative minutes per calendar day.
pub fn aggregate_by_date(sessions: &[Session]) -> BTreeMap<NaiveDate, f64> {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for session in sessions {
        *totals.entry(session.date_key()).or_insert(0.0) += session.duration;
    }
    totals
}

pub fn total_for_date(sessions: &[Session], date: NaiveDate) -> f64 {
    sessions
        .iter()
        .filter(|session| session.date_key() == date)
        .map(|session| session.duration)
        .sum()
}

pub fn grand_total(sessions: &[Session]) -> f64 {
    sessions.iter().map(|session| session.duration).sum()
}

/// Accepts `YYYY-MM-DD` or `YYYY/MM/DD`; already-canonical input passes
/// through unchanged.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .ok()
}

pub fn minutes_between(start: DateTime<Local>, end: DateTime<Local>) -> f64 {
    round2((end - start).num_milliseconds() as f64 / 60_000.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn format_minutes(minutes: f64) -> String {
    format!("{minutes:.2}")
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn duration_is_minutes_at_two_decimals() {
        let start = Local.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let end = Local.with_ymd_and_hms(2024, 3, 5, 10, 30, 10).unwrap();
        assert_eq!(minutes_between(start, end), 90.17);
    }

    #[test]
    fn local_session_derives_date_from_start() {
        let session = Session::new_local(
            "Write".to_string(),
            local(2024, 3, 5, 23, 0),
            local(2024, 3, 6, 0, 30),
        );
        assert_eq!(
            session.date_key(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert_eq!(session.duration, 90.0);
        assert_eq!(session.origin, Origin::Local);
        assert!(session.id.is_none());
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0.0), Intensity::None);
        assert_eq!(classify(90.0), Intensity::Low);
        // three-hour boundary is exclusive
        assert_eq!(classify(180.0), Intensity::Low);
        assert_eq!(classify(181.0), Intensity::Medium);
        assert_eq!(classify(240.0), Intensity::Medium);
        assert_eq!(classify(299.0), Intensity::Medium);
        // five-hour boundary is inclusive
        assert_eq!(classify(300.0), Intensity::High);
    }

    #[test]
    fn normalize_date_is_idempotent_on_canonical_input() {
        assert_eq!(
            normalize_date("2024-03-05"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(
            normalize_date("2024/03/05"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(normalize_date("not-a-date"), None);
    }

    #[test]
    fn aggregate_falls_back_to_start_day_when_date_is_absent() {
        let mut session = Session::new_local(
            "Read".to_string(),
            local(2024, 3, 5, 9, 0),
            local(2024, 3, 5, 10, 0),
        );
        session.date = None;

        let totals = aggregate_by_date(&[session]);
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(totals.get(&day), Some(&60.0));
    }

    #[test]
    fn totals_accumulate_per_day() {
        let sessions = vec![
            Session::new_local(
                "Read".to_string(),
                local(2024, 3, 5, 9, 0),
                local(2024, 3, 5, 10, 30),
            ),
            Session::new_local(
                "Write".to_string(),
                local(2024, 3, 5, 14, 0),
                local(2024, 3, 5, 15, 30),
            ),
            Session::new_local(
                "Read".to_string(),
                local(2024, 3, 6, 9, 0),
                local(2024, 3, 6, 9, 45),
            ),
        ];

        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(total_for_date(&sessions, day), 180.0);
        assert_eq!(classify(total_for_date(&sessions, day)), Intensity::Low);
        assert_eq!(
            total_for_date(&sessions, NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()),
            0.0
        );
        assert_eq!(grand_total(&sessions), 225.0);
    }

    #[test]
    fn empty_task_gets_display_fallback() {
        let mut session = Session::new_local(
            String::new(),
            local(2024, 3, 5, 9, 0),
            local(2024, 3, 5, 10, 0),
        );
        assert_eq!(session.display_task(), NO_TASK_LABEL);
        session.task = "Read".to_string();
        assert_eq!(session.display_task(), "Read");
    }
}
