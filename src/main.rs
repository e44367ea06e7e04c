mod config;
mod domain;
mod import;
mod merge;
mod store;
mod timer;
mod ui;

use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{Backend, TrackerConfig, config_path, load_config, save_config};
use crate::domain::{
    Session, aggregate_by_date, classify, format_minutes, grand_total, normalize_date,
    total_for_date,
};
use crate::import::{import_records, read_import_file};
use crate::merge::WorkingSet;
use crate::store::{LocalStore, RemoteStore, SessionStore};
use crate::timer::{TimerController, clear_timer_state, load_timer_state, save_timer_state};

#[derive(Debug, Parser)]
#[command(name = "study-tracker", about = "Terminal-first study session tracker")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the configuration file and create the session store.
    Init,
    /// Interactive calendar dashboard (default).
    Dashboard,
    /// Start the study timer.
    Start {
        #[arg(long)]
        task: String,
    },
    /// End the running session and record it.
    Stop,
    /// Show the timer state.
    Status,
    /// Convert a spreadsheet-derived JSON file into sessions.
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Append the imported sessions to the active backend.
        #[arg(long)]
        persist: bool,
    },
    /// List sessions, optionally for a single day.
    Sessions {
        #[arg(long)]
        day: Option<String>,
    },
    /// Day total, intensity bucket, and overall total.
    Summary {
        #[arg(long)]
        day: Option<String>,
    },
    /// Delete a session by identity. Imported and remote records are
    /// protected.
    Delete {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        start: Option<String>,
    },
    /// Clear every backend and the running timer.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    setup_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = config_path(cli.config);
    let config = load_config(&config_path)?;
    let timer_path = config::timer_state_path(&config_path);

    let local = LocalStore::new(config.local_sessions_path());
    let remote = RemoteStore::new(config.remote_table_path());
    let active: &dyn SessionStore = match config.backend {
        Backend::Local => &local,
        Backend::Remote => &remote,
    };

    match cli.command.unwrap_or(Command::Dashboard) {
        Command::Init => {
            save_config(&config_path, &config)?;
            let sessions = local.load()?;
            local.replace_all(&sessions)?;
            println!("initialized study tracker at {}", config_path.display());
        }
        Command::Dashboard => {
            let mut working = assemble_working_set(&config, active)?;
            let mut timer = TimerController::from_state(load_timer_state(&timer_path)?);
            ui::run_dashboard(&mut working, &mut timer, active, &local, &remote, &timer_path)?;
        }
        Command::Start { task } => {
            let mut timer = TimerController::from_state(load_timer_state(&timer_path)?);
            if timer.start(&task, Local::now())? {
                save_timer_state(&timer_path, timer.state())?;
                println!("started studying: {task}");
            } else {
                println!("a session is already running; stop it first");
            }
        }
        Command::Stop => {
            let mut timer = TimerController::from_state(load_timer_state(&timer_path)?);
            let mut working = assemble_working_set(&config, active)?;
            match stop_and_record(&mut timer, &mut working, active, &timer_path, Local::now()) {
                Some((task, minutes, warnings)) => {
                    for warning in warnings {
                        eprintln!("warning: {warning}");
                    }
                    println!("studied {} for {} minutes", task, format_minutes(minutes));
                }
                None => println!("no session is running"),
            }
        }
        Command::Status => {
            let timer = TimerController::from_state(load_timer_state(&timer_path)?);
            match timer.running_since() {
                Some((task, started_at)) => {
                    let elapsed = domain::minutes_between(started_at, Local::now());
                    println!(
                        "studying {} since {} ({} minutes)",
                        task,
                        started_at.format("%H:%M"),
                        format_minutes(elapsed)
                    );
                }
                None => println!("idle"),
            }
        }
        Command::Import { file, persist } => {
            let records = read_import_file(&file)?;
            let outcome = import_records(&records);
            println!(
                "imported {} sessions, dropped {} invalid records",
                outcome.sessions.len(),
                outcome.dropped
            );
            if persist {
                for session in outcome.sessions {
                    active.append(session)?;
                }
                println!("saved to the {} backend", backend_name(config.backend));
            }
        }
        Command::Sessions { day } => {
            let working = assemble_working_set(&config, active)?;
            let day = day.as_deref().map(parse_day).transpose()?;
            print_sessions(&working, day);
        }
        Command::Summary { day } => {
            let working = assemble_working_set(&config, active)?;
            let day = match day.as_deref() {
                Some(raw) => parse_day(raw)?,
                None => Local::now().date_naive(),
            };
            let total = total_for_date(working.sessions(), day);
            println!(
                "{}: {} minutes ({:?})",
                day.format("%Y-%m-%d"),
                format_minutes(total),
                classify(total)
            );
            println!(
                "total study duration: {} minutes across {} days",
                format_minutes(grand_total(working.sessions())),
                aggregate_by_date(working.sessions()).len()
            );
        }
        Command::Delete { id, start } => {
            let mut working = assemble_working_set(&config, active)?;
            let target = find_session(&working, id.as_deref(), start.as_deref())?;
            working.request_delete(&target, active)?;
            println!("deleted session: {}", target.display_task());
        }
        Command::Reset { yes } => {
            if !yes {
                return Err("reset removes every session; pass --yes to confirm".into());
            }
            local.clear()?;
            remote.clear()?;
            clear_timer_state(&timer_path)?;
            println!("all study data cleared");
        }
    }

    Ok(())
}

/// Ends the running session, if any. The durable write and the
/// timer-state save are both best-effort: the session stays in the
/// working collection either way, and failures come back as warnings
/// instead of aborting.
fn stop_and_record(
    timer: &mut TimerController,
    working: &mut WorkingSet,
    active: &dyn SessionStore,
    timer_path: &Path,
    now: DateTime<Local>,
) -> Option<(String, f64, Vec<String>)> {
    let session = timer.end(now)?;
    let task = session.task.clone();
    let minutes = session.duration;

    let mut warnings = Vec::new();
    if let Err(err) = working.commit(session, active) {
        warnings.push(format!("session recorded in memory but not saved: {err}"));
    }
    if let Err(err) = save_timer_state(timer_path, timer.state()) {
        warnings.push(format!("timer state not saved: {err}"));
    }

    Some((task, minutes, warnings))
}

/// Merge order at load: imported legacy data first, then the active
/// backend. A missing or unreadable import file degrades to a warning.
fn assemble_working_set(
    config: &TrackerConfig,
    active: &dyn SessionStore,
) -> Result<WorkingSet, Box<dyn Error>> {
    let mut sources = Vec::new();

    if let Some(path) = &config.import_file {
        match read_import_file(path) {
            Ok(records) => {
                let outcome = import_records(&records);
                if outcome.dropped > 0 {
                    warn!(
                        dropped = outcome.dropped,
                        file = %path.display(),
                        "import file contained invalid records"
                    );
                }
                sources.push(outcome.sessions);
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping unreadable import file");
            }
        }
    }

    sources.push(active.load()?);
    Ok(WorkingSet::from_sources(sources))
}

fn find_session(
    working: &WorkingSet,
    id: Option<&str>,
    start: Option<&str>,
) -> Result<Session, Box<dyn Error>> {
    if let Some(id) = id {
        return working
            .sessions()
            .iter()
            .find(|session| session.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| format!("no session with id {id}").into());
    }

    if let Some(raw) = start {
        let start = parse_instant(raw)?;
        return working
            .sessions()
            .iter()
            .find(|session| session.start == start)
            .cloned()
            .ok_or_else(|| format!("no session starting at {raw}").into());
    }

    Err("pass --id or --start to identify the session".into())
}

fn print_sessions(working: &WorkingSet, day: Option<NaiveDate>) {
    let sessions: Vec<&Session> = match day {
        Some(day) => working.sessions_on(day),
        None => working.sessions().iter().collect(),
    };

    if sessions.is_empty() {
        println!("no sessions");
        return;
    }

    for session in sessions {
        println!(
            "{} | {} - {} | {:>8} min | {:<9} | {}{}",
            session.date_key().format("%Y-%m-%d"),
            session.start.format("%H:%M"),
            session.end.format("%H:%M"),
            format_minutes(session.duration),
            format!("{:?}", session.origin).to_lowercase(),
            session.display_task(),
            session
                .id
                .as_deref()
                .map(|id| format!(" [{id}]"))
                .unwrap_or_default()
        );
    }
}

fn parse_day(raw: &str) -> Result<NaiveDate, Box<dyn Error>> {
    normalize_date(raw).ok_or_else(|| format!("invalid date '{raw}', expected YYYY-MM-DD").into())
}

fn parse_instant(raw: &str) -> Result<DateTime<Local>, Box<dyn Error>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Local))
}

fn backend_name(backend: Backend) -> &'static str {
    match backend {
        Backend::Local => "local",
        Backend::Remote => "remote",
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn stop_commits_the_session_even_when_timer_state_save_fails() {
        let mut blocker = std::env::temp_dir();
        blocker.push(format!("study_stop_blocker_{}", std::process::id()));
        fs::write(&blocker, b"not a directory").expect("fixture write");
        // the parent of this path is a regular file, so the save fails
        let timer_path = blocker.join("timer_state.json");

        let mut store_path = std::env::temp_dir();
        store_path.push(format!("study_stop_sessions_{}.json", std::process::id()));
        let _ = fs::remove_file(&store_path);
        let store = LocalStore::new(store_path.clone());

        let mut timer = TimerController::new();
        timer
            .start("Write", Local.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap())
            .expect("start should work");
        let mut working = WorkingSet::default();

        let (task, minutes, warnings) = stop_and_record(
            &mut timer,
            &mut working,
            &store,
            &timer_path,
            Local.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap(),
        )
        .expect("a session should be produced");

        assert_eq!(task, "Write");
        assert_eq!(minutes, 90.0);
        assert!(!timer.is_running());
        // the durable write happened despite the failed state save
        assert_eq!(warnings.len(), 1);
        assert_eq!(working.sessions().len(), 1);
        assert_eq!(store.load().expect("load").len(), 1);

        let _ = fs::remove_file(blocker);
        let _ = fs::remove_file(store_path);
    }

    #[test]
    fn stop_is_a_no_op_when_idle() {
        let mut timer_path = std::env::temp_dir();
        timer_path.push(format!("study_stop_idle_{}.json", std::process::id()));
        let store = LocalStore::new(timer_path.with_extension("sessions.json"));
        let mut timer = TimerController::new();
        let mut working = WorkingSet::default();

        let outcome = stop_and_record(
            &mut timer,
            &mut working,
            &store,
            &timer_path,
            Local::now(),
        );
        assert!(outcome.is_none());
        assert!(working.sessions().is_empty());
    }
}
