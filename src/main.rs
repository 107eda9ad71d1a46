use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use roll_caller::config::{Locale, Settings};
use roll_caller::db::Storage;
use roll_caller::error::ImportError;
use roll_caller::export::{self, format_timestamp, DateRange};
use roll_caller::models::{AttendanceRecord, AttendanceStatus, Student, StudentStatus};
use roll_caller::notify::{ConsoleNotifier, Notifier};
use roll_caller::roster::{self, ImportBatch, RosterSource};
use roll_caller::session::{Session, SessionEvent, SessionOptions};

const PREVIEW_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "roll-caller")]
#[command(about = "Weighted random roll call with attendance records", long_about = None)]
#[command(version)]
struct Cli {
    /// Database file (overrides the config file)
    #[arg(long, global = true, env = "ROLL_CALLER_DB")]
    db: Option<PathBuf>,

    /// Settings file in TOML format
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,
    /// Import students from a CSV or plain-text roster
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import the bundled default roster
    LoadDefault,
    /// List the roster
    Students {
        #[arg(long)]
        json: bool,
    },
    /// Draw a student and record their attendance
    Draw {
        /// Outcome to record; asked interactively when omitted
        #[arg(long, value_enum)]
        status: Option<AttendanceStatus>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Reset a student's weight to 1
    ResetWeight { id: Uuid },
    /// Delete a student (their records are kept)
    DeleteStudent { id: Uuid },
    /// Delete every student
    ClearStudents,
    /// Delete every attendance record
    ClearRecords,
    /// Show recent records, or those between two dates
    Records {
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        /// How many recent records to show; not combinable with a date range
        #[arg(long, conflicts_with = "from")]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Export records to CSV
    Export {
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "roll_caller=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref(), cli.db).context("failed to load settings")?;
    debug!("Using database {}", settings.database_path.display());

    let storage = Storage::init(&settings.database_path)
        .await
        .context("failed to open the roll-call database")?;
    let notifier = ConsoleNotifier::new(cli.yes);

    let ok = match cli.command {
        Commands::Init => {
            println!("Database ready at {}.", settings.database_path.display());
            true
        }
        Commands::Import { csv } => match ImportBatch::from_file(&csv).await {
            Ok(batch) => confirm_import(&storage, &notifier, batch).await,
            Err(ImportError::Empty) => {
                notifier.warning("No valid student names found; check the file format");
                false
            }
            Err(err) => {
                notifier.error(&err.to_string());
                false
            }
        },
        Commands::LoadDefault => {
            let (batch, source) = roster::load_default_roster(&settings.roster_sources).await;
            match source {
                RosterSource::File(path) => {
                    notifier.info(&format!("Default roster from {}", path.display()))
                }
                RosterSource::Fallback => notifier.info("Using the built-in sample roster"),
            }
            confirm_import(&storage, &notifier, batch).await
        }
        Commands::Students { json } => {
            let students = storage.get_all_students().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else {
                print_students(&students, settings.locale);
            }
            true
        }
        Commands::Draw { status, note } => {
            draw(&storage, &notifier, &settings, status, note).await?
        }
        Commands::ResetWeight { id } => {
            let session = Session::new(&storage, &notifier, SessionOptions::from(&settings));
            matches!(session.reset_weight(id).await, Ok(true))
        }
        Commands::DeleteStudent { id } => {
            let session = Session::new(&storage, &notifier, SessionOptions::from(&settings));
            matches!(session.delete_student(id).await, Ok(true))
        }
        Commands::ClearStudents => {
            let session = Session::new(&storage, &notifier, SessionOptions::from(&settings));
            matches!(session.clear_students().await, Ok(true))
        }
        Commands::ClearRecords => {
            let session = Session::new(&storage, &notifier, SessionOptions::from(&settings));
            matches!(session.clear_records().await, Ok(true))
        }
        Commands::Records {
            from,
            to,
            limit,
            json,
        } => {
            let records = match date_range(from, to)? {
                Some(range) => {
                    storage
                        .get_records_by_date_range(range.start, range.end)
                        .await?
                }
                None => {
                    storage
                        .get_recent_records(limit.unwrap_or(settings.recent_limit))
                        .await?
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_records(&records, settings.locale);
            }
            true
        }
        Commands::Export { from, to, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| settings.export_dir.clone());
            export::run_export(
                &storage,
                &notifier,
                date_range(from, to)?,
                settings.locale,
                &out_dir,
            )
            .await
            .is_some()
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn confirm_import(storage: &Storage, notifier: &dyn Notifier, batch: ImportBatch) -> bool {
    let (names, more) = batch.preview(PREVIEW_LIMIT);
    println!("Found {} students:", batch.len());
    for name in names {
        println!("  {name}");
    }
    if more > 0 {
        println!("  ... and {more} more");
    }

    if !notifier.confirm(&format!("Import {} students?", batch.len())) {
        notifier.info("Import cancelled");
        return false;
    }

    let count = batch.len();
    match batch.commit(storage).await {
        Ok(_) => {
            notifier.success(&format!("Imported {count} students"));
            true
        }
        Err(err) => {
            notifier.error(&format!("Import failed, please retry: {err}"));
            false
        }
    }
}

async fn draw(
    storage: &Storage,
    notifier: &dyn Notifier,
    settings: &Settings,
    status: Option<AttendanceStatus>,
    note: Option<String>,
) -> anyhow::Result<bool> {
    let mut session = Session::new(storage, notifier, SessionOptions::from(settings));
    let mut events = session.subscribe();

    println!("Drawing...");
    let drawn = session.draw().await;
    render_events(&mut events, settings.locale);
    if !matches!(drawn, Ok(Some(_))) {
        return Ok(false);
    }

    let status = match status {
        Some(status) => status,
        None => prompt_status()?,
    };

    let saved = session.confirm(status, note).await;
    render_events(&mut events, settings.locale);
    Ok(saved.is_ok())
}

fn render_events(events: &mut broadcast::Receiver<SessionEvent>, locale: Locale) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Revealed(student) => {
                println!("Selected: {} (weight {})", student.name, student.weight)
            }
            SessionEvent::RosterRefreshed(students) => {
                println!("Roster: {} students", students.len())
            }
            SessionEvent::RecordsRefreshed(records) => {
                print_records(&records[..records.len().min(5)], locale)
            }
            SessionEvent::DrawStarted | SessionEvent::Recorded(_) => {}
        }
    }
}

fn prompt_status() -> anyhow::Result<AttendanceStatus> {
    print!("Attendance [p]resent / [l]ate / [a]bsent (default present): ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read attendance status")?;

    Ok(match answer.trim().to_lowercase().chars().next() {
        Some('l') => AttendanceStatus::Late,
        Some('a') => AttendanceStatus::Absent,
        _ => AttendanceStatus::Present,
    })
}

fn date_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> anyhow::Result<Option<DateRange>> {
    match (from, to) {
        (Some(from), Some(to)) => DateRange::from_local_dates(from, to)
            .map(Some)
            .context("dates do not exist in the local time zone"),
        _ => Ok(None),
    }
}

fn print_students(students: &[Student], locale: Locale) {
    if students.is_empty() {
        println!("No students yet. Import a roster first.");
        return;
    }

    println!("Students ({}):", students.len());
    for student in students {
        println!(
            "- {} | weight {} | {} | {}",
            student.name,
            student.weight,
            student.status.label(locale),
            student.id
        );
    }
}

fn print_records(records: &[AttendanceRecord], locale: Locale) {
    if records.is_empty() {
        println!("No records.");
        return;
    }

    for record in records {
        println!(
            "- {} | {} | {} | {}",
            format_timestamp(record.timestamp),
            record.student_name,
            StudentStatus::from(record.status).label(locale),
            record.note.as_deref().unwrap_or("-")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_conflicts_with_a_date_range() {
        let ranged = Cli::try_parse_from([
            "roll-caller",
            "records",
            "--from",
            "2026-01-01",
            "--to",
            "2026-01-31",
            "--limit",
            "5",
        ]);
        assert!(ranged.is_err());

        let cli = Cli::try_parse_from(["roll-caller", "records", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Records { limit: Some(5), from: None, .. }
        ));
    }

    #[test]
    fn half_open_ranges_are_rejected() {
        assert!(Cli::try_parse_from(["roll-caller", "export", "--from", "2026-01-01"]).is_err());
    }
}
