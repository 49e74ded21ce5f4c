use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use friendex_core::{local_now, resolve_timestamp, validate_name, FriendexError};
use friendex_store_sqlite::SqliteStore;
use time::PrimitiveDateTime;
use tracing_subscriber::EnvFilter;

mod report;

use report::Report;

const TIME_PROMPT: &str =
    "Enter the last spoken date and time (YYYY-MM-DD HH:MM:SS AM/PM or 'now' for current time): ";
const TOPIC_PROMPT: &str = "Enter the topic of discussion: ";

#[derive(Debug, Parser)]
#[command(name = "friendex", version)]
#[command(about = "Friend Tracker CLI")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Add a friend
    #[arg(long, value_name = "NAME")]
    add: Option<String>,

    /// Read list of all friends and last time spoken to
    #[arg(long, default_value_t = false)]
    read: bool,

    /// Update the last time spoken to a friend
    #[arg(long, value_name = "NAME")]
    update: Option<String>,

    /// Delete a friend from the list
    #[arg(long, value_name = "NAME")]
    delete: Option<String>,

    /// Check the last time spoken to a friend and days since then
    #[arg(long, value_name = "NAME")]
    check: Option<String>,

    /// Search for friends based on days since last spoken
    #[arg(long, value_name = "DAYS", allow_negative_numbers = true)]
    days_since: Option<i64>,

    /// Search for friends based on topic of discussion
    #[arg(long, value_name = "TOPIC")]
    topic: Option<String>,

    /// SQLite database file
    #[arg(long, value_name = "DBFILE", env = "FRIENDEX_DB", default_value = "friendex.db")]
    dbfile: PathBuf,

    /// Last spoken time for --add/--update instead of prompting ('now' allowed)
    #[arg(long, value_name = "TIME")]
    time: Option<String>,

    /// Topic discussed for --add/--update instead of prompting
    #[arg(long, value_name = "TEXT")]
    note: Option<String>,

    /// Emit a single JSON document instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let mut report = Report::new(cli.json);
    let mut code = 0;
    if let Err(err) = run(&cli, &mut report) {
        eprintln!("error: {err:#}");
        let (kind, exit) = error_kind(&err);
        report.failed(kind, &format!("{err:#}"));
        code = exit;
    }
    // Completed actions are still reported when a later one fails.
    if let Err(err) = report.finish() {
        eprintln!("error: {err:#}");
        code = code.max(1);
    }
    ExitCode::from(code)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FRIENDEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("warning: logging disabled: {err}");
    }
}

/// Stable error kind name and process exit code for a failed run.
fn error_kind(err: &anyhow::Error) -> (&'static str, u8) {
    match err.downcast_ref::<FriendexError>() {
        Some(FriendexError::InvalidTime(_)) => ("invalid_time", 3),
        Some(FriendexError::FriendNotFound(_)) => ("friend_not_found", 4),
        Some(FriendexError::DuplicateFriend(_)) => ("duplicate_friend", 5),
        Some(FriendexError::Validation(_)) => ("validation", 6),
        None => ("storage", 1),
    }
}

fn run(cli: &Cli, report: &mut Report) -> Result<()> {
    let mut store = SqliteStore::open(&cli.dbfile)?;
    store.initialize()?;
    tracing::debug!("using database {}", cli.dbfile.display());

    if let Some(name) = cli.add.as_deref() {
        run_add(cli, &mut store, report, name)?;
    }
    if cli.read {
        report.listed(&store.list_friends(local_now())?)?;
    }
    if let Some(name) = cli.update.as_deref() {
        run_update(cli, &mut store, report, name)?;
    }
    if let Some(name) = cli.delete.as_deref() {
        if !store.delete_friend(name)? {
            return Err(FriendexError::FriendNotFound(name.to_string()).into());
        }
        report.deleted(name);
    }
    if let Some(name) = cli.check.as_deref() {
        let summary = store
            .check_friend(name, local_now())?
            .ok_or_else(|| FriendexError::FriendNotFound(name.to_string()))?;
        report.checked(&summary)?;
    }
    if let Some(min_days) = cli.days_since {
        report.stale(min_days, &store.search_by_recency(min_days, local_now())?)?;
    }
    if let Some(query) = cli.topic.as_deref() {
        report.topic_matches(query, &store.search_by_topic(query)?)?;
    }

    Ok(())
}

fn run_add(cli: &Cli, store: &mut SqliteStore, report: &mut Report, name: &str) -> Result<()> {
    validate_name(name)?;
    let last_spoken = resolve_time(cli.time.as_deref())?;
    let topic = resolve_topic(cli.note.as_deref())?;

    store.add_friend(name, last_spoken, Some(&topic))?;
    report.added(name, last_spoken, non_empty(&topic));
    Ok(())
}

fn run_update(cli: &Cli, store: &mut SqliteStore, report: &mut Report, name: &str) -> Result<()> {
    // Fail before prompting when there is nobody to update.
    if store.check_friend(name, local_now())?.is_none() {
        return Err(FriendexError::FriendNotFound(name.to_string()).into());
    }
    let last_spoken = resolve_time(cli.time.as_deref())?;
    let topic = resolve_topic(cli.note.as_deref())?;

    let applied = store.update_last_spoken(name, last_spoken, Some(&topic))?;
    report.updated(name, applied, non_empty(&topic));
    Ok(())
}

fn resolve_time(given: Option<&str>) -> Result<PrimitiveDateTime> {
    let raw = match given {
        Some(value) => value.to_string(),
        None => prompt(TIME_PROMPT)?,
    };
    Ok(resolve_timestamp(&raw, local_now())?)
}

fn resolve_topic(given: Option<&str>) -> Result<String> {
    match given {
        Some(value) => Ok(value.to_string()),
        None => prompt(TOPIC_PROMPT),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Ask on stderr and read one line from stdin; end of input reads as an empty answer.
fn prompt(label: &str) -> Result<String> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{label}").context("failed to write prompt")?;
    stderr.flush().context("failed to flush prompt")?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
