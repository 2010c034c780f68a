use std::fmt;
use std::sync::Arc;

use lesson_core::model::LessonId;
use services::{
    ChannelPlaybackSource, Clock, HttpProgressStore, LessonPlayer, PlaybackEvent,
    ProgressApiConfig, TrackerError, WatchTracker,
};
use storage::repository::Storage;
use tracing::info;

mod logging;
mod trace;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidLessonId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidLessonId { raw } => write!(f, "invalid --lesson value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- replay   --lesson <id> --trace <file> [--db <sqlite_url>] [--api <url>]");
    eprintln!("  cargo run -p app -- complete --lesson <id> [--api <url>]");
    eprintln!();
    eprintln!("Trace files hold one `current_time,duration` pair per line.");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:dev.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_API_BASE_URL, LEARN_API_TOKEN, LEARN_API_TIMEOUT_SECS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Replay,
    Complete,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "replay" => Some(Self::Replay),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    db_url: String,
    api_url: Option<String>,
    lesson_id: LessonId,
    trace_path: Option<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://dev.sqlite3".into(), normalize_sqlite_url);
        let mut api_url = None;
        let mut lesson_id = None;
        let mut trace_path = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--api" => api_url = Some(require_value(args, "--api")?),
                "--lesson" => {
                    let value = require_value(args, "--lesson")?;
                    let parsed = value
                        .parse::<LessonId>()
                        .map_err(|_| ArgsError::InvalidLessonId { raw: value.clone() })?;
                    lesson_id = Some(parsed);
                }
                "--trace" => trace_path = Some(require_value(args, "--trace")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            api_url,
            lesson_id: lesson_id.ok_or(ArgsError::MissingFlag { flag: "--lesson" })?,
            trace_path,
        })
    }

    fn progress_store(&self) -> Result<HttpProgressStore, Box<dyn std::error::Error>> {
        let config = match &self.api_url {
            Some(url) => {
                let mut config = ProgressApiConfig::new(url)?;
                if let Ok(token) = std::env::var("LEARN_API_TOKEN") {
                    config = config.with_token(token);
                }
                config
            }
            None => ProgressApiConfig::from_env()?,
        };
        Ok(HttpProgressStore::new(config)?)
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn replay(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let trace_path = args
        .trace_path
        .clone()
        .ok_or(ArgsError::MissingFlag { flag: "--trace" })?;
    let samples = trace::parse(&std::fs::read_to_string(&trace_path)?)?;

    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let remote = args.progress_store()?;

    let tracker = WatchTracker::new(Clock::default(), Arc::new(remote), storage.local);
    // Sized to the trace so a fast replay never lags the subscriber.
    let source = ChannelPlaybackSource::with_capacity(samples.len() + 1);
    let mut player = LessonPlayer::new(Arc::new(source.clone()), tracker);

    player.switch_lesson(args.lesson_id.clone()).await;
    if let Some(first) = samples.iter().find(|s| s.duration > 0.0) {
        source.emit(PlaybackEvent::MetadataLoaded {
            duration: first.duration,
        });
    }
    for sample in &samples {
        source.emit(PlaybackEvent::TimeUpdate(*sample));
    }

    match player.close().await? {
        Some(snapshot) => {
            info!(
                lesson = %snapshot.lesson_id,
                samples = samples.len(),
                "replay finished"
            );
            println!(
                "{}: {}% watched ({} segments), completed: {}",
                snapshot.lesson_id, snapshot.percent, snapshot.segments_watched, snapshot.completed
            );
        }
        None => println!("{}: no progress recorded", args.lesson_id),
    }
    Ok(())
}

async fn complete(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let remote = args.progress_store()?;
    let tracker = WatchTracker::new(
        Clock::default(),
        Arc::new(remote),
        Storage::in_memory().local,
    );
    let mut player = LessonPlayer::new(Arc::new(ChannelPlaybackSource::new()), tracker);
    player.switch_lesson(args.lesson_id.clone()).await;

    let outcome = player.mark_complete().await;
    player.close().await?;
    match outcome {
        Ok(progress) if progress.is_completed => {
            println!("{}: marked complete", args.lesson_id);
            Ok(())
        }
        Ok(_) => {
            println!("{}: server did not mark the lesson complete", args.lesson_id);
            Ok(())
        }
        Err(TrackerError::CompletionRejected { message }) => {
            eprintln!("{}: cannot complete yet. {message}", args.lesson_id);
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match cmd {
        Command::Replay => replay(parsed).await,
        Command::Complete => complete(parsed).await,
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
