use std::fmt;
use std::path::PathBuf;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use services::seed::import_default_catalog;
use services::{Clock, TutorConfig, TutorService};
use storage::repository::{CardRepository, ReviewStateRepository, Storage};
use tutor_core::model::LearnerId;
use tutor_core::text::LaoTextProcessor;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidLearnerId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidLearnerId { raw } => write!(f, "invalid --learner value: {raw}"),
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
    eprintln!("  tutor practice [--db <sqlite_url>] [--learner <id>] [--config <path>]");
    eprintln!("  tutor seed     [--db <sqlite_url>] [--config <path>]");
    eprintln!("  tutor due      [--db <sqlite_url>] [--learner <id>] [--config <path>]");
    eprintln!();
    eprintln!("practice reads one transcript per line from stdin and prints one JSON");
    eprintln!("reply per line. `:timeout` simulates a lost attempt, `:quit` ends the session.");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://lao_tutor.sqlite3");
    eprintln!("  --learner 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LAO_TUTOR_CONFIG, LAO_TUTOR_DATABASE_URL, LAO_TUTOR_LOG_LEVEL, LAO_TUTOR_LEARNER");
    eprintln!("  RUST_LOG overrides the configured log level");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Practice,
    Seed,
    Due,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "practice" => Some(Self::Practice),
            "seed" => Some(Self::Seed),
            "due" => Some(Self::Due),
            _ => None,
        }
    }
}

struct Args {
    db_url: Option<String>,
    config_path: Option<PathBuf>,
    learner_id: LearnerId,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = None;
        let mut config_path = None;
        let mut learner_id = std::env::var("LAO_TUTOR_LEARNER")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| LearnerId::new(1), LearnerId::new);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = Some(normalize_sqlite_url(value));
                }
                "--learner" => {
                    let value = require_value(args, "--learner")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidLearnerId { raw: value.clone() })?;
                    learner_id = LearnerId::new(parsed);
                }
                "--config" => {
                    config_path = Some(PathBuf::from(require_value(args, "--config")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            config_path,
            learner_id,
        })
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
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn init_tracing(log_level: &str) {
    // stdout carries the JSON replies, so logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Practice,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Practice,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let mut config = TutorConfig::load(parsed.config_path.as_deref())?;
    if let Some(db_url) = parsed.db_url {
        config.database_url = db_url;
    }
    init_tracing(&config.log_level);

    prepare_sqlite_file(&config.database_url)?;
    let clock = Clock::default();

    match cmd {
        Command::Practice => practice(&config, parsed.learner_id, clock).await,
        Command::Seed => {
            let storage = Storage::sqlite(&config.database_url).await?;
            let imported =
                import_default_catalog(storage.cards.as_ref(), &LaoTextProcessor::new(), clock.now())
                    .await?;
            println!("{}", json!({ "type": "seeded", "cards": imported }));
            Ok(())
        }
        Command::Due => {
            let storage = Storage::sqlite(&config.database_url).await?;
            let due = storage
                .review_states
                .due_cards(parsed.learner_id, clock.now(), config.turn.due_limit)
                .await?;
            for state in due {
                let card = storage.cards.get_card(state.card_id()).await?;
                println!(
                    "{}",
                    json!({
                        "card_id": state.card_id(),
                        "text": card.text(),
                        "romanized": card.romanized(),
                        "due_at": state.due_at(),
                        "interval_days": state.interval_days(),
                        "lapses": state.lapses(),
                    })
                );
            }
            Ok(())
        }
    }
}

async fn practice(
    config: &TutorConfig,
    learner_id: LearnerId,
    clock: Clock,
) -> Result<(), Box<dyn std::error::Error>> {
    let tutor = TutorService::sqlite(config).await?;
    let session = tutor.start_session(learner_id, clock.now()).await?;
    if let Some(prompt) = tutor.current_card(session, clock.now()).await? {
        println!("{}", json!({ "type": "prompt", "prompt": prompt }));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match line.trim() {
            ":quit" => break,
            ":timeout" => tutor.process_timeout(learner_id, session, clock.now()).await?,
            transcript => {
                tutor
                    .process_turn(learner_id, session, transcript, clock.now())
                    .await?
            }
        };
        println!("{}", serde_json::to_string(&reply)?);
    }

    let record = tutor.close_session(session, clock.now()).await?;
    println!("{}", json!({ "type": "session_closed", "record": record }));
    Ok(())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url.starts_with("sqlite::memory:") || db_url.contains("mode=memory") {
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

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
