//! Persona CLI
//!
//! Drive the turn pipeline against a local SQLite database with an
//! offline echo responder.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use persona::controller::{EchoResponder, PersonaController, SessionRegistry};
use persona::memory::MemoryBackend;
use persona::storage::{
    SnapshotKind, SnapshotStore, SqliteEpisodeStore, SqliteSnapshotStore, Storage, StorageConfig,
    StorageMode,
};
use persona::{GlobalState, PersonaConfig, RawTurnInput, SafetyFlag, TurnInput};

#[derive(Parser)]
#[command(name = "persona")]
#[command(about = "Persona state orchestration CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "PERSONA_DB_PATH",
        default_value = "~/.local/share/persona/persona.db"
    )]
    db_path: String,

    /// Storage mode: local or cloud-safe
    #[arg(long, env = "PERSONA_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// JSON configuration file
    #[arg(long, env = "PERSONA_CONFIG")]
    config: Option<String>,

    #[arg(long, default_value = "local")]
    user: String,

    #[arg(long, default_value = "cli")]
    session: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "PERSONA_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run turns; reads lines from stdin when no message is given
    Chat {
        message: Option<String>,
        /// none, escalated, blocked or intervened
        #[arg(long)]
        safety_flag: Option<SafetyFlag>,
        #[arg(long)]
        overload: Option<f32>,
        #[arg(long)]
        reward: Option<f32>,
        /// Force a global state, e.g. SILENT
        #[arg(long)]
        mode: Option<GlobalState>,
        /// Print the full turn output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay JSON-lines turn records (any users and sessions)
    Replay {
        /// Input file, stdin when omitted
        file: Option<String>,
        /// Live sessions kept in memory; older ones reload from snapshots
        #[arg(long, default_value = "256")]
        max_sessions: usize,
    },
    /// Show the latest trait and value snapshots
    State {
        #[arg(short, long, default_value = "1")]
        limit: usize,
    },
    /// List recent episodes
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn controller(
    storage: &Storage,
    config: &PersonaConfig,
    user: &str,
    session: &str,
) -> persona::Result<PersonaController> {
    let backend: Arc<dyn MemoryBackend> = Arc::new(SqliteEpisodeStore::new(storage.clone(), user));
    PersonaController::builder(user, session, backend, Arc::new(EchoResponder))
        .config(config.clone())
        .snapshots(Arc::new(SqliteSnapshotStore::new(storage.clone(), user)))
        .build()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if cli.log_json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .with(filter)
            .init();
    }

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let storage_mode: StorageMode = cli
        .storage_mode
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })
    .context("opening database")?;
    if let Some(warning) = storage.storage_mode_warning() {
        tracing::warn!("{}", warning);
    }

    let config = match &cli.config {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            PersonaConfig::from_file(&path).with_context(|| format!("loading config {}", path))?
        }
        None => PersonaConfig::default(),
    };

    match cli.command {
        Commands::Chat {
            message,
            safety_flag,
            overload,
            reward,
            mode,
            json,
        } => {
            let ctl = controller(&storage, &config, &cli.user, &cli.session)?;
            let build = |text: &str| {
                let mut input = TurnInput::new(cli.user.as_str(), cli.session.as_str(), text);
                input.safety_flag = safety_flag.unwrap_or_default();
                input.overload_score = overload;
                input.reward = reward;
                input.mode_override = mode;
                input
            };

            let run = |text: &str| -> anyhow::Result<()> {
                let out = ctl.handle_turn(build(text))?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    println!("[{}] {}", out.global_state.state, out.reply_text);
                }
                Ok(())
            };

            match message {
                Some(text) => run(&text)?,
                None => {
                    let stdin = io::stdin();
                    loop {
                        print!("> ");
                        io::stdout().flush()?;
                        let mut line = String::new();
                        if stdin.lock().read_line(&mut line)? == 0 {
                            break;
                        }
                        let line = line.trim();
                        match line {
                            "" => continue,
                            "quit" | "exit" => break,
                            text => {
                                if let Err(e) = run(text) {
                                    eprintln!("Error: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        }

        Commands::Replay { file, max_sessions } => {
            let reader: Box<dyn BufRead> = match file {
                Some(path) => Box::new(io::BufReader::new(
                    std::fs::File::open(&path).with_context(|| format!("opening {}", path))?,
                )),
                None => Box::new(io::BufReader::new(io::stdin())),
            };

            let factory_storage = storage.clone();
            let factory_config = config.clone();
            let registry = SessionRegistry::new(Box::new(move |user: &str, session: &str| {
                controller(&factory_storage, &factory_config, user, session)
            }))
            .with_max_sessions(max_sessions);

            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let result = serde_json::from_str::<RawTurnInput>(&line)
                    .map_err(anyhow::Error::from)
                    .and_then(|raw| Ok(raw.normalize()?))
                    .and_then(|input| Ok(registry.handle_turn(input)?));
                match result {
                    Ok(out) => println!("{}", serde_json::to_string(&out)?),
                    Err(e) => eprintln!("line {}: {}", line_no + 1, e),
                }
            }
        }

        Commands::State { limit } => {
            let store = SqliteSnapshotStore::new(storage.clone(), cli.user.as_str());
            for kind in [SnapshotKind::Trait, SnapshotKind::Value] {
                let snapshots = if limit <= 1 {
                    store.load_latest(kind)?.into_iter().collect()
                } else {
                    store.recent(kind, limit)?
                };
                if snapshots.is_empty() {
                    println!("{}: no snapshots", kind);
                }
                for snapshot in snapshots {
                    println!("{} @ {}", kind, snapshot.created_at.to_rfc3339());
                    println!("{}", serde_json::to_string_pretty(&snapshot.state)?);
                }
            }
        }

        Commands::History { limit } => {
            let store = SqliteEpisodeStore::new(storage.clone(), cli.user.as_str());
            let episodes = store.fetch_recent(limit)?;
            if episodes.is_empty() {
                println!("No episodes for {}", cli.user);
            }
            for episode in episodes {
                println!(
                    "{} [{}] {}",
                    episode.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    episode.role.as_str(),
                    episode.summary
                );
            }
        }
    }

    Ok(())
}
