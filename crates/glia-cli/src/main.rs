//! Glia CLI - shell state from the command line.
//!
//! Single binary that provides:
//! - `glia sessions` - inspect and edit the session store
//! - `glia mission` - validate and replay mission definitions
//! - `glia init` - create a project config

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use glia_core::mission::{
    MissionDefinition, MissionEventKind, MissionPersistence, MissionRuntime, RuntimeOptions,
    StoragePersistence,
};
use glia_core::session::{
    spawn_autosave, spawn_legacy_sync, Session, SessionFilter, SessionPatch, SessionStatus,
    SessionStore,
};
use glia_core::{FileStore, KeyValueStore, ShellConfig, SystemClock};

#[derive(Parser)]
#[command(name = "glia")]
#[command(about = "Glia shell state", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Session store
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Mission definitions and runs
    Mission {
        #[command(subcommand)]
        command: MissionCommands,
    },

    /// Initialize a new project
    Init,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions
    List {
        /// Only sessions of this app
        #[arg(long)]
        app: Option<String>,

        /// Only pinned sessions
        #[arg(long)]
        pinned: bool,

        /// Include archived sessions
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create a session and make it active
    Create {
        app: String,

        #[arg(long)]
        title: Option<String>,

        /// JSON payload
        #[arg(long)]
        data: Option<String>,
    },

    /// Edit a session
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        /// idle, running, completed or error
        #[arg(long)]
        status: Option<String>,

        /// JSON payload, replaces the existing one
        #[arg(long)]
        data: Option<String>,
    },

    /// Select the active session
    Select {
        id: Option<String>,

        /// Clear the selection
        #[arg(long, conflicts_with = "id")]
        none: bool,
    },

    /// Switch the active app
    App { app: String },

    /// Toggle the pinned flag
    Pin { id: String },

    Archive { id: String },

    Unarchive { id: String },

    Delete { id: String },

    /// Import legacy recent worlds
    SyncLegacy {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum MissionCommands {
    /// Check a mission definition against the configured tools and layouts
    Validate { file: PathBuf },

    /// Run a JSONL file of events through a mission and print the final state
    Replay {
        file: PathBuf,

        events: PathBuf,

        /// Keep the run in project storage
        #[arg(long)]
        persist: bool,

        /// Continue an existing run instead of starting a new one
        #[arg(long)]
        run: Option<String>,

        /// Active seconds to simulate after the events, in configured ticks
        #[arg(long, default_value_t = 0)]
        elapsed: u64,
    },

    /// List persisted runs
    Runs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Find project root
    let project_root = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Some(Commands::Sessions { command }) => handle_sessions(&project_root, command).await,
        Some(Commands::Mission { command }) => handle_mission(&project_root, command),
        Some(Commands::Init) => init_project(&project_root),
        None => {
            println!("Glia - shell state");
            println!();
            println!("Usage: glia <COMMAND>");
            println!();
            println!("Commands:");
            println!("  sessions  Session store");
            println!("  mission   Mission definitions and runs");
            println!("  init      Initialize a new project");
            println!();
            println!("Run 'glia --help' for more information.");
            Ok(())
        }
    }
}

fn load_config(project_root: &Path) -> Result<ShellConfig> {
    let mut config = ShellConfig::load_from_project(project_root)?;
    config.resolve_paths(project_root);
    Ok(config)
}

fn open_storage(config: &ShellConfig) -> Result<Arc<dyn KeyValueStore>> {
    std::fs::create_dir_all(&config.storage_dir).with_context(|| {
        format!(
            "Failed to create storage directory {}",
            config.storage_dir.display()
        )
    })?;
    Ok(Arc::new(FileStore::new(&config.storage_dir)))
}

async fn handle_sessions(project_root: &Path, command: SessionCommands) -> Result<()> {
    let config = load_config(project_root)?;
    let storage = open_storage(&config)?;
    let store = Arc::new(SessionStore::open(
        storage,
        Arc::new(SystemClock),
        config.sessions.clone(),
    ));

    let result = run_session_command(&store, command).await;
    store.flush();
    result
}

async fn run_session_command(store: &Arc<SessionStore>, command: SessionCommands) -> Result<()> {
    match command {
        SessionCommands::List {
            app,
            pinned,
            all,
            json,
        } => {
            let mut filter = SessionFilter::all();
            filter.app_id = app;
            if pinned {
                filter = filter.with_pinned(true);
            }
            if !all {
                filter = filter.with_archived(false);
            }
            let sessions = store.get_sessions(&filter);

            if json {
                println!("{}", serde_json::to_string_pretty(&*sessions)?);
                return Ok(());
            }

            let active = store.active_session_id();
            println!(
                "Sessions: {} (active app: {})",
                sessions.len(),
                store.active_app_id().as_deref().unwrap_or("-")
            );
            for session in sessions.iter() {
                let marker = if active.as_deref() == Some(session.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", marker, describe(session));
            }
        }
        SessionCommands::Create { app, title, data } => {
            let data = data.as_deref().map(parse_json).transpose()?;
            let session = store.create_session(&app, title.as_deref(), data);
            println!("{}", session.id);
        }
        SessionCommands::Update {
            id,
            title,
            status,
            data,
        } => {
            let status = status
                .as_deref()
                .map(|s| SessionStatus::from_name(s).ok_or_else(|| anyhow!("Unknown status: {}", s)))
                .transpose()?;
            let patch = SessionPatch {
                title,
                status,
                data: data.as_deref().map(parse_json).transpose()?,
                ..SessionPatch::default()
            };
            if patch.is_empty() {
                bail!("Nothing to update");
            }
            let session = store
                .update_session(&id, patch)
                .ok_or_else(|| anyhow!("Unknown session: {}", id))?;
            println!("{}", describe(&session));
        }
        SessionCommands::Select { id, none } => {
            if none {
                store.set_active_session(None);
            } else {
                let id = id.ok_or_else(|| anyhow!("Pass a session id or --none"))?;
                if store.get_session(&id).is_none() {
                    bail!("Unknown session: {}", id);
                }
                store.set_active_session(Some(&id));
            }
            println!(
                "Active session: {}",
                store.active_session_id().as_deref().unwrap_or("-")
            );
        }
        SessionCommands::App { app } => {
            store.set_active_app(&app);
            println!(
                "Active app: {} (session: {})",
                app,
                store.active_session_id().as_deref().unwrap_or("-")
            );
        }
        SessionCommands::Pin { id } => {
            let pinned = store
                .toggle_pin(&id)
                .ok_or_else(|| anyhow!("Unknown session: {}", id))?;
            println!("{} {}", id, if pinned { "pinned" } else { "unpinned" });
        }
        SessionCommands::Archive { id } => {
            require_session(store, &id)?;
            if store.archive_session(&id) {
                println!("Archived {}", id);
            } else {
                println!("{} is already archived", id);
            }
        }
        SessionCommands::Unarchive { id } => {
            require_session(store, &id)?;
            if store.unarchive_session(&id) {
                println!("Unarchived {}", id);
            } else {
                println!("{} is not archived", id);
            }
        }
        SessionCommands::Delete { id } => {
            let removed = store
                .delete_session(&id)
                .ok_or_else(|| anyhow!("Unknown session: {}", id))?;
            println!("Deleted {} ({})", removed.id, removed.title);
        }
        SessionCommands::SyncLegacy { watch } => {
            let report = store.sync_legacy_recent_worlds();
            println!(
                "Legacy sync: {} created, {} updated",
                report.created, report.updated
            );

            if watch {
                let period = Duration::from_millis(store.config().legacy_poll_ms);
                let _autosave = spawn_autosave(store.clone());
                let _poll = spawn_legacy_sync(store.clone(), period);
                tracing::info!(period_ms = store.config().legacy_poll_ms, "Watching legacy recent worlds");
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for interrupt")?;
                tracing::info!(sessions = store.len(), "Stopping legacy sync");
            }
        }
    }

    Ok(())
}

fn require_session(store: &SessionStore, id: &str) -> Result<()> {
    if store.get_session(id).is_none() {
        bail!("Unknown session: {}", id);
    }
    Ok(())
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON: {}", raw))
}

fn describe(session: &Session) -> String {
    let mut flags = Vec::new();
    if session.pinned {
        flags.push("pinned");
    }
    if session.archived {
        flags.push("archived");
    }
    let opened = DateTime::from_timestamp_millis(session.last_opened_at)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} [{}] {} - {} (opened {}){}",
        session.id,
        session.app_id,
        session.title,
        session.status,
        opened,
        if flags.is_empty() {
            String::new()
        } else {
            format!(" {}", flags.join(", "))
        }
    )
}

fn handle_mission(project_root: &Path, command: MissionCommands) -> Result<()> {
    let config = load_config(project_root)?;

    match command {
        MissionCommands::Validate { file } => {
            let definition = MissionDefinition::load(&file)?;
            definition
                .validate(&config.tool_registry(), &config.layout_registry())
                .with_context(|| format!("Mission {} is invalid", definition.id))?;
            println!(
                "Mission {} is valid ({} steps, {} checkpoints)",
                definition.id,
                definition.steps.len(),
                definition.checkpoints.len()
            );
        }
        MissionCommands::Replay {
            file,
            events,
            persist,
            run,
            elapsed,
        } => {
            let definition = Arc::new(MissionDefinition::load(&file)?);
            definition
                .validate(&config.tool_registry(), &config.layout_registry())
                .with_context(|| format!("Mission {} is invalid", definition.id))?;

            let mut options = RuntimeOptions::from_config(&config);
            if persist || run.is_some() {
                let storage = open_storage(&config)?;
                options = options.with_persistence(Arc::new(StoragePersistence::new(
                    storage,
                    config.missions.storage_prefix.clone(),
                )));
            }
            let runtime = match run {
                Some(run_id) => MissionRuntime::resume(definition, run_id, options),
                None => MissionRuntime::start_new(definition, options),
            };

            let file = std::fs::File::open(&events)
                .with_context(|| format!("Failed to open events from {}", events.display()))?;
            let mut applied = 0usize;
            for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let kind: MissionEventKind = serde_json::from_str(&line).with_context(|| {
                    format!("Invalid event on line {} of {}", index + 1, events.display())
                })?;
                let before = runtime.state().revision;
                if runtime.dispatch(kind).revision != before {
                    applied += 1;
                }
            }

            if elapsed > 0 {
                runtime.advance(Duration::from_secs(elapsed));
            }

            tracing::info!(run_id = %runtime.run_id(), applied, elapsed, "Replay finished");
            println!("{}", serde_json::to_string_pretty(&*runtime.state())?);
        }
        MissionCommands::Runs => {
            let storage = open_storage(&config)?;
            let persistence = StoragePersistence::new(storage, config.missions.storage_prefix.clone());
            let runs = persistence.list_runs()?;
            println!("Mission runs: {}", runs.len());
            for run_id in runs {
                match persistence.load(&run_id) {
                    Ok(Some(state)) => println!(
                        "  {} - mission: {}, status: {:?}, steps: {}/{}",
                        run_id,
                        state.definition_id,
                        state.status,
                        state.completed_steps(),
                        state.step_order.len()
                    ),
                    Ok(None) => println!("  {} - missing", run_id),
                    Err(e) => println!("  {} - unreadable ({})", run_id, e),
                }
            }
        }
    }

    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let glia_dir = project_root.join(".glia");
    std::fs::create_dir_all(glia_dir.join("storage"))?;

    // Create default config
    let config_path = glia_dir.join("config.yaml");
    if !config_path.exists() {
        let default_config = r#"# Glia Shell Configuration

storage_dir: .glia/storage

sessions:
  storage_key: glia.sessions
  legacy_key: glia.recentWorlds
  legacy_app_id: worlds
  save_debounce_ms: 500
  legacy_poll_ms: 1000

missions:
  storage_prefix: glia.mission
  event_log_capacity: 200
  tick_ms: 1000

tools: []
layouts: []
"#;
        std::fs::write(&config_path, default_config)?;
    }

    println!("Initialized Glia project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  .glia/config.yaml - shell configuration");
    println!("  .glia/storage     - durable key-value storage");
    println!();
    println!("Next steps:");
    println!("  1. Register tools and layouts in .glia/config.yaml");
    println!("  2. Run: glia mission validate <mission.yaml>");

    Ok(())
}
