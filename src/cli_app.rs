//! Top-level CLI definition and dispatch.

use std::path::PathBuf;

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;

use crate::config::DaemonConfig;
use crate::core::errors::{CddError, Result};
use crate::daemon::loop_main::NotificationLoop;
use crate::daemon::signals;
use crate::dao::sqlite::SqliteDb;
use crate::dao::{LockStore, NotificationSource};
use crate::model::{ChangeNotification, NotificationKind};

/// Computation-dependency daemon for a time-series database.
#[derive(Parser)]
#[command(name = "cdd", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the configuration file).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Application identity to run as (overrides the configuration file).
    #[arg(long, global = true)]
    pub app: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground.
    Run {
        /// Run one full evaluation before entering the poll loop.
        #[arg(long)]
        full_eval: bool,
        /// Run one full evaluation, then exit.
        #[arg(long)]
        full_eval_only: bool,
        /// Dump group expansions into this directory after each evaluation.
        #[arg(long)]
        group_dump_dir: Option<PathBuf>,
    },
    /// Run one full evaluation and exit (same as `run --full-eval-only`).
    FullEval,
    /// Create the database schema and register the application identity.
    InitDb,
    /// Print process-lock rows for all registered applications.
    Status {
        /// Emit the lock rows as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Enqueue a change notification by hand (operational aid).
    Notify {
        /// Event code: T, D, M, C, G, F.
        kind: char,
        /// Subject key.
        key: i64,
    },
    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Resolve configuration and dispatch the chosen subcommand.
pub fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path.clone_from(db);
    }
    if let Some(app) = &cli.app {
        config.app_name.clone_from(app);
    }
    config.validate()?;

    match &cli.command {
        Command::Run {
            full_eval,
            full_eval_only,
            group_dump_dir,
        } => {
            config.full_eval_on_startup |= *full_eval;
            config.full_eval_only |= *full_eval_only;
            if let Some(dir) = group_dump_dir {
                config.group_dump_dir = Some(dir.clone());
            }
            run_daemon(config)
        }
        Command::FullEval => {
            config.full_eval_only = true;
            run_daemon(config)
        }
        Command::InitDb => {
            let db = SqliteDb::open(&config.db_path, config.key_column)?;
            let app = db.register_app(&config.app_name)?;
            println!(
                "initialized {} (app '{}' = {})",
                config.db_path.display(),
                config.app_name,
                app
            );
            Ok(())
        }
        Command::Status { json } => {
            let db = SqliteDb::open(&config.db_path, config.key_column)?;
            let locks = db.list_locks()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&locks)?);
                return Ok(());
            }
            if locks.is_empty() {
                println!("no process locks");
            }
            let now = Utc::now();
            for lock in locks {
                let liveness = if lock.is_stale(config.lock_staleness(), now) {
                    "stale"
                } else {
                    "live"
                };
                println!("[{liveness}] {lock}");
            }
            Ok(())
        }
        Command::Notify { kind, key } => {
            let Some(kind) = NotificationKind::from_code(*kind) else {
                return Err(CddError::Runtime {
                    details: format!("unknown event code '{kind}' (expected T, D, M, C, G, F)"),
                });
            };
            let db = SqliteDb::open(&config.db_path, config.key_column)?;
            db.enqueue(&ChangeNotification::new(kind, *key, Utc::now()))?;
            println!("enqueued {kind} for key {key}");
            Ok(())
        }
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "cdd", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn run_daemon(config: DaemonConfig) -> Result<()> {
    let db = SqliteDb::open(&config.db_path, config.key_column)?;
    let app = db.register_app(&config.app_name)?;
    info!(app_name = %config.app_name, %app, db = %config.db_path.display(), "starting");
    let shutdown = signals::install_shutdown_flag()?;
    let mut runner = NotificationLoop::new(&db, config, app, shutdown);
    runner.run()
}
