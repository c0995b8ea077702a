//! jobtrack: inspect and manage tracked long-running jobs.
//!
//! The `jobs` commands operate on the PostgreSQL job store named by
//! `DATABASE_URL`. `demo` runs sample jobs through an in-process executor.

mod commands;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use jobtrack_db::{create_pool_with_config, MemoryJobStore, PgJobStore, PoolConfig};
use jobtrack_jobs::{
    defaults, EventBus, ExecutorConfig, JobExecutor, JobRecordStore, JobState, JobTracker,
};

use commands::ListArgs;
use tasks::StoredTasks;

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(author, version, about = "Long-running job tracking")]
#[command(propagate_version = true)]
struct Cli {
    /// PostgreSQL connection string for the job store
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query and manage stored job records
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Run sample jobs in-process and print the resulting records
    Demo {
        /// Number of sample jobs to submit
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,

        /// Milliseconds each sample job spends per unit of work
        #[arg(long, default_value_t = 50)]
        step_ms: u64,

        /// Store demo records in the database instead of memory
        #[arg(long)]
        persist: bool,
    },
}

#[derive(Subcommand)]
enum JobsCommand {
    /// List jobs, newest first
    List {
        /// Only jobs submitted by this owner
        #[arg(short, long)]
        owner: Option<String>,

        /// Only jobs in these states (can specify multiple)
        #[arg(short, long, num_args = 1..)]
        state: Vec<JobState>,

        /// Only jobs whose description contains this text
        #[arg(short, long)]
        description: Option<String>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(short, long, default_value_t = defaults::PAGE_LIMIT)]
        limit: usize,
    },

    /// Show one job
    Get { id: String },

    /// Request cancellation of a job
    Cancel { id: String },

    /// Delete jobs; running jobs are removed once they stop
    Delete {
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },

    /// Delete every finished job
    DeleteFinished {
        /// Only jobs submitted by this owner
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Count jobs per state
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter (default: "jobtrack=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "jobtrack=info,jobtrack_jobs=info,jobtrack_db=info,warn".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("jobtrack.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Logs go to stderr so command output stays clean on stdout.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );

    let output = run(Cli::parse()).await?;
    print!("{output}");
    Ok(())
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgJobStore> {
    let Some(url) = database_url else {
        bail!("DATABASE_URL is not set; pass --database-url or set the environment variable");
    };
    let pool = create_pool_with_config(url, PoolConfig::from_env())
        .await
        .context("failed to connect to the job store")?;
    let store = PgJobStore::new(pool);
    store.migrate().await.context("failed to migrate the job store")?;
    Ok(store)
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    match cli.command {
        Commands::Jobs { command } => {
            let store: Arc<dyn JobRecordStore> =
                Arc::new(connect(cli.database_url.as_deref()).await?);
            // Jobs run in other processes; active records stand in for their tasks.
            let tracker = JobTracker::new(
                store.clone(),
                Arc::new(EventBus::default()),
                Arc::new(StoredTasks::new(store)),
            );
            match command {
                JobsCommand::List {
                    owner,
                    state,
                    description,
                    offset,
                    limit,
                } => {
                    let args = ListArgs {
                        owner,
                        states: state,
                        description,
                        offset,
                        limit,
                    };
                    commands::list(&tracker, args).await
                }
                JobsCommand::Get { id } => commands::get(&tracker, &id).await,
                JobsCommand::Cancel { id } => commands::cancel(&tracker, &id).await,
                JobsCommand::Delete { ids } => commands::delete(&tracker, ids).await,
                JobsCommand::DeleteFinished { owner } => {
                    commands::delete_finished(&tracker, owner.as_deref()).await
                }
                JobsCommand::Stats => commands::stats(&tracker).await,
            }
        }
        Commands::Demo {
            jobs,
            step_ms,
            persist,
        } => {
            let store: Arc<dyn JobRecordStore> = if persist {
                Arc::new(connect(cli.database_url.as_deref()).await?)
            } else {
                Arc::new(MemoryJobStore::new())
            };
            let executor = JobExecutor::new(ExecutorConfig::from_env().with_enabled(true));
            let output =
                commands::demo(store, executor.clone(), jobs, Duration::from_millis(step_ms))
                    .await;
            executor.shutdown().await;
            output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_with_states() {
        let cli = Cli::try_parse_from([
            "jobtrack",
            "jobs",
            "list",
            "--state",
            "RUNNING",
            "FAILED",
            "--owner",
            "alice",
        ])
        .unwrap();
        match cli.command {
            Commands::Jobs {
                command:
                    JobsCommand::List {
                        owner,
                        state,
                        limit,
                        ..
                    },
            } => {
                assert_eq!(owner.as_deref(), Some("alice"));
                assert_eq!(state, vec![JobState::Running, JobState::Failed]);
                assert_eq!(limit, defaults::PAGE_LIMIT);
            }
            _ => panic!("expected jobs list"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_state() {
        assert!(Cli::try_parse_from(["jobtrack", "jobs", "list", "--state", "PAUSED"]).is_err());
    }

    #[test]
    fn test_delete_requires_ids() {
        assert!(Cli::try_parse_from(["jobtrack", "jobs", "delete"]).is_err());
    }

    #[tokio::test]
    async fn test_jobs_command_without_database_url_fails() {
        let cli = Cli {
            database_url: None,
            command: Commands::Jobs {
                command: JobsCommand::Stats,
            },
        };
        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
