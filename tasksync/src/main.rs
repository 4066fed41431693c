//! `tasksync`: offline-first personal task tracker.
//!
//! Each invocation binds the configured user, restores local state,
//! connects to a relay server when one is configured (running offline
//! otherwise), executes one command, lets outstanding sync work settle and
//! exits.
//!
//! ```bash
//! # Offline
//! cargo run --bin tasksync -- add "Buy milk" --priority high
//! cargo run --bin tasksync -- list --view all
//!
//! # Against a relay
//! cargo run --bin tasksync -- --relay-url ws://127.0.0.1:9100/ws --user-id alice sync
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::config::{CliArgs, ClientConfig, Command, ListView};
use tasksync::connectivity::ConnectivityObserver;
use tasksync::notify::RecordingScheduler;
use tasksync::remote::{MemoryRemote, RelayRemote, RemoteStore};
use tasksync::repository::{RepositoryError, TaskRepository};
use tasksync::stats::format_duration;
use tasksync::store::{FileBackend, LocalStore};
use tasksync_proto::task::Task;

type Repository<R> = TaskRepository<R, RecordingScheduler, FileBackend>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(user_id = %config.user_id, "tasksync starting");

    let command = cli.command.clone().unwrap_or(Command::List {
        view: ListView::Incomplete,
    });
    let connectivity = ConnectivityObserver::new(false);

    let result = match &config.relay_url {
        Some(url) => match RelayRemote::connect(url, connectivity.clone()).await {
            Ok(remote) => run(&config, command, Arc::new(remote), connectivity).await,
            Err(e) => {
                eprintln!("Could not connect to relay, running offline ({e})");
                run(&config, command, Arc::new(MemoryRemote::new()), connectivity).await
            }
        },
        None => run(&config, command, Arc::new(MemoryRemote::new()), connectivity).await,
    };

    tracing::info!("tasksync exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasksync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run<R: RemoteStore>(
    config: &ClientConfig,
    command: Command,
    remote: Arc<R>,
    connectivity: ConnectivityObserver,
) -> Result<(), RepositoryError> {
    let scheduler = RecordingScheduler::new();
    let store = LocalStore::new(FileBackend::new(&config.data_dir));
    let mut repo: Repository<R> =
        TaskRepository::new(store, scheduler.clone(), remote, connectivity);

    repo.setup_session(config.user_id.clone()).await;
    if config.daily_summary {
        repo.schedule_daily_summary(config.daily_summary_hour, config.daily_summary_minute)?;
    }

    let outcome = execute(&mut repo, command).await;

    if tokio::time::timeout(config.idle_timeout, repo.run_until_idle())
        .await
        .is_err()
    {
        tracing::warn!("sync did not settle before exit");
    }
    let pending = repo.pending_ids().len();
    if pending > 0 {
        println!("{pending} change(s) waiting to sync");
    }
    if let Some(error) = &repo.sync_state().last_error {
        println!("sync error: {error}");
    }
    for id in scheduler.ids() {
        if let Some(entry) = scheduler.get(&id) {
            tracing::debug!(id = %id, trigger = ?entry.trigger, "notification scheduled");
        }
    }
    outcome
}

async fn execute<R: RemoteStore>(
    repo: &mut Repository<R>,
    command: Command,
) -> Result<(), RepositoryError> {
    match command {
        Command::Add {
            title,
            description,
            priority,
            category,
            due,
            remind_at,
        } => {
            let mut task = Task::new(title)
                .with_description(description)
                .with_priority(priority)
                .with_category(category);
            task.due_at = due;
            task.reminder_at = remind_at;
            let id = task.id.clone();
            repo.add(task)?;
            println!("added {id}");
        }
        Command::List { view } => {
            let tasks = match view {
                ListView::All => {
                    let mut all = repo.incomplete_tasks();
                    all.extend(repo.completed_tasks());
                    all
                }
                ListView::Incomplete => repo.incomplete_tasks(),
                ListView::Completed => repo.completed_tasks(),
                ListView::Today => repo.today_tasks(),
                ListView::Due => repo.due_today_tasks(),
                ListView::Overdue => repo.overdue_tasks(),
            };
            for task in &tasks {
                print_task(task, repo.is_pending(&task.id));
            }
            if tasks.is_empty() {
                println!("no tasks");
            }
        }
        Command::Complete { id } => {
            let completed = repo.toggle_completion(&id)?;
            let state = if completed { "completed" } else { "reopened" };
            println!("{state} {id}");
        }
        Command::Delete { id } => {
            repo.delete(&id)?;
            println!("deleted {id}");
        }
        Command::Sync => {
            repo.sync_now().await?;
            println!("sync started");
        }
        Command::Stats => {
            let stats = repo.statistics();
            println!("total:            {}", stats.total);
            println!("completed:        {}", stats.completed);
            println!("pending:          {}", stats.pending);
            println!("overdue:          {}", stats.overdue);
            println!("today:            {}", stats.today);
            println!("completed today:  {}", stats.completed_today);
            println!("completion rate:  {}", stats.completion_rate_label());
            println!("avg time spent:   {}", stats.average_time_label());
        }
        Command::Restore => {
            let count = repo.restore_from_remote().await?;
            println!("restored {count} task(s)");
        }
        Command::Backup => {
            let count = repo.backup_all().await?;
            println!("backed up {count} task(s)");
        }
        Command::Summary => {
            repo.send_summary_now()?;
            let stats = repo.statistics();
            println!(
                "Completed: {}\nTotal: {}\nPending: {}",
                stats.completed_today, stats.total, stats.pending
            );
        }
    }
    Ok(())
}

fn print_task(task: &Task, pending: bool) {
    let mark = if task.is_completed { "x" } else { " " };
    let sync = if pending { " *" } else { "" };
    let mut line = format!(
        "[{mark}] {} {:<6} {:<8} {}{sync}",
        task.id, task.priority, task.category, task.title
    );
    if let Some(due) = task.due_at {
        line.push_str(&format!("  due {}", due.format("%Y-%m-%d %H:%M")));
    }
    if let Some(spent) = task.time_spent() {
        line.push_str(&format!("  took {}", format_duration(spent)));
    }
    println!("{line}");
}
