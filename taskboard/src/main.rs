//! `taskboard` — group task tracker CLI.
//!
//! Connects to a `taskboard-server`, follows one group's tasks and applies
//! a single command. Configuration via CLI flags, environment variables, or
//! config file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # List the tasks of group ABC123
//! cargo run --bin taskboard -- --server-url ws://127.0.0.1:9100/ws \
//!     --user alice --group ABC123
//!
//! # Move a task and watch the board
//! TASKBOARD_GROUP=ABC123 cargo run --bin taskboard -- status <task-id> "In Progress"
//! TASKBOARD_GROUP=ABC123 cargo run --bin taskboard -- watch --seconds 60
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::config::{CliArgs, ClientConfig, Command};
use taskboard::gateway::RemoteStore;
use taskboard::gateway::remote::RemoteGateway;
use taskboard::identity::SessionIdentity;
use taskboard::session::Session;
use taskboard::tasks::{NewTask, TaskError};
use taskboard_proto::GROUPS;
use taskboard_proto::group::Group;
use taskboard_proto::task::{Task, TaskId};

type CliSession = Session<RemoteGateway, SessionIdentity>;

/// Errors that end a command.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("no group given (use --group or [session] default_group)")]
    NoGroup,
    #[error("group {0} not found")]
    GroupNotFound(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("taskboard starting");

    let session = match CliSession::connect(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.clone().unwrap_or(Command::Tasks);
    let outcome = run(&session, &config, command, cli.json).await;

    for notice in session.shutdown().await {
        eprintln!("[{}] {}", notice.level, notice.message);
    }
    tracing::info!("taskboard exiting");

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never interleave with command output. Returns
/// a [`WorkerGuard`] that must be held until shutdown to flush buffered
/// entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
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

#[allow(clippy::too_many_lines)]
async fn run(
    session: &CliSession,
    config: &ClientConfig,
    command: Command,
    json: bool,
) -> Result<(), CliError> {
    let ledger = session.ledger();
    let directory = session.directory();
    let group = || config.default_group.clone().ok_or(CliError::NoGroup);

    match command {
        Command::Tasks => {
            follow(session, &group()?).await?;
            print_tasks(&ledger.tasks(), json)?;
        }
        Command::Create {
            name,
            status,
            priority,
            assign,
        } => {
            follow(session, &group()?).await?;
            let id = ledger
                .create_task(NewTask {
                    name,
                    status,
                    priority,
                    assigned_to: assign,
                })
                .await?;
            println!("{id}");
        }
        Command::Status { task, status } => {
            follow(session, &group()?).await?;
            ledger.set_status(&TaskId::new(task), &status).await?;
        }
        Command::Priority { task, priority } => {
            follow(session, &group()?).await?;
            ledger
                .set_priority(&TaskId::new(task), priority.as_deref())
                .await?;
        }
        Command::Rename { task, name } => {
            follow(session, &group()?).await?;
            ledger.rename(&TaskId::new(task), &name).await?;
        }
        Command::Favorite { task } => {
            follow(session, &group()?).await?;
            ledger.set_favorite(&TaskId::new(task), true).await?;
        }
        Command::Unfavorite { task } => {
            follow(session, &group()?).await?;
            ledger.set_favorite(&TaskId::new(task), false).await?;
        }
        Command::Assign { task, user } => {
            follow(session, &group()?).await?;
            ledger
                .set_assignee(&TaskId::new(task), user.as_deref())
                .await?;
        }
        Command::Progress { task, percent } => {
            follow(session, &group()?).await?;
            ledger.set_completion(&TaskId::new(task), percent).await?;
        }
        Command::Delete { task } => {
            follow(session, &group()?).await?;
            ledger.delete(&TaskId::new(task)).await?;
        }
        Command::Groups { query } => {
            if query {
                directory.fetch_groups_with_query().await;
            } else {
                directory.fetch_groups().await;
            }
            print_groups("owned", &directory.owned_groups(), json)?;
            print_groups("joined", &directory.joined_groups(), json)?;
        }
        Command::Statuses { set } => {
            let code = group()?;
            let selected = load_group(session, &code).await?;
            if let Ok(Some(statuses)) = directory.set_selected_group(selected).await {
                tracing::debug!(group = %code, count = statuses.len(), "statuses loaded");
            }
            if !set.is_empty() {
                directory.update_statuses(set).await;
            }
            print_json_or(&directory.statuses(), json, |statuses| {
                for status in statuses {
                    println!("{status}");
                }
            })?;
        }
        Command::Accept { member } => directory.accept_member(&group()?, &member).await,
        Command::Reject { member } => directory.reject_member(&group()?, &member).await,
        Command::Remove { member } => directory.remove_member(&group()?, &member).await,
        Command::Leave => directory.leave_group(&group()?).await,
        Command::Join { code } => directory.request_to_join(&code).await,
        Command::Watch { seconds } => {
            let code = group()?;
            follow(session, &code).await?;
            let watch = watch_tasks(session, json);
            match seconds {
                Some(secs) => {
                    if tokio::time::timeout(Duration::from_secs(secs), watch)
                        .await
                        .is_err()
                    {
                        tracing::info!(group = %code, "watch finished");
                    }
                }
                None => watch.await,
            }
        }
    }
    Ok(())
}

/// Subscribes to the group's tasks and waits for the first snapshot.
async fn follow(session: &CliSession, group: &str) -> Result<(), CliError> {
    session.ledger().subscribe(group).await?;
    session.ledger().wait_for_snapshot(0).await;
    Ok(())
}

async fn load_group(session: &CliSession, code: &str) -> Result<Group, CliError> {
    match session.store().get_document(GROUPS, code).await {
        Ok(Some(doc)) => Ok(Group::from_document(&doc)),
        Ok(None) => Err(CliError::GroupNotFound(code.to_string())),
        Err(e) => Err(CliError::Task(TaskError::Remote(e))),
    }
}

/// Prints the board every time a newer snapshot lands.
async fn watch_tasks(session: &CliSession, json: bool) {
    let ledger = session.ledger();
    let mut seen = None;
    loop {
        let next = seen.map_or(0, |v: u64| v + 1);
        ledger.wait_for_snapshot(next).await;
        seen = ledger.snapshot_version();
        println!("-- version {} --", seen.unwrap_or_default());
        if let Err(e) = print_tasks(&ledger.tasks(), json) {
            tracing::warn!(error = %e, "failed to print tasks");
        }
    }
}

fn print_tasks(tasks: &[Task], json: bool) -> Result<(), CliError> {
    print_json_or(tasks, json, |tasks| {
        for task in tasks {
            println!(
                "{}  [{}] {}  {}%{}{}{}",
                task.id,
                task.status,
                task.name,
                task.completion,
                task.priority
                    .as_deref()
                    .map(|p| format!("  priority={p}"))
                    .unwrap_or_default(),
                task.assigned_to
                    .as_deref()
                    .map(|a| format!("  assignee={a}"))
                    .unwrap_or_default(),
                if task.is_favorite { "  *" } else { "" },
            );
        }
    })
}

fn print_groups(label: &str, groups: &[Group], json: bool) -> Result<(), CliError> {
    print_json_or(groups, json, |groups| {
        println!("{label}:");
        for group in groups {
            println!(
                "  {}  {}  ({} members, {} pending)",
                group.code,
                group.name,
                group.members.len(),
                group.pending_members.len()
            );
        }
    })
}

fn print_json_or<T: Serialize + ?Sized>(
    value: &T,
    json: bool,
    plain: impl FnOnce(&T),
) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        plain(value);
    }
    Ok(())
}
