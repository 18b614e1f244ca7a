//! Configuration system for the `taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::activity::DEFAULT_QUEUE_CAPACITY;
use crate::tasks::LedgerOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The server URL is not a `ws://` or `wss://` URL.
    #[error("invalid server URL {url}: {reason}")]
    InvalidServerUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    session: SessionFileConfig,
    tasks: TasksFileConfig,
    activity: ActivityFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    user_id: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    default_group: Option<String>,
    notice_buffer: Option<usize>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    link_completion_and_status: Option<bool>,
}

/// `[activity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ActivityFileConfig {
    queue_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    // -- Network --
    /// Document server WebSocket URL.
    pub server_url: Option<String>,
    /// User to act as.
    pub user_id: Option<String>,
    /// Timeout for connecting and the opening handshake.
    pub connect_timeout: Duration,
    /// Timeout for each request.
    pub request_timeout: Duration,

    // -- Session --
    /// Group used when a command does not name one.
    pub default_group: Option<String>,
    /// Capacity of the notice channel.
    pub notice_buffer: usize,

    // -- Tasks --
    /// Couple completion 100 with the "Completed" status.
    pub link_completion_and_status: bool,

    // -- Activity --
    /// Entries that may wait for the activity writer.
    pub activity_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            user_id: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            default_group: None,
            notice_buffer: 64,
            link_completion_and_status: false,
            activity_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if the resolved server URL is not a WebSocket URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        if let Some(url) = &config.server_url {
            validate_server_url(url)?;
        }
        Ok(config)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.network.server_url.clone()),
            user_id: cli.user.clone().or_else(|| file.network.user_id.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .network
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            default_group: cli
                .group
                .clone()
                .or_else(|| file.session.default_group.clone()),
            notice_buffer: file
                .session
                .notice_buffer
                .unwrap_or(defaults.notice_buffer),
            link_completion_and_status: cli.link_completion
                || file
                    .tasks
                    .link_completion_and_status
                    .unwrap_or(defaults.link_completion_and_status),
            activity_queue_capacity: file
                .activity
                .queue_capacity
                .unwrap_or(defaults.activity_queue_capacity),
        }
    }

    /// Ledger switches derived from this configuration.
    #[must_use]
    pub const fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            link_completion_and_status: self.link_completion_and_status,
        }
    }
}

/// Checks that `url` parses and uses the `ws` or `wss` scheme.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidServerUrl`] otherwise.
pub fn validate_server_url(url: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidServerUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidServerUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Group task tracker")]
pub struct CliArgs {
    /// WebSocket URL of the document server.
    #[arg(long, env = "TASKBOARD_SERVER_URL")]
    pub server_url: Option<String>,

    /// User id to act as.
    #[arg(short, long, env = "TASKBOARD_USER")]
    pub user: Option<String>,

    /// Group code to work in.
    #[arg(short, long, env = "TASKBOARD_GROUP")]
    pub group: Option<String>,

    /// Reaching 100% completes the task and completing sets 100%.
    #[arg(long)]
    pub link_completion: bool,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskboard.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do. Lists the group's tasks when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the group's tasks.
    Tasks,
    /// Create a task.
    Create {
        /// Task name.
        name: String,
        /// Initial status.
        #[arg(long)]
        status: Option<String>,
        /// Priority label.
        #[arg(long)]
        priority: Option<String>,
        /// Assignee user id.
        #[arg(long)]
        assign: Option<String>,
    },
    /// Move a task to another status.
    Status {
        /// Task id.
        task: String,
        /// New status.
        status: String,
    },
    /// Set a task's priority; omit the value to clear it.
    Priority {
        /// Task id.
        task: String,
        /// New priority.
        priority: Option<String>,
    },
    /// Rename a task.
    Rename {
        /// Task id.
        task: String,
        /// New name.
        name: String,
    },
    /// Star a task.
    Favorite {
        /// Task id.
        task: String,
    },
    /// Unstar a task.
    Unfavorite {
        /// Task id.
        task: String,
    },
    /// Assign a task; omit the user to unassign.
    Assign {
        /// Task id.
        task: String,
        /// Assignee user id.
        user: Option<String>,
    },
    /// Set a task's completion percentage.
    Progress {
        /// Task id.
        task: String,
        /// Completion, 0 to 100.
        #[arg(allow_negative_numbers = true)]
        percent: i64,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        task: String,
    },
    /// List owned and joined groups.
    Groups {
        /// Use owner and member queries instead of a full listing.
        #[arg(long)]
        query: bool,
    },
    /// Show the group's status vocabulary, or replace it.
    Statuses {
        /// New vocabulary, in order.
        set: Vec<String>,
    },
    /// Accept a pending member into the group.
    Accept {
        /// User id.
        member: String,
    },
    /// Reject a pending member.
    Reject {
        /// User id.
        member: String,
    },
    /// Remove a member from the group.
    Remove {
        /// User id.
        member: String,
    },
    /// Leave the group.
    Leave,
    /// Ask to join a group.
    Join {
        /// Group code.
        code: String,
    },
    /// Print the group's tasks whenever they change.
    Watch {
        /// Stop after this many seconds.
        #[arg(long)]
        seconds: Option<u64>,
    },
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
