//! Configuration system for the `tasksync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use tasksync_proto::task::{Category, Priority, TaskId};

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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    remote: RemoteFileConfig,
    storage: StorageFileConfig,
    sync: SyncFileConfig,
    notifications: NotificationsFileConfig,
}

/// `[remote]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemoteFileConfig {
    relay_url: Option<String>,
    user_id: Option<String>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    idle_timeout_ms: Option<u64>,
}

/// `[notifications]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NotificationsFileConfig {
    daily_summary: Option<bool>,
    daily_summary_hour: Option<u32>,
    daily_summary_minute: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Remote --
    /// Relay server WebSocket URL. `None` runs offline.
    pub relay_url: Option<String>,
    /// User the session is bound to.
    pub user_id: String,

    // -- Storage --
    /// Directory holding the local store entries.
    pub data_dir: PathBuf,

    // -- Sync --
    /// How long a command waits for outstanding sync work before exiting.
    pub idle_timeout: Duration,

    // -- Notifications --
    /// Whether the repeating daily summary is scheduled.
    pub daily_summary: bool,
    pub daily_summary_hour: u32,
    pub daily_summary_minute: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            user_id: "local".to_string(),
            data_dir: default_data_dir(),
            idle_timeout: Duration::from_secs(5),
            daily_summary: false,
            daily_summary_hour: 9,
            daily_summary_minute: 0,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the default file exists but is malformed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| file.remote.relay_url.clone()),
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.remote.user_id.clone())
                .unwrap_or(defaults.user_id),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            idle_timeout: file
                .sync
                .idle_timeout_ms
                .map_or(defaults.idle_timeout, Duration::from_millis),
            daily_summary: file
                .notifications
                .daily_summary
                .unwrap_or(defaults.daily_summary),
            daily_summary_hour: file
                .notifications
                .daily_summary_hour
                .unwrap_or(defaults.daily_summary_hour),
            daily_summary_minute: file
                .notifications
                .daily_summary_minute
                .unwrap_or(defaults.daily_summary_minute),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-first personal task tracker")]
pub struct CliArgs {
    /// WebSocket URL of the relay server. Without one the client runs offline.
    #[arg(long, env = "TASKSYNC_RELAY_URL")]
    pub relay_url: Option<String>,

    /// User id the local state belongs to.
    #[arg(long, env = "TASKSYNC_USER")]
    pub user_id: Option<String>,

    /// Directory for local state (default: `$XDG_DATA_HOME/tasksync`).
    #[arg(long, env = "TASKSYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tasksync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What to do once the session is bound.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a task.
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// low, medium or high.
        #[arg(long, default_value_t = Priority::Medium, value_parser = parse_priority)]
        priority: Priority,
        #[arg(long, default_value_t = Category::Personal, value_parser = parse_category)]
        category: Category,
        /// Due time, RFC 3339.
        #[arg(long)]
        due: Option<DateTime<Utc>>,
        /// Reminder time, RFC 3339.
        #[arg(long)]
        remind_at: Option<DateTime<Utc>>,
    },
    /// List tasks.
    List {
        #[arg(long, value_enum, default_value_t = ListView::Incomplete)]
        view: ListView,
    },
    /// Toggle a task's completion.
    Complete { id: TaskId },
    /// Delete a task.
    Delete { id: TaskId },
    /// Push pending changes and merge the remote collection.
    Sync,
    /// Show statistics.
    Stats,
    /// Replace local tasks with the remote collection.
    Restore,
    /// Push every local task.
    Backup,
    /// Send today's summary notification now.
    Summary,
}

/// Which tasks `list` shows.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListView {
    All,
    Incomplete,
    Completed,
    Today,
    Due,
    Overdue,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Case-insensitive priority tag for the command line.
fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::ALL
        .into_iter()
        .find(|p| p.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown priority `{s}` (expected low, medium or high)"))
}

/// Case-insensitive category tag for the command line.
fn parse_category(s: &str) -> Result<Category, String> {
    Category::ALL
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown category `{s}`"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(
        || std::env::temp_dir().join("tasksync"),
        |dir| dir.join("tasksync"),
    )
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
        config_dir.join("tasksync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
