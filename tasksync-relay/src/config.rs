//! Relay settings: where to listen and how much each user may store.
//!
//! Values come from, in order of precedence, command-line flags (or their
//! `TASKSYNC_RELAY_*` environment variables), the TOML file at
//! `~/.config/tasksync-relay/config.toml` (or `--config`), and the
//! built-in defaults.
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:9100"
//! log_level = "debug"
//!
//! [limits]
//! max_document_size = 16384
//! max_documents = 10000
//! ```

use std::path::{Path, PathBuf};

use crate::store::{DEFAULT_MAX_DOCUMENT_SIZE, DEFAULT_MAX_DOCUMENTS_PER_COLLECTION, DocumentStore};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9100";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A document limit of zero would reject every write.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// On-disk shape; every field may be omitted.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
    limits: LimitsSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    log_level: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LimitsSection {
    max_document_size: Option<usize>,
    max_documents: Option<usize>,
}

/// Command line of `tasksync-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Document relay for tasksync clients")]
pub struct RelayCliArgs {
    /// Listen address, e.g. `127.0.0.1:9100`.
    #[arg(short, long, env = "TASKSYNC_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Config file to use instead of `~/.config/tasksync-relay/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest accepted task document, in encoded bytes.
    #[arg(long, env = "TASKSYNC_RELAY_MAX_DOCUMENT_SIZE")]
    pub max_document_size: Option<usize>,

    /// Most task documents a single user's collection may hold.
    #[arg(long, env = "TASKSYNC_RELAY_MAX_DOCUMENTS")]
    pub max_documents: Option<usize>,

    /// Tracing filter, e.g. `info` or `tasksync_relay=debug`.
    #[arg(long, env = "TASKSYNC_RELAY_LOG")]
    pub log_level: Option<String>,
}

/// Per-collection storage caps enforced by the [`DocumentStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentLimits {
    pub max_document_size: usize,
    pub max_documents: usize,
}

impl Default for DocumentLimits {
    fn default() -> Self {
        Self {
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            max_documents: DEFAULT_MAX_DOCUMENTS_PER_COLLECTION,
        }
    }
}

impl DocumentLimits {
    /// An empty store enforcing these limits.
    #[must_use]
    pub fn open_store(self) -> DocumentStore {
        DocumentStore::with_limits(self.max_document_size, self.max_documents)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_document_size == 0 {
            return Err(ConfigError::ZeroLimit("max_document_size"));
        }
        if self.max_documents == 0 {
            return Err(ConfigError::ZeroLimit("max_documents"));
        }
        Ok(self)
    }
}

/// Resolved relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub log_level: String,
    pub limits: DocumentLimits,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            limits: DocumentLimits::default(),
        }
    }
}

impl RelayConfig {
    /// Reads the config file and layers `cli` on top of it.
    ///
    /// A missing default file is fine; a missing `--config` file is not.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ReadFile`] or [`ConfigError::ParseToml`] for a bad
    /// file, [`ConfigError::ZeroLimit`] for an unusable limit.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_config_file(path)?,
            None => default_config_path()
                .map(|path| read_optional_config_file(&path))
                .transpose()?
                .unwrap_or_default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: &RelayCliArgs, file: ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let limits = DocumentLimits {
            max_document_size: cli
                .max_document_size
                .or(file.limits.max_document_size)
                .unwrap_or(defaults.limits.max_document_size),
            max_documents: cli
                .max_documents
                .or(file.limits.max_documents)
                .unwrap_or(defaults.limits.max_documents),
        }
        .validate()?;

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            log_level: cli
                .log_level
                .clone()
                .or(file.server.log_level)
                .unwrap_or(defaults.log_level),
            limits,
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tasksync-relay").join("config.toml"))
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn read_optional_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    match read_config_file(path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            tracing::debug!(path = %path.display(), "no relay config file");
            Ok(ConfigFile::default())
        }
        other => other,
    }
}
