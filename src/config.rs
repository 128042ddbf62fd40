use std::{
    env,
    error::Error,
    fmt::{self, Display},
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::checkpoint::{CheckpointLoader, DEFAULT_POLL_INTERVAL};

/// The result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigErr>;

/// Configuration loading failures.
#[derive(Debug)]
pub enum ConfigErr {
    MissingVar(&'static str),
    InvalidVar { name: &'static str, value: String },
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::MissingVar(name) => write!(f, "missing required setting {name}"),
            ConfigErr::InvalidVar { name, value } => write!(f, "invalid value for {name}: {value:?}"),
            ConfigErr::Io(e) => write!(f, "io error: {e}"),
            ConfigErr::Json(e) => write!(f, "invalid JSON: {e}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Io(e) => Some(e),
            ConfigErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Settings of the checkpoint watcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchConfig {
    /// The log directory the trainers write checkpoints to.
    pub logdir: PathBuf,
    /// Restores this checkpoint instead of following the log directory.
    #[serde(default)]
    pub ckptpath: Option<PathBuf>,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Only report trainable variables whose name matches this pattern.
    #[serde(default)]
    pub var_key: Option<String>,
}

fn default_poll_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

impl WatchConfig {
    /// Reads the configuration from the `LOGDIR`, `CKPT_PATH`, `POLL_SECS` and
    /// `VAR_KEY` environment variables, only `LOGDIR` is required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path` - The JSON file's path.
    ///
    /// # Returns
    /// The configuration or a `ConfigErr` if the file can't be read, parsed or validated.
    pub fn from_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let logdir = lookup("LOGDIR").ok_or(ConfigErr::MissingVar("LOGDIR"))?;

        let poll_secs = match lookup("POLL_SECS") {
            Some(value) => value.parse().map_err(|_| ConfigErr::InvalidVar {
                name: "POLL_SECS",
                value,
            })?,
            None => default_poll_secs(),
        };

        let config = Self {
            logdir: logdir.into(),
            ckptpath: lookup("CKPT_PATH").map(PathBuf::from),
            poll_secs,
            var_key: lookup("VAR_KEY"),
        };

        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.poll_secs == 0 {
            return Err(ConfigErr::InvalidVar {
                name: "POLL_SECS",
                value: self.poll_secs.to_string(),
            });
        }

        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    /// Builds the checkpoint loader these settings describe.
    pub fn loader<Sv>(&self, saver: Sv) -> CheckpointLoader<Sv> {
        CheckpointLoader::new(saver, &self.logdir, self.ckptpath.clone())
            .with_poll_interval(self.poll_interval())
    }
}
