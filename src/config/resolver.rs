//! Precedence resolution for runtime settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables
//! 3. Built-in defaults (the local hostname for the node name)

use std::path::PathBuf;
use std::time::Duration;

use super::schema::{
    CIB_FILE_ENV, COROSYNC_CONF_ENV, DEFAULT_CIB_FILE, DEFAULT_COROSYNC_CONF,
    DEFAULT_PEER_TIMEOUT, NODE_NAME_ENV, PEER_TIMEOUT_ENV,
};
use crate::{Error, Result};

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from CLI flag
    CliFlag,
    /// Value queried from the operating system
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for settings resolution.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub conf_path: Option<PathBuf>,
    pub cib_path: Option<PathBuf>,
    pub peer_timeout_secs: Option<u64>,
    pub node_name: Option<String>,
}

impl SettingsOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.conf_path = Some(path.into());
        self
    }

    pub fn with_cib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cib_path = Some(path.into());
        self
    }

    pub fn with_peer_timeout_secs(mut self, secs: u64) -> Self {
        self.peer_timeout_secs = Some(secs);
        self
    }

    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }
}

/// Fully resolved runtime settings with source tracking.
#[derive(Debug, Clone)]
pub struct Settings {
    /// corosync.conf location
    pub conf_path: Resolved<PathBuf>,
    /// Raw CIB location
    pub cib_path: Resolved<PathBuf>,
    /// Timeout for one remote copy
    pub peer_timeout: Resolved<Duration>,
    /// Name of this node in the cluster
    pub node_name: Resolved<String>,
}

impl Settings {
    /// Resolve settings against the process environment.
    pub fn resolve(overrides: &SettingsOverrides) -> Result<Self> {
        resolve_settings_with(overrides, |name| std::env::var(name).ok())
    }
}

/// The corosync.conf location from the environment or the default.
pub fn conf_path() -> PathBuf {
    resolve_path(None, COROSYNC_CONF_ENV, DEFAULT_COROSYNC_CONF, |name| {
        std::env::var(name).ok()
    })
    .value
}

/// The raw CIB location from the environment or the default.
pub fn cib_path() -> PathBuf {
    resolve_path(None, CIB_FILE_ENV, DEFAULT_CIB_FILE, |name| {
        std::env::var(name).ok()
    })
    .value
}

/// Resolve settings with an explicit environment lookup.
pub fn resolve_settings_with(
    overrides: &SettingsOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let conf_path = resolve_path(
        overrides.conf_path.clone(),
        COROSYNC_CONF_ENV,
        DEFAULT_COROSYNC_CONF,
        &env,
    );
    let cib_path = resolve_path(
        overrides.cib_path.clone(),
        CIB_FILE_ENV,
        DEFAULT_CIB_FILE,
        &env,
    );

    let peer_timeout = if let Some(secs) = overrides.peer_timeout_secs {
        Resolved::new(Duration::from_secs(secs), ValueSource::CliFlag)
    } else if let Some(raw) = non_empty(env(PEER_TIMEOUT_ENV)) {
        let secs: u64 = raw.trim().parse().map_err(|_| {
            Error::InvalidConfig(format!("{} must be a number of seconds, got '{}'", PEER_TIMEOUT_ENV, raw))
        })?;
        Resolved::new(
            Duration::from_secs(secs),
            ValueSource::EnvVar(PEER_TIMEOUT_ENV.to_string()),
        )
    } else {
        Resolved::new(DEFAULT_PEER_TIMEOUT, ValueSource::Default)
    };

    let node_name = if let Some(ref name) = overrides.node_name {
        Resolved::new(name.clone(), ValueSource::CliFlag)
    } else if let Some(name) = non_empty(env(NODE_NAME_ENV)) {
        Resolved::new(name, ValueSource::EnvVar(NODE_NAME_ENV.to_string()))
    } else {
        Resolved::new(local_hostname()?, ValueSource::System)
    };

    Ok(Settings {
        conf_path,
        cib_path,
        peer_timeout,
        node_name,
    })
}

fn resolve_path(
    flag: Option<PathBuf>,
    env_name: &str,
    default: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Resolved<PathBuf> {
    if let Some(path) = flag {
        Resolved::new(path, ValueSource::CliFlag)
    } else if let Some(path) = non_empty(env(env_name)) {
        Resolved::new(PathBuf::from(path), ValueSource::EnvVar(env_name.to_string()))
    } else {
        Resolved::new(PathBuf::from(default), ValueSource::Default)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// The short hostname of this machine, as cluster node names usually are.
#[cfg(unix)]
pub fn local_hostname() -> Result<String> {
    let name = nix::unistd::gethostname()
        .map_err(|e| Error::Other(format!("Failed to get hostname: {}", e)))?;
    let name = name.to_string_lossy();
    Ok(name.split('.').next().unwrap_or_default().to_string())
}

#[cfg(not(unix))]
pub fn local_hostname() -> Result<String> {
    Err(Error::Other(format!(
        "Cannot determine the local node name; set {}",
        NODE_NAME_ENV
    )))
}
