//! Copying corosync.conf between cluster members.
//!
//! The transport is behind [`PeerFiles`] so that migration and distribution
//! can run against a fake in tests. [`ScpPeers`] is the default, non-interactive
//! scp implementation.

mod scp;
#[cfg(test)]
pub(crate) mod fake;

pub use scp::ScpPeers;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::conf::{CorosyncConf, write_atomic};
use crate::config::CONF_FILE_MODE;
use crate::{Error, Result};

/// A failure talking to one host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{host}: {message}")]
pub struct PeerError {
    pub host: String,
    pub message: String,
}

impl PeerError {
    pub fn new(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            message: message.into(),
        }
    }
}

impl From<PeerError> for Error {
    fn from(e: PeerError) -> Self {
        Error::Peer {
            host: e.host,
            message: e.message,
        }
    }
}

/// Outcome for one host.
pub type HostResult<T> = std::result::Result<T, PeerError>;

/// File exchange with other cluster members.
///
/// Implementations authenticate non-interactively and report every host
/// separately; one host failing never aborts the others.
pub trait PeerFiles: Sync {
    /// Fetch `remote_path` from every host into `dest_dir`, returning the
    /// local path of each host's copy.
    fn fetch(
        &self,
        hosts: &[String],
        remote_path: &Path,
        dest_dir: &Path,
    ) -> BTreeMap<String, HostResult<PathBuf>>;

    /// Copy `local_path` to `remote_path` on every host.
    fn copy(
        &self,
        local_path: &Path,
        hosts: &[String],
        remote_path: &Path,
    ) -> BTreeMap<String, HostResult<()>>;
}

/// Result of [`pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullOutcome {
    Unchanged,
    Updated,
}

/// Checksum comparison for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostChecksum {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Copy the local file to the same path on every host.
pub fn push(
    conf_path: &Path,
    peers: &dyn PeerFiles,
    hosts: &[String],
) -> BTreeMap<String, HostResult<()>> {
    let results = peers.copy(conf_path, hosts, conf_path);
    for (host, result) in &results {
        match result {
            Ok(()) => info!(host = %host, path = %conf_path.display(), "Pushed configuration"),
            Err(e) => warn!(host = %host, error = %e.message, "Failed to push configuration"),
        }
    }
    results
}

/// Replace the local file with `host`'s copy if they differ.
///
/// The fetched copy must parse before it is written.
pub fn pull(conf_path: &Path, peers: &dyn PeerFiles, host: &str) -> Result<PullOutcome> {
    let dir = tempfile::TempDir::new()?;
    let fetched = peers
        .fetch(&[host.to_string()], conf_path, dir.path())
        .remove(host)
        .unwrap_or_else(|| Err(PeerError::new(host, "no result from transport")))?;
    let data = fs::read_to_string(&fetched)?;
    CorosyncConf::from_text(&data).map_err(|e| {
        Error::InvalidConfig(format!("{} from {}: {}", conf_path.display(), host, e))
    })?;

    if conf_path.is_file() && sha256_hex(&fs::read(conf_path)?) == sha256_hex(data.as_bytes()) {
        info!(host, "Configuration unchanged");
        return Ok(PullOutcome::Unchanged);
    }
    write_atomic(conf_path, &data, CONF_FILE_MODE)?;
    info!(host, path = %conf_path.display(), "Pulled configuration");
    Ok(PullOutcome::Updated)
}

/// Compare the local file's checksum with every host's copy.
pub fn diff_checksums(
    conf_path: &Path,
    peers: &dyn PeerFiles,
    hosts: &[String],
) -> Result<Vec<HostChecksum>> {
    let local = sha256_hex(&fs::read(conf_path)?);
    let dir = tempfile::TempDir::new()?;
    let mut fetched = peers.fetch(hosts, conf_path, dir.path());

    let mut out = Vec::with_capacity(hosts.len());
    for host in hosts {
        let entry = match fetched.remove(host) {
            Some(Ok(path)) => {
                let checksum = sha256_hex(&fs::read(&path)?);
                HostChecksum {
                    host: host.clone(),
                    matches: checksum == local,
                    checksum: Some(checksum),
                    error: None,
                }
            }
            Some(Err(e)) => HostChecksum {
                host: host.clone(),
                checksum: None,
                matches: false,
                error: Some(e.message),
            },
            None => HostChecksum {
                host: host.clone(),
                checksum: None,
                matches: false,
                error: Some("no result from transport".to_string()),
            },
        };
        out.push(entry);
    }
    Ok(out)
}
