//! In-memory [`PeerFiles`] for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{HostResult, PeerError, PeerFiles};

/// Hosts serve fixed file contents; copies are recorded, not performed.
#[derive(Debug, Default)]
pub(crate) struct FakePeers {
    files: BTreeMap<String, String>,
    unreachable: BTreeSet<String>,
    copied: Mutex<Vec<String>>,
}

impl FakePeers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(mut self, host: &str, contents: &str) -> Self {
        self.files.insert(host.to_string(), contents.to_string());
        self
    }

    pub(crate) fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    /// Hosts that received a copy, in call order.
    pub(crate) fn copied(&self) -> Vec<String> {
        self.copied.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl PeerFiles for FakePeers {
    fn fetch(
        &self,
        hosts: &[String],
        _remote_path: &Path,
        dest_dir: &Path,
    ) -> BTreeMap<String, HostResult<PathBuf>> {
        hosts
            .iter()
            .map(|host| {
                let result = match self.files.get(host) {
                    Some(contents) if !self.unreachable.contains(host) => {
                        let path = dest_dir.join(host);
                        fs::write(&path, contents)
                            .map(|_| path)
                            .map_err(|e| PeerError::new(host, e.to_string()))
                    }
                    _ => Err(PeerError::new(host, "connection refused")),
                };
                (host.clone(), result)
            })
            .collect()
    }

    fn copy(
        &self,
        _local_path: &Path,
        hosts: &[String],
        _remote_path: &Path,
    ) -> BTreeMap<String, HostResult<()>> {
        hosts
            .iter()
            .map(|host| {
                let result = if self.unreachable.contains(host) {
                    Err(PeerError::new(host, "connection refused"))
                } else {
                    if let Ok(mut copied) = self.copied.lock() {
                        copied.push(host.clone());
                    }
                    Ok(())
                };
                (host.clone(), result)
            })
            .collect()
    }
}
