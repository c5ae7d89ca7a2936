//! [`PeerFiles`] over scp.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use super::{HostResult, PeerError, PeerFiles};

/// Never prompt: a host that needs a password fails instead of blocking.
const SCP_ARGS: [&str; 5] = [
    "-qC",
    "-o",
    "PasswordAuthentication=no",
    "-o",
    "StrictHostKeyChecking=no",
];

/// Runs one scp per host in parallel, each bounded by a timeout.
#[derive(Debug, Clone)]
pub struct ScpPeers {
    program: String,
    timeout: Duration,
}

impl ScpPeers {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "scp".to_string(),
            timeout,
        }
    }

    /// Use a different scp binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, host: &str, args: &[String]) -> HostResult<()> {
        debug!(host, program = %self.program, ?args, "Running scp");
        let mut child = Command::new(&self.program)
            .args(SCP_ARGS)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PeerError::new(host, format!("Failed to run {}: {}", self.program, e)))?;

        match child.wait_timeout(self.timeout) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                Err(PeerError::new(
                    host,
                    format!("{} failed ({}): {}", self.program, status, stderr.trim()),
                ))
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(PeerError::new(
                    host,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ))
            }
            Err(e) => {
                let _ = child.kill();
                Err(PeerError::new(host, format!("Failed to wait for {}: {}", self.program, e)))
            }
        }
    }
}

impl PeerFiles for ScpPeers {
    fn fetch(
        &self,
        hosts: &[String],
        remote_path: &Path,
        dest_dir: &Path,
    ) -> BTreeMap<String, HostResult<PathBuf>> {
        fan_out(hosts, |host| {
            let dest = dest_dir.join(host);
            let args = [
                format!("{}:{}", host, remote_path.display()),
                dest.display().to_string(),
            ];
            self.run(host, &args).map(|()| dest)
        })
    }

    fn copy(
        &self,
        local_path: &Path,
        hosts: &[String],
        remote_path: &Path,
    ) -> BTreeMap<String, HostResult<()>> {
        fan_out(hosts, |host| {
            let args = [
                local_path.display().to_string(),
                format!("{}:{}", host, remote_path.display()),
            ];
            self.run(host, &args)
        })
    }
}

/// Run `task` for every host on its own scoped thread.
fn fan_out<T, F>(hosts: &[String], task: F) -> BTreeMap<String, HostResult<T>>
where
    T: Send,
    F: Fn(&str) -> HostResult<T> + Sync,
{
    let task = &task;
    std::thread::scope(|scope| {
        let handles: Vec<_> = hosts
            .iter()
            .map(|host| (host, scope.spawn(move || task(host))))
            .collect();
        handles
            .into_iter()
            .map(|(host, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(PeerError::new(host, "worker thread panicked")));
                (host.clone(), result)
            })
            .collect()
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in scp that copies `src` to `dst`, stripping any `host:` prefix.
    fn fake_scp(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-scp");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    const COPY_BODY: &str = r#"eval src=\${$(($# - 1))}
eval dst=\${$#}
cp "${src#*:}" "${dst#*:}""#;

    #[test]
    fn test_copy_and_fetch_with_stand_in() {
        let dir = TempDir::new().unwrap();
        let program = fake_scp(dir.path(), COPY_BODY);
        let peers = ScpPeers::new(Duration::from_secs(10)).with_program(program);

        let src = dir.path().join("src.conf");
        fs::write(&src, "totem {\n}\n").unwrap();
        let remote = dir.path().join("remote.conf");
        let results = peers.copy(&src, &["node2".to_string()], &remote);
        assert!(results["node2"].is_ok());
        assert_eq!(fs::read_to_string(&remote).unwrap(), "totem {\n}\n");

        let dest = TempDir::new().unwrap();
        let fetched = peers.fetch(&["node2".to_string()], &remote, dest.path());
        let path = fetched["node2"].as_ref().unwrap();
        assert_eq!(path, &dest.path().join("node2"));
        assert!(path.exists());
    }

    #[test]
    fn test_failure_is_per_host() {
        let dir = TempDir::new().unwrap();
        let program = fake_scp(dir.path(), "echo 'Permission denied' >&2\nexit 1");
        let peers = ScpPeers::new(Duration::from_secs(10)).with_program(program);

        let results = peers.copy(
            Path::new("/nonexistent"),
            &["a".to_string(), "b".to_string()],
            Path::new("/tmp/x"),
        );
        assert_eq!(results.len(), 2);
        let err = results["a"].as_ref().unwrap_err();
        assert_eq!(err.host, "a");
        assert!(err.message.contains("Permission denied"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let program = fake_scp(dir.path(), "exec sleep 30");
        let peers = ScpPeers::new(Duration::from_millis(200)).with_program(program);

        let results = peers.copy(Path::new("/x"), &["slow".to_string()], Path::new("/y"));
        assert!(results["slow"].as_ref().unwrap_err().message.contains("timed out"));
    }

    #[test]
    fn test_missing_program() {
        let peers = ScpPeers::new(Duration::from_secs(1)).with_program("/nonexistent/scp");
        let results = peers.copy(Path::new("/x"), &["a".to_string()], Path::new("/y"));
        assert!(results["a"].as_ref().unwrap_err().message.contains("Failed to run"));
    }
}
