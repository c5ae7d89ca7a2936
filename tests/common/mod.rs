//! Common test utilities for coroconf integration tests.
//!
//! Provides `TestEnv` so tests never touch `/etc/corosync` or the real CIB.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// Node name every test environment runs as.
pub const LOCAL_NODE: &str = "node1";

/// A test environment with its own corosync.conf and CIB locations.
///
/// The `coroconf()` method returns a `Command` with the file locations and
/// node name set per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Create an environment whose corosync.conf holds `text`.
    pub fn with_conf(text: &str) -> Self {
        let env = Self::new();
        env.write_conf(text);
        env
    }

    pub fn conf_path(&self) -> PathBuf {
        self.dir.path().join("corosync.conf")
    }

    pub fn cib_path(&self) -> PathBuf {
        self.dir.path().join("cib.xml")
    }

    pub fn write_conf(&self, text: &str) {
        fs::write(self.conf_path(), text).unwrap();
    }

    pub fn write_cib(&self, text: &str) {
        fs::write(self.cib_path(), text).unwrap();
    }

    pub fn read_conf(&self) -> String {
        fs::read_to_string(self.conf_path()).unwrap()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Get a Command for the coroconf binary pointed at this environment.
    pub fn coroconf(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_coroconf"));
        cmd.current_dir(self.dir.path());
        cmd.env("COROSYNC_MAIN_CONFIG_FILE", self.conf_path());
        cmd.env("CIB_file", self.cib_path());
        cmd.env("COROCONF_NODE", LOCAL_NODE);
        cmd.env_remove("COROCONF_LOG");
        cmd
    }

    /// Run coroconf with `args` and parse its JSON output.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.coroconf().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "coroconf {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("Invalid JSON")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A two-node knet cluster with two links.
pub const KNET_TWO_LINKS: &str = "\
totem {
    version: 2
    cluster_name: test
    transport: knet
    interface {
        linknumber: 1
        knet_link_priority: 5
    }
}

nodelist {
    node {
        ring0_addr: 10.0.0.1
        ring1_addr: 10.0.1.1
        name: node1
        nodeid: 1
    }

    node {
        ring0_addr: 10.0.0.2
        ring1_addr: 10.0.1.2
        name: node2
        nodeid: 2
    }
}

quorum {
    provider: corosync_votequorum
    two_node: 1
}
";
