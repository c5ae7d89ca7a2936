//! Pre-flight checks run before a migration is attempted.

use serde::Serialize;
use tracing::debug;

use super::{MigrationSources, TransportPlan, needs_cib_names};
use crate::cib::Cib;
use crate::conf::CorosyncConf;

/// One reason the migration should not start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub is_fatal: bool,
    pub title: String,
    pub details: Vec<String>,
}

/// Outcome of [`check`]. `pass` is true when no problem was found.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub pass: bool,
    pub problems: Vec<Problem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportPlan>,
}

impl CheckReport {
    fn problem(&mut self, is_fatal: bool, title: &str, details: Vec<String>) {
        debug!(is_fatal, title, "Migration check failed");
        self.pass = false;
        self.problems.push(Problem {
            is_fatal,
            title: title.to_string(),
            details,
        });
    }

    pub fn has_fatal(&self) -> bool {
        self.problems.iter().any(|p| p.is_fatal)
    }
}

/// Inspect the local file and the CIB without changing anything.
pub fn check(sources: &MigrationSources<'_>) -> CheckReport {
    let mut report = CheckReport {
        pass: true,
        problems: Vec::new(),
        transport: None,
    };

    let conf = match CorosyncConf::load_from(&sources.conf_path) {
        Ok(conf) => conf,
        Err(e) => {
            report.problem(true, "Cannot read corosync.conf", vec![e.to_string()]);
            return report;
        }
    };
    if !conf.tree().contains_key("totem") {
        report.problem(
            true,
            "Missing totem section",
            vec![format!("{} has no totem section", sources.conf_path.display())],
        );
        return report;
    }

    let plan = match TransportPlan::detect(&conf) {
        Ok(plan) => plan,
        Err(e) => {
            report.problem(true, "Unsupported transport", vec![e.to_string()]);
            return report;
        }
    };
    report.transport = Some(plan);

    if plan == TransportPlan::Multicast || needs_cib_names(&conf) {
        match Cib::load(&sources.cib_path).and_then(|cib| cib.nodes()) {
            Ok(nodes) if nodes.is_empty() => report.problem(
                true,
                "No nodes in CIB",
                vec![format!(
                    "{} lists no nodes to rebuild the node list from",
                    sources.cib_path.display()
                )],
            ),
            Ok(_) => {}
            Err(e) => report.problem(
                true,
                "Cannot read CIB",
                vec![
                    e.to_string(),
                    "The node list cannot be completed without the CIB".to_string(),
                ],
            ),
        }
    }

    if conf.is_qdevice_configured() && conf.is_qdevice_tls_on() {
        report.problem(
            false,
            "Quorum device uses TLS",
            vec!["Certificates are not migrated; verify the qdevice setup afterwards".to_string()],
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::fake::FakePeers;
    use std::fs;
    use tempfile::TempDir;

    fn run(conf: Option<&str>, cib: Option<&str>) -> CheckReport {
        let dir = TempDir::new().unwrap();
        let conf_path = dir.path().join("corosync.conf");
        let cib_path = dir.path().join("cib.xml");
        if let Some(text) = conf {
            fs::write(&conf_path, text).unwrap();
        }
        if let Some(text) = cib {
            fs::write(&cib_path, text).unwrap();
        }
        let peers = FakePeers::new();
        let sources = MigrationSources {
            conf_path,
            cib_path,
            peers: &peers,
            local_node: "node1".to_string(),
        };
        check(&sources)
    }

    #[test]
    fn test_check_passes_for_unicast() {
        let report = run(
            Some("totem {\n    transport: udpu\n}\nnodelist {\n    node {\n        ring0_addr: 10.0.0.1\n        name: node1\n        nodeid: 1\n    }\n}\n"),
            None,
        );
        assert!(report.pass);
        assert_eq!(report.transport, Some(TransportPlan::Unicast));
    }

    #[test]
    fn test_check_missing_file() {
        let report = run(None, None);
        assert!(!report.pass);
        assert!(report.has_fatal());
        assert_eq!(report.problems[0].title, "Cannot read corosync.conf");
    }

    #[test]
    fn test_check_missing_totem() {
        let report = run(Some("quorum {\n}\n"), None);
        assert_eq!(report.problems[0].title, "Missing totem section");
    }

    #[test]
    fn test_check_multicast_needs_cib() {
        let conf = "totem {\n    transport: udp\n}\n";
        let report = run(Some(conf), None);
        assert!(report.has_fatal());
        assert_eq!(report.problems[0].title, "Cannot read CIB");

        let cib = r#"<cib><configuration><nodes><node id="1" uname="node1"/></nodes></configuration></cib>"#;
        assert!(run(Some(conf), Some(cib)).pass);
    }

    #[test]
    fn test_check_qdevice_tls_is_not_fatal() {
        let report = run(
            Some("totem {\n    transport: knet\n}\nnodelist {\n    node {\n        nodeid: 1\n    }\n}\nquorum {\n    device {\n        model: net\n        net {\n            tls: on\n        }\n    }\n}\n"),
            None,
        );
        assert!(!report.pass);
        assert!(!report.has_fatal());
    }
}
