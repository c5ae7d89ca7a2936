//! corosync 2 to corosync 3 configuration migration.
//!
//! Migration runs in two phases. [`Prerequisites::gather`] does every read
//! that leaves the file: the CIB node list and, for multicast clusters, each
//! member's own copy of corosync.conf. [`migrate_tree`] then rewrites the tree
//! using only what was gathered, so the transform itself needs no network.
//!
//! The steps are idempotent: migrating an already migrated file changes
//! nothing.

mod check;

pub use check::{CheckReport, Problem, check};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cib::Cib;
use crate::conf::{CorosyncConf, write_atomic};
use crate::config::CONF_FILE_MODE;
use crate::nodelist::parse_nodeid;
use crate::peer::{self, PeerFiles};
use crate::tree::ConfigTree;
use crate::{Error, Result};

/// Current default for `totem.crypto_hash`.
pub const DEFAULT_CRYPTO_HASH: &str = "sha256";

/// Legacy default for `totem.crypto_hash`.
pub const LEGACY_CRYPTO_HASH: &str = "sha1";

/// Per-interface keys only meaningful for the UDP transports.
const UDP_ONLY_KEYS: [&str; 4] = ["mcastaddr", "bindnetaddr", "broadcast", "ttl"];

/// What the transport step will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPlan {
    /// Already knet, or a corosync 3 file without a declared transport.
    Current,
    /// Unicast UDP, or UDP with an explicit node list: rewrite fields only.
    Unicast,
    /// Multicast UDP without a node list: rewrite fields and rebuild the node list.
    Multicast,
}

impl TransportPlan {
    /// Decide the transport step from the file's fingerprints.
    pub fn detect(conf: &CorosyncConf) -> Result<Self> {
        let has_nodelist = !conf.get_all("nodelist.node").is_empty();
        match conf.get_str("totem.transport", 0) {
            Some("knet") => Ok(TransportPlan::Current),
            Some("udpu") => Ok(TransportPlan::Unicast),
            Some("udp") if has_nodelist => Ok(TransportPlan::Unicast),
            Some("udp") => Ok(TransportPlan::Multicast),
            Some(other) => Err(Error::Migration(format!(
                "unsupported transport \"{}\"",
                other
            ))),
            // corosync 2 defaulted to udp; a node list means a corosync 3 file
            None if has_nodelist => Ok(TransportPlan::Current),
            None => Ok(TransportPlan::Multicast),
        }
    }
}

/// A node list entry rebuilt from a member's own configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuiltNode {
    pub nodeid: u32,
    pub name: String,
    /// `ring{i}_addr` values, in interface order.
    pub addrs: Vec<String>,
}

/// Data from outside the file that migration needs.
#[derive(Debug, Clone, Default)]
pub struct Prerequisites {
    /// Node list for a multicast cluster.
    pub nodelist: Option<Vec<RebuiltNode>>,
    /// CIB node names by id, for node entries that lack a name.
    pub cib_names: Option<BTreeMap<u32, String>>,
}

/// Where to find the file, the CIB and the other members.
pub struct MigrationSources<'a> {
    pub conf_path: PathBuf,
    pub cib_path: PathBuf,
    pub peers: &'a dyn PeerFiles,
    /// This node's name; its file is read locally instead of fetched.
    pub local_node: String,
}

impl Prerequisites {
    /// Read everything `tree` will need from the CIB and the other members.
    ///
    /// Fails if any member's data cannot be obtained; a partial node list is
    /// never returned.
    pub fn gather(tree: &ConfigTree, sources: &MigrationSources<'_>) -> Result<Self> {
        let conf = CorosyncConf::from_tree(tree.clone());
        let plan = TransportPlan::detect(&conf)?;
        let mut prereq = Prerequisites::default();
        if plan != TransportPlan::Multicast && !needs_cib_names(&conf) {
            return Ok(prereq);
        }

        let cib_nodes = Cib::load(&sources.cib_path)?.nodes()?;
        if cib_nodes.is_empty() {
            return Err(Error::Migration(format!(
                "no nodes found in {}",
                sources.cib_path.display()
            )));
        }
        prereq.cib_names = Some(
            cib_nodes
                .iter()
                .map(|n| (n.node_id, n.uname.clone()))
                .collect(),
        );

        if plan == TransportPlan::Multicast {
            info!("Generating nodelist according to CIB");
            let remote_hosts: Vec<String> = cib_nodes
                .iter()
                .map(|n| n.uname.clone())
                .filter(|name| *name != sources.local_node)
                .collect();
            let dir = tempfile::Builder::new()
                .prefix("coroconf-migration-")
                .tempdir()?;
            let mut fetched = sources
                .peers
                .fetch(&remote_hosts, &sources.conf_path, dir.path());

            let mut nodelist = Vec::with_capacity(cib_nodes.len());
            for node in &cib_nodes {
                let path = if node.uname == sources.local_node {
                    sources.conf_path.clone()
                } else {
                    fetched
                        .remove(&node.uname)
                        .unwrap_or_else(|| Err(peer::PeerError::new(&node.uname, "no result from transport")))
                        .map_err(|e| {
                            Error::Migration(format!(
                                "cannot fetch corosync.conf from {}: {}",
                                e.host, e.message
                            ))
                        })?
                };
                let addrs = bind_addresses(&node.uname, &path)?;
                info!(nodeid = node.node_id, name = %node.uname, ?addrs, "Rebuilt node entry");
                nodelist.push(RebuiltNode {
                    nodeid: node.node_id,
                    name: node.uname.clone(),
                    addrs,
                });
            }
            prereq.nodelist = Some(nodelist);
        }
        Ok(prereq)
    }
}

/// `bindnetaddr` of every interface in a member's configuration.
fn bind_addresses(host: &str, path: &Path) -> Result<Vec<String>> {
    let conf = CorosyncConf::load_from(path)
        .map_err(|e| Error::Migration(format!("corosync.conf of {}: {}", host, e)))?;
    let interfaces = conf.get_all("totem.interface");
    if interfaces.is_empty() {
        return Err(Error::Migration(format!(
            "corosync.conf of {} has no totem.interface",
            host
        )));
    }
    interfaces
        .iter()
        .enumerate()
        .map(|(i, interface)| {
            interface
                .as_section()
                .and_then(|t| t.get_str("bindnetaddr"))
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Migration(format!(
                        "corosync.conf of {} has no bindnetaddr in interface {}",
                        host, i
                    ))
                })
        })
        .collect()
}

fn needs_cib_names(conf: &CorosyncConf) -> bool {
    let nodes: Vec<&ConfigTree> = conf
        .get_all("nodelist.node")
        .into_iter()
        .filter_map(|v| v.as_section())
        .collect();
    nodes.iter().any(|n| n.contains_key("ring1_addr")) && nodes.iter().any(|n| !n.contains_key("name"))
}

/// What a migration did.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub transport: TransportPlan,
    /// One line per change, in the order applied.
    pub changes: Vec<String>,
    /// Hosts the migrated file could not be copied to.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub push_failures: BTreeMap<String, String>,
}

impl MigrationReport {
    fn note(&mut self, change: String) {
        info!("{}", change);
        self.changes.push(change);
    }
}

/// Rewrite `tree` into the corosync 3 schema.
///
/// `tree` is left untouched when any step fails.
pub fn migrate_tree(tree: &mut ConfigTree, prereq: &Prerequisites) -> Result<MigrationReport> {
    if !tree.contains_key("totem") {
        return Err(Error::Migration("no totem section".to_string()));
    }
    let mut conf = CorosyncConf::from_tree(tree.clone());
    let transport = TransportPlan::detect(&conf)?;
    let mut report = MigrationReport {
        transport,
        changes: Vec::new(),
        push_failures: BTreeMap::new(),
    };

    migrate_transport(&mut conf, transport, prereq, &mut report)?;
    migrate_crypto(&mut conf, &mut report)?;
    migrate_rrp(&mut conf, prereq, &mut report)?;

    *tree = conf.into_tree();
    Ok(report)
}

fn migrate_transport(
    conf: &mut CorosyncConf,
    plan: TransportPlan,
    prereq: &Prerequisites,
    report: &mut MigrationReport,
) -> Result<()> {
    if plan == TransportPlan::Current {
        return Ok(());
    }
    conf.set("totem.transport", "knet", 0)?;
    conf.set("totem.knet_compression_model", "none", 0)?;

    let interfaces = conf.get_all("totem.interface").len();
    for index in 0..interfaces {
        for key in UDP_ONLY_KEYS {
            let path = format!("totem.interface.{}", key);
            if conf.get(&path, index).is_some() {
                conf.remove(&path, index)?;
            }
        }
        if let Some(ring) = conf
            .get_str("totem.interface.ringnumber", index)
            .map(str::to_string)
        {
            conf.remove("totem.interface.ringnumber", index)?;
            conf.set("totem.interface.linknumber", ring, index)?;
        }
    }

    if plan == TransportPlan::Multicast {
        if !conf.get_all("nodelist.node").is_empty() {
            return Err(Error::Migration(
                "multicast configuration already has a node list".to_string(),
            ));
        }
        let nodes = prereq.nodelist.as_ref().ok_or_else(|| {
            Error::Migration("node list must be rebuilt from the CIB first".to_string())
        })?;
        for (index, node) in nodes.iter().enumerate() {
            for (ring, addr) in node.addrs.iter().enumerate() {
                conf.set(&format!("nodelist.node.ring{}_addr", ring), addr.as_str(), index)?;
            }
            conf.set("nodelist.node.name", node.name.as_str(), index)?;
            conf.set("nodelist.node.nodeid", node.nodeid.to_string(), index)?;
        }
        report.note(format!("Generated nodelist with {} nodes", nodes.len()));
    }

    if conf.get("quorum.expected_votes", 0).is_some() {
        conf.remove("quorum.expected_votes", 0)?;
        report.note("Unset quorum.expected_votes".to_string());
    }
    report.note("Upgraded totem.transport to knet".to_string());
    Ok(())
}

fn migrate_crypto(conf: &mut CorosyncConf, report: &mut MigrationReport) -> Result<()> {
    match conf.get_str("totem.crypto_hash", 0) {
        Some(LEGACY_CRYPTO_HASH) => {
            conf.set("totem.crypto_hash", DEFAULT_CRYPTO_HASH, 0)?;
            report.note(format!(
                "Upgraded totem.crypto_hash from \"{}\" to \"{}\"",
                LEGACY_CRYPTO_HASH, DEFAULT_CRYPTO_HASH
            ));
        }
        None => {
            conf.set("totem.crypto_hash", DEFAULT_CRYPTO_HASH, 0)?;
            report.note(format!("Set totem.crypto_hash to \"{}\"", DEFAULT_CRYPTO_HASH));
        }
        Some(_) => {}
    }
    Ok(())
}

fn migrate_rrp(
    conf: &mut CorosyncConf,
    prereq: &Prerequisites,
    report: &mut MigrationReport,
) -> Result<()> {
    let nodes: Vec<(Option<String>, Option<String>, bool)> = conf
        .get_all("nodelist.node")
        .iter()
        .filter_map(|v| v.as_section())
        .map(|n| {
            (
                n.get_str("nodeid").map(str::to_string),
                n.get_str("name").map(str::to_string),
                n.contains_key("ring1_addr"),
            )
        })
        .collect();
    if !nodes.iter().any(|(_, _, rrp)| *rrp) {
        return Ok(());
    }

    if let Some(mode) = conf.get_str("totem.rrp_mode", 0).map(str::to_string) {
        conf.remove("totem.rrp_mode", 0)?;
        report.note(format!("Removed totem.rrp_mode ({})", mode));
        if mode == "active" {
            conf.set("totem.link_mode", "active", 0)?;
            report.note("Set totem.link_mode to active".to_string());
        }
    }

    for (index, (nodeid, name, _)) in nodes.iter().enumerate() {
        if name.is_some() {
            continue;
        }
        let nodeid = nodeid
            .as_deref()
            .ok_or_else(|| Error::Migration(format!("node entry {} has no nodeid", index)))
            .and_then(parse_nodeid)?;
        let names = prereq.cib_names.as_ref().ok_or_else(|| {
            Error::Migration("node names must be read from the CIB first".to_string())
        })?;
        let name = names
            .get(&nodeid)
            .ok_or_else(|| Error::Migration(format!("node {} not found in CIB", nodeid)))?;
        conf.set("nodelist.node.name", name.as_str(), index)?;
        report.note(format!("Set name of node {} to {}", nodeid, name));
    }
    Ok(())
}

/// Migrate the file at `sources.conf_path` and copy it to the other members.
///
/// The original is kept as `<file>.bak`. A member that cannot be reached is
/// logged and listed in the report; it does not fail the migration.
pub fn migrate_file(sources: &MigrationSources<'_>) -> Result<MigrationReport> {
    let path = &sources.conf_path;
    let conf = CorosyncConf::load_from(path)?;
    info!(path = %path.display(), "Migrating corosync configuration");
    let prereq = Prerequisites::gather(conf.tree(), sources)?;
    let mut tree = conf.into_tree();
    let mut report = migrate_tree(&mut tree, &prereq)?;

    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    fs::copy(path, &backup)?;
    write_atomic(path, &tree.to_text(), CONF_FILE_MODE)?;
    info!(path = %path.display(), "Finished migrating corosync configuration");

    let migrated = CorosyncConf::from_tree(tree);
    let hosts: Vec<String> = migrated
        .get_all_str("nodelist.node.name")
        .into_iter()
        .filter(|name| *name != sources.local_node)
        .map(str::to_string)
        .collect();
    if hosts.is_empty() {
        warn!("No other cluster members to copy the configuration to");
    }
    for (host, result) in peer::push(path, sources.peers, &hosts) {
        if let Err(e) = result {
            error!(host = %host, error = %e.message, "Failed to copy corosync.conf");
            report.push_failures.insert(host, e.message);
        }
    }
    Ok(report)
}

/// Run [`check`], then [`migrate_file`].
///
/// Only fatal problems stop the migration. The others are logged as warnings.
pub fn check_and_migrate(sources: &MigrationSources<'_>) -> Result<MigrationReport> {
    let report = check(sources);
    if report.has_fatal() {
        let titles: Vec<&str> = report
            .problems
            .iter()
            .filter(|p| p.is_fatal)
            .map(|p| p.title.as_str())
            .collect();
        return Err(Error::Migration(format!(
            "Unable to start migration: {}",
            titles.join("; ")
        )));
    }
    for problem in &report.problems {
        warn!(title = %problem.title, details = ?problem.details, "Migrating despite warning");
    }
    migrate_file(sources)
}
