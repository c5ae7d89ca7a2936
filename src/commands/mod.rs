//! Command implementations for the Coroconf CLI.
//!
//! Each command loads what it needs through the library, performs one
//! operation and returns a result that prints as JSON or as text. Mutating
//! commands save the file once, atomically, after every change succeeded.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::conf::{CorosyncConf, TEMPLATE, ValueRef, write_atomic};
use crate::config::{CONF_FILE_MODE, Settings};
use crate::link::{Link, LinkManager, OptionUpdates};
use crate::migration::{self, CheckReport, MigrationReport, MigrationSources};
use crate::nodelist;
use crate::peer::{self, HostChecksum, PullOutcome, ScpPeers};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

fn conf_path(settings: &Settings) -> &Path {
    &settings.conf_path.value
}

fn peers(settings: &Settings) -> ScpPeers {
    ScpPeers::new(settings.peer_timeout.value)
}

// === Path access ===

#[derive(Serialize)]
pub struct GetResult {
    pub path: String,
    pub index: usize,
    pub value: Option<String>,
}

impl CommandResult for GetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.value {
            Some(value) => value.clone(),
            None => format!("{} is not set", self.path),
        }
    }
}

/// Read one scalar. An absent path is not an error.
pub fn get(settings: &Settings, path: &str, index: usize) -> Result<GetResult> {
    let conf = CorosyncConf::load_from(conf_path(settings))?;
    let value = match conf.get(path, index) {
        Some(ValueRef::Scalar(value)) => Some(value.to_string()),
        Some(ValueRef::Section(_)) => {
            return Err(Error::Other(format!(
                "\"{}\" is a section; use `coroconf paths` to list its values",
                path
            )));
        }
        None => None,
    };
    Ok(GetResult {
        path: path.to_string(),
        index,
        value,
    })
}

#[derive(Serialize)]
pub struct GetAllResult {
    pub path: String,
    pub values: Vec<String>,
}

impl CommandResult for GetAllResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.values.join("\n")
    }
}

pub fn get_all(settings: &Settings, path: &str) -> Result<GetAllResult> {
    let conf = CorosyncConf::load_from(conf_path(settings))?;
    Ok(GetAllResult {
        path: path.to_string(),
        values: conf
            .get_all_str(path)
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

#[derive(Serialize)]
pub struct SetResult {
    pub path: String,
    pub index: usize,
    pub value: String,
}

impl CommandResult for SetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Set {}[{}] = {}", self.path, self.index, self.value)
    }
}

pub fn set(settings: &Settings, path: &str, value: &str, index: usize) -> Result<SetResult> {
    let mut conf = CorosyncConf::load_from(conf_path(settings))?;
    conf.set(path, value, index)?;
    conf.save()?;
    Ok(SetResult {
        path: path.to_string(),
        index,
        value: value.to_string(),
    })
}

#[derive(Serialize)]
pub struct RemoveResult {
    pub path: String,
    pub index: usize,
}

impl CommandResult for RemoveResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Removed {}[{}]", self.path, self.index)
    }
}

pub fn remove(settings: &Settings, path: &str, index: usize) -> Result<RemoveResult> {
    let mut conf = CorosyncConf::load_from(conf_path(settings))?;
    conf.remove(path, index)?;
    conf.save()?;
    Ok(RemoveResult {
        path: path.to_string(),
        index,
    })
}

#[derive(Serialize)]
pub struct PathsResult {
    pub paths: Vec<String>,
}

impl CommandResult for PathsResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.paths.join("\n")
    }
}

pub fn paths(settings: &Settings) -> Result<PathsResult> {
    let conf = CorosyncConf::load_from(conf_path(settings))?;
    Ok(PathsResult {
        paths: conf.enumerate_all_paths(),
    })
}

#[derive(Serialize)]
pub struct ValidateResult {
    pub path: PathBuf,
    pub valid: bool,
}

impl CommandResult for ValidateResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("{} is valid", self.path.display())
    }
}

/// Parse the file; an invalid file is reported as an error.
pub fn validate(settings: &Settings) -> Result<ValidateResult> {
    CorosyncConf::load_from(conf_path(settings))?;
    Ok(ValidateResult {
        path: conf_path(settings).to_path_buf(),
        valid: true,
    })
}

#[derive(Serialize)]
pub struct InitResult {
    pub path: PathBuf,
}

impl CommandResult for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Wrote {}", self.path.display())
    }
}

pub fn init(settings: &Settings, force: bool) -> Result<InitResult> {
    let path = conf_path(settings);
    if path.exists() && !force {
        return Err(Error::Other(format!(
            "{} already exists; use --force to overwrite",
            path.display()
        )));
    }
    write_atomic(path, TEMPLATE, CONF_FILE_MODE)?;
    Ok(InitResult {
        path: path.to_path_buf(),
    })
}

// === Links ===

#[derive(Serialize)]
pub struct LinksResult {
    pub links: Vec<Link>,
}

impl CommandResult for LinksResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.links.is_empty() {
            return "No links configured.".to_string();
        }
        let mut out = String::new();
        for link in &self.links {
            let _ = writeln!(out, "Link {}:", link.linknumber);
            for node in &link.nodes {
                let _ = writeln!(out, "  {:>3} {:<16} {}", node.nodeid, node.name, node.addr);
            }
            let options: Vec<String> = link
                .options
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            if !options.is_empty() {
                let _ = writeln!(out, "  options: {}", options.join(" "));
            }
        }
        out.trim_end().to_string()
    }
}

pub fn link_show(settings: &Settings) -> Result<LinksResult> {
    let manager = LinkManager::load_config_file(Some(conf_path(settings)))?;
    Ok(LinksResult {
        links: manager.links()?.into_iter().flatten().collect(),
    })
}

#[derive(Serialize)]
pub struct LinkChangeResult {
    pub action: &'static str,
    pub linknumber: usize,
}

impl CommandResult for LinkChangeResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Link {} {}", self.linknumber, self.action)
    }
}

fn save_links(manager: LinkManager) -> Result<()> {
    manager.into_conf().save()
}

pub fn link_add(
    settings: &Settings,
    addrs: &[(u32, String)],
    options: &[(String, Option<String>)],
) -> Result<LinkChangeResult> {
    let mut manager = LinkManager::load_config_file(Some(conf_path(settings)))?;
    let linknumber = manager.add_link(&addr_map(addrs), &option_map(options))?;
    save_links(manager)?;
    Ok(LinkChangeResult {
        action: "added",
        linknumber,
    })
}

pub fn link_remove(settings: &Settings, linknumber: usize) -> Result<LinkChangeResult> {
    let mut manager = LinkManager::load_config_file(Some(conf_path(settings)))?;
    manager.remove_link(linknumber)?;
    save_links(manager)?;
    Ok(LinkChangeResult {
        action: "removed",
        linknumber,
    })
}

pub fn link_update(
    settings: &Settings,
    linknumber: usize,
    options: &[(String, Option<String>)],
) -> Result<LinkChangeResult> {
    let mut manager = LinkManager::load_config_file(Some(conf_path(settings)))?;
    manager.update_link(linknumber, &option_map(options))?;
    save_links(manager)?;
    Ok(LinkChangeResult {
        action: "updated",
        linknumber,
    })
}

pub fn link_set_addr(
    settings: &Settings,
    linknumber: usize,
    addrs: &[(u32, String)],
) -> Result<LinkChangeResult> {
    let mut manager = LinkManager::load_config_file(Some(conf_path(settings)))?;
    manager.update_node_addr(linknumber, &addr_map(addrs))?;
    save_links(manager)?;
    Ok(LinkChangeResult {
        action: "updated",
        linknumber,
    })
}

fn addr_map(addrs: &[(u32, String)]) -> BTreeMap<u32, String> {
    addrs.iter().cloned().collect()
}

fn option_map(options: &[(String, Option<String>)]) -> OptionUpdates {
    options.iter().cloned().collect()
}

// === Node list ===

#[derive(Serialize)]
pub struct NodeAddResult {
    pub name: String,
    pub nodeid: u32,
}

impl CommandResult for NodeAddResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Added node {} with nodeid {}", self.name, self.nodeid)
    }
}

pub fn node_add(settings: &Settings, name: &str, addrs: &[String]) -> Result<NodeAddResult> {
    let mut conf = CorosyncConf::load_from(conf_path(settings))?;
    let nodeid = nodelist::add_node(&mut conf, name, addrs)?;
    conf.save()?;
    Ok(NodeAddResult {
        name: name.to_string(),
        nodeid,
    })
}

#[derive(Serialize)]
pub struct NodeRemoveResult {
    pub addr: String,
}

impl CommandResult for NodeRemoveResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Removed node {}", self.addr)
    }
}

pub fn node_remove(settings: &Settings, addr: &str) -> Result<NodeRemoveResult> {
    let mut conf = CorosyncConf::load_from(conf_path(settings))?;
    nodelist::remove_node_by_addr(&mut conf, addr)?;
    conf.save()?;
    Ok(NodeRemoveResult {
        addr: addr.to_string(),
    })
}

#[derive(Serialize)]
pub struct FreeIdResult {
    pub nodeid: u32,
}

impl CommandResult for FreeIdResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.nodeid.to_string()
    }
}

pub fn node_free_id(settings: &Settings) -> Result<FreeIdResult> {
    let conf = CorosyncConf::load_from(conf_path(settings))?;
    Ok(FreeIdResult {
        nodeid: nodelist::free_nodeid(&conf)?,
    })
}

// === Migration ===

impl CommandResult for CheckReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.pass {
            return "[PASS]".to_string();
        }
        let mut out = String::new();
        for problem in &self.problems {
            let tag = if problem.is_fatal { "FAIL" } else { "WARN" };
            let _ = writeln!(out, "[{}] {}", tag, problem.title);
            for line in &problem.details {
                let _ = writeln!(out, "       {}", line);
            }
        }
        out.trim_end().to_string()
    }
}

impl CommandResult for MigrationReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = String::new();
        if self.changes.is_empty() {
            out.push_str("Nothing to migrate.\n");
        }
        for change in &self.changes {
            let _ = writeln!(out, "{}", change);
        }
        for (host, error) in &self.push_failures {
            let _ = writeln!(out, "Failed to copy corosync.conf to {}: {}", host, error);
        }
        out.trim_end().to_string()
    }
}

pub fn migrate_check(settings: &Settings) -> Result<CheckReport> {
    let peers = peers(settings);
    Ok(migration::check(&sources(settings, &peers)))
}

/// Check, then migrate. Only fatal problems stop the migration.
pub fn migrate(settings: &Settings) -> Result<MigrationReport> {
    let peers = peers(settings);
    migration::check_and_migrate(&sources(settings, &peers))
}

fn sources<'a>(settings: &Settings, peers: &'a ScpPeers) -> MigrationSources<'a> {
    MigrationSources {
        conf_path: settings.conf_path.value.clone(),
        cib_path: settings.cib_path.value.clone(),
        peers,
        local_node: settings.node_name.value.clone(),
    }
}

// === Distribution ===

#[derive(Serialize)]
pub struct HostOutcome {
    pub host: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct PushResult {
    pub hosts: Vec<HostOutcome>,
}

impl CommandResult for PushResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.hosts
            .iter()
            .map(|h| match &h.error {
                None => format!("{}: OK", h.host),
                Some(e) => format!("{}: FAILED ({})", h.host, e),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn push(settings: &Settings, hosts: &[String]) -> Result<PushResult> {
    let results = peer::push(conf_path(settings), &peers(settings), hosts);
    Ok(PushResult {
        hosts: results
            .into_iter()
            .map(|(host, result)| HostOutcome {
                host,
                ok: result.is_ok(),
                error: result.err().map(|e| e.message),
            })
            .collect(),
    })
}

#[derive(Serialize)]
pub struct PullResult {
    pub host: String,
    pub outcome: PullOutcome,
}

impl CommandResult for PullResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.outcome {
            PullOutcome::Unchanged => "No change.".to_string(),
            PullOutcome::Updated => format!("Updated from {}", self.host),
        }
    }
}

pub fn pull(settings: &Settings, host: &str) -> Result<PullResult> {
    let outcome = peer::pull(conf_path(settings), &peers(settings), host)?;
    Ok(PullResult {
        host: host.to_string(),
        outcome,
    })
}

#[derive(Serialize)]
pub struct DiffResult {
    pub hosts: Vec<HostChecksum>,
}

impl CommandResult for DiffResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.hosts
            .iter()
            .map(|h| match (&h.error, h.matches) {
                (Some(e), _) => format!("{}: FAILED ({})", h.host, e),
                (None, true) => format!("{}: OK", h.host),
                (None, false) => format!("{}: DIFFERS", h.host),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn diff(settings: &Settings, hosts: &[String]) -> Result<DiffResult> {
    Ok(DiffResult {
        hosts: peer::diff_checksums(conf_path(settings), &peers(settings), hosts)?,
    })
}
