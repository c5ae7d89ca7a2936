//! knet link topology.
//!
//! Links are not stored in corosync.conf as such. Link `n` exists when every
//! node entry carries a `ring{n}_addr`, and its tuning options live in the
//! `totem.interface` entry whose `linknumber` is `n`. [`LinkManager`] rebuilds
//! that view from the tree on every call and routes every change back through
//! [`CorosyncConf`], so the tree stays the only source of truth.
//!
//! Every mutation is applied to a staged copy and committed only when all of
//! it succeeded.

mod options;

pub use options::{LinkOptions, OptionUpdates};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::conf::CorosyncConf;
use crate::nodelist::{canonical_addr, parse_nodeid};
use crate::tree::ConfigTree;
use crate::{Error, Result};

/// Maximum number of knet links.
pub const KNET_LINK_NUM_LIMIT: usize = 8;

/// One member's address on a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkNode {
    pub nodeid: u32,
    pub name: String,
    pub addr: String,
}

/// A link derived from the node list and interface entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub linknumber: usize,
    /// Sorted by nodeid.
    pub nodes: Vec<LinkNode>,
    #[serde(flatten)]
    pub options: LinkOptions,
}

/// Reads and edits the link topology of a knet configuration.
#[derive(Debug, Clone)]
pub struct LinkManager {
    conf: CorosyncConf,
}

impl LinkManager {
    pub fn new(conf: CorosyncConf) -> Self {
        Self { conf }
    }

    /// Load a configuration file, or the default one when `path` is `None`.
    pub fn load_config_file(path: Option<&Path>) -> Result<Self> {
        let conf = match path {
            Some(path) => CorosyncConf::load_from(path)?,
            None => CorosyncConf::load()?,
        };
        Ok(Self::new(conf))
    }

    pub fn conf(&self) -> &CorosyncConf {
        &self.conf
    }

    pub fn into_conf(self) -> CorosyncConf {
        self.conf
    }

    /// `totem.transport`, defaulting to knet.
    pub fn totem_transport(&self) -> &str {
        self.conf.get_str("totem.transport", 0).unwrap_or("knet")
    }

    /// All link slots, indexed by linknumber. Always [`KNET_LINK_NUM_LIMIT`] long.
    pub fn links(&self) -> Result<Vec<Option<Link>>> {
        derive_links(&self.conf)
    }

    /// Change the tuning options of an existing link.
    pub fn update_link(&mut self, linknumber: usize, updates: &OptionUpdates) -> Result<&ConfigTree> {
        let links = self.links()?;
        existing(&links, linknumber)?;
        let changes = LinkOptions::validate_updates(updates)?;

        let mut staged = self.conf.clone();
        apply_options(&mut staged, linknumber, &changes)?;
        self.commit(staged);
        info!(linknumber, options = changes.len(), "Updated link options");
        Ok(self.conf.tree())
    }

    /// Change the addresses of some members on an existing link.
    pub fn update_node_addr(
        &mut self,
        linknumber: usize,
        node_addresses: &BTreeMap<u32, String>,
    ) -> Result<&ConfigTree> {
        let links = self.links()?;
        let roster = existing(&links, linknumber)?.nodes.clone();

        let mut staged = self.conf.clone();
        upsert_node_addr(&mut staged, &links, linknumber, roster, node_addresses)?;
        self.commit(staged);
        info!(linknumber, nodes = node_addresses.len(), "Updated node addresses");
        Ok(self.conf.tree())
    }

    /// Add a link at the lowest free linknumber and return that number.
    ///
    /// `node_addresses` must give an address for every member.
    pub fn add_link(
        &mut self,
        node_addresses: &BTreeMap<u32, String>,
        options: &OptionUpdates,
    ) -> Result<usize> {
        let links = self.links()?;
        let linknumber = links
            .iter()
            .position(Option::is_none)
            .ok_or(Error::LinkLimitReached(KNET_LINK_NUM_LIMIT))?;
        let roster: Vec<LinkNode> = links
            .iter()
            .flatten()
            .next()
            .ok_or_else(|| Error::NotFound("nodelist".to_string()))?
            .nodes
            .iter()
            .map(|node| LinkNode {
                addr: String::new(),
                ..node.clone()
            })
            .collect();

        let missing: Vec<u32> = roster
            .iter()
            .map(|node| node.nodeid)
            .filter(|id| !node_addresses.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingNodes(missing));
        }
        let changes = LinkOptions::validate_updates(options)?;

        let mut staged = self.conf.clone();
        upsert_node_addr(&mut staged, &links, linknumber, roster, node_addresses)?;
        apply_options(&mut staged, linknumber, &changes)?;
        self.commit(staged);
        info!(linknumber, "Added link");
        Ok(linknumber)
    }

    /// Remove a link. Remaining links keep their numbers.
    pub fn remove_link(&mut self, linknumber: usize) -> Result<&ConfigTree> {
        let links = self.links()?;
        existing(&links, linknumber)?;
        if links.iter().flatten().count() <= 1 {
            return Err(Error::LastLink);
        }

        let mut staged = self.conf.clone();
        let ring = format!("nodelist.node.ring{}_addr", linknumber);
        let node_count = staged.get_all("nodelist.node").len();
        for index in 0..node_count {
            staged.remove(&ring, index)?;
        }
        for index in interface_positions(&staged, linknumber).into_iter().rev() {
            staged.remove("totem.interface", index)?;
        }
        self.commit(staged);
        info!(linknumber, "Removed link");
        Ok(self.conf.tree())
    }

    fn commit(&mut self, staged: CorosyncConf) {
        self.conf = staged;
    }
}

fn existing(links: &[Option<Link>], linknumber: usize) -> Result<&Link> {
    links
        .get(linknumber)
        .and_then(Option::as_ref)
        .ok_or(Error::LinkNotFound(linknumber))
}

fn derive_links(conf: &CorosyncConf) -> Result<Vec<Option<Link>>> {
    let transport = conf.get_str("totem.transport", 0).unwrap_or("knet");
    if transport != "knet" {
        return Err(Error::UnsupportedTransport(transport.to_string()));
    }

    let mut links: Vec<Option<Link>> = vec![None; KNET_LINK_NUM_LIMIT];
    let entries: Vec<&ConfigTree> = conf
        .get_all("nodelist.node")
        .into_iter()
        .filter_map(|v| v.as_section())
        .collect();
    let Some(first) = entries.first() else {
        return Ok(links);
    };

    let mut members = Vec::with_capacity(entries.len());
    for (index, node) in entries.iter().enumerate() {
        let nodeid = node
            .get_str("nodeid")
            .ok_or_else(|| Error::InvalidConfig(format!("node entry {} has no nodeid", index)))
            .and_then(parse_nodeid)?;
        let name = node
            .get_str("name")
            .ok_or_else(|| Error::InvalidConfig(format!("node {} has no name", nodeid)))?;
        members.push((nodeid, name, *node));
    }

    for (i, slot) in links.iter_mut().enumerate() {
        let key = format!("ring{}_addr", i);
        let present = first.contains_key(&key);
        let mut nodes = Vec::with_capacity(members.len());
        for (nodeid, name, node) in &members {
            match (present, node.get_str(&key)) {
                (true, Some(addr)) => nodes.push(LinkNode {
                    nodeid: *nodeid,
                    name: name.to_string(),
                    addr: addr.to_string(),
                }),
                (false, None) => {}
                _ => {
                    return Err(Error::InconsistentLink {
                        linknumber: i,
                        nodeid: *nodeid,
                    });
                }
            }
        }
        if present {
            nodes.sort_by_key(|node| node.nodeid);
            *slot = Some(Link {
                linknumber: i,
                nodes,
                options: LinkOptions::default(),
            });
        }
    }

    for interface in conf.get_all("totem.interface") {
        let Some(interface) = interface.as_section() else {
            continue;
        };
        let Some(linknumber) = interface_linknumber(interface) else {
            continue;
        };
        if let Some(Some(link)) = links.get_mut(linknumber) {
            link.options = LinkOptions::from_tree(interface)?;
        }
    }
    debug!(links = links.iter().flatten().count(), "Derived links");
    Ok(links)
}

fn interface_linknumber(interface: &ConfigTree) -> Option<usize> {
    interface.get_str("linknumber")?.trim().parse().ok()
}

/// Indices of the `totem.interface` entries describing `linknumber`.
fn interface_positions(conf: &CorosyncConf, linknumber: usize) -> Vec<usize> {
    conf.get_all("totem.interface")
        .iter()
        .enumerate()
        .filter(|(_, v)| v.as_section().and_then(interface_linknumber) == Some(linknumber))
        .map(|(i, _)| i)
        .collect()
}

/// Write validated option changes into the link's interface entry.
///
/// An entry left with nothing but its `linknumber` is removed, and so is the
/// `interface` key once no entries remain.
fn apply_options(
    conf: &mut CorosyncConf,
    linknumber: usize,
    changes: &[(&'static str, Option<String>)],
) -> Result<()> {
    let index = match interface_positions(conf, linknumber).first() {
        Some(index) => *index,
        None => {
            if changes.iter().all(|(_, value)| value.is_none()) {
                return Ok(());
            }
            let index = conf.get_all("totem.interface").len();
            conf.set("totem.interface.linknumber", linknumber.to_string(), index)?;
            index
        }
    };

    for (name, value) in changes {
        let path = format!("totem.interface.{}", name);
        match value {
            Some(value) => conf.set(&path, value.as_str(), index)?,
            None => {
                if conf.get(&path, index).is_some() {
                    conf.remove(&path, index)?;
                }
            }
        }
    }

    let only_linknumber = conf
        .get("totem.interface", index)
        .and_then(|v| v.as_section())
        .is_some_and(|tree| tree.len() == 1 && tree.contains_key("linknumber"));
    if only_linknumber {
        conf.remove("totem.interface", index)?;
    }
    Ok(())
}

/// Assign addresses on `linknumber`, keeping addresses unique across all links.
///
/// `roster` is the link's member list with current addresses (empty for a
/// link being created). Each assignment is visible to the uniqueness check of
/// the next one.
fn upsert_node_addr(
    conf: &mut CorosyncConf,
    links: &[Option<Link>],
    linknumber: usize,
    mut roster: Vec<LinkNode>,
    node_addresses: &BTreeMap<u32, String>,
) -> Result<()> {
    let mut owners: HashMap<String, u32> = links
        .iter()
        .flatten()
        .flat_map(|link| link.nodes.iter())
        .filter(|node| !node.addr.is_empty())
        .map(|node| (canonical_addr(&node.addr), node.nodeid))
        .collect();

    for (&nodeid, addr) in node_addresses {
        let found = roster
            .iter_mut()
            .find(|node| node.nodeid == nodeid)
            .ok_or(Error::UnknownNodeId(nodeid))?;
        let canonical = canonical_addr(addr);
        if (found.addr.is_empty() || canonical_addr(&found.addr) != canonical)
            && let Some(&owner) = owners.get(&canonical)
        {
            return Err(Error::DuplicatedNodeAddress {
                address: addr.clone(),
                node1: nodeid,
                node2: owner,
            });
        }
        found.addr = addr.clone();
        owners.insert(canonical, nodeid);
    }

    let ids: Vec<Option<u32>> = conf
        .get_all("nodelist.node")
        .iter()
        .map(|v| {
            v.as_section()
                .and_then(|n| n.get_str("nodeid"))
                .and_then(|id| parse_nodeid(id).ok())
        })
        .collect();
    let key = format!("nodelist.node.ring{}_addr", linknumber);
    for (index, nodeid) in ids.into_iter().enumerate() {
        if let Some(addr) = nodeid.and_then(|id| node_addresses.get(&id)) {
            conf.set(&key, addr.as_str(), index)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_LINKS: &str = "totem {
    version: 2
    transport: knet
    interface {
        linknumber: 1
        knet_link_priority: 10
    }
}

nodelist {
    node {
        ring0_addr: 10.0.0.2
        ring1_addr: 192.168.0.2
        name: node2
        nodeid: 2
    }
    node {
        ring0_addr: 10.0.0.1
        ring1_addr: 192.168.0.1
        name: node1
        nodeid: 1
    }
}
";

    fn manager(text: &str) -> LinkManager {
        LinkManager::new(CorosyncConf::from_text(text).unwrap())
    }

    fn addrs(pairs: &[(u32, &str)]) -> BTreeMap<u32, String> {
        pairs.iter().map(|(id, a)| (*id, a.to_string())).collect()
    }

    fn opts(pairs: &[(&str, Option<&str>)]) -> OptionUpdates {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_links_derivation() {
        let links = manager(TWO_LINKS).links().unwrap();
        assert_eq!(links.len(), KNET_LINK_NUM_LIMIT);
        assert!(links[2..].iter().all(Option::is_none));

        let link0 = links[0].as_ref().unwrap();
        assert_eq!(link0.linknumber, 0);
        // Sorted by nodeid regardless of file order
        assert_eq!(link0.nodes[0].nodeid, 1);
        assert_eq!(link0.nodes[0].addr, "10.0.0.1");
        assert_eq!(link0.nodes[1].name, "node2");
        assert!(link0.options.is_empty());

        let link1 = links[1].as_ref().unwrap();
        assert_eq!(link1.options.knet_link_priority, Some(10));
    }

    #[test]
    fn test_links_requires_knet() {
        let mgr = manager("totem {\n    transport: udpu\n}\n");
        assert!(matches!(mgr.links(), Err(Error::UnsupportedTransport(t)) if t == "udpu"));
    }

    #[test]
    fn test_links_without_nodelist() {
        let links = manager("totem {\n    version: 2\n}\n").links().unwrap();
        assert_eq!(links.len(), KNET_LINK_NUM_LIMIT);
        assert!(links.iter().all(Option::is_none));
    }

    #[test]
    fn test_links_rejects_incomplete_node() {
        let mgr = manager("nodelist {\n    node {\n        ring0_addr: 10.0.0.1\n        nodeid: 1\n    }\n}\n");
        assert!(matches!(mgr.links(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_links_rejects_inconsistent_rings() {
        let mgr = manager(
            "nodelist {
    node {
        ring0_addr: 10.0.0.1
        ring1_addr: 10.0.1.1
        name: a
        nodeid: 1
    }
    node {
        ring0_addr: 10.0.0.2
        name: b
        nodeid: 2
    }
}
",
        );
        assert!(matches!(
            mgr.links(),
            Err(Error::InconsistentLink { linknumber: 1, nodeid: 2 })
        ));
    }

    #[test]
    fn test_update_link_sets_and_resets_options() {
        let mut mgr = manager(TWO_LINKS);
        mgr.update_link(0, &opts(&[("knet_ping_interval", Some("500"))]))
            .unwrap();
        let links = mgr.links().unwrap();
        assert_eq!(links[0].as_ref().unwrap().options.knet_ping_interval, Some(500));
        // Existing entry for link 1 keeps its position
        assert_eq!(mgr.conf().get_str("totem.interface.linknumber", 0), Some("1"));
        assert_eq!(mgr.conf().get_str("totem.interface.linknumber", 1), Some("0"));

        mgr.update_link(0, &opts(&[("knet_ping_interval", None)])).unwrap();
        assert_eq!(mgr.conf().get_all("totem.interface").len(), 1);
        assert!(mgr.links().unwrap()[0].as_ref().unwrap().options.is_empty());
    }

    #[test]
    fn test_update_link_removes_interface_key_when_empty() {
        let mut mgr = manager(TWO_LINKS);
        mgr.update_link(1, &opts(&[("knet_link_priority", None)])).unwrap();
        let totem = mgr.conf().tree().get("totem").and_then(|v| v.as_section()).unwrap();
        assert!(!totem.contains_key("interface"));
        assert!(!mgr.conf().to_text().contains("interface"));
    }

    #[test]
    fn test_update_link_keeps_unmanaged_interface_keys() {
        let text = TWO_LINKS.replace("knet_link_priority: 10", "knet_link_priority: 10\n        bindnetaddr: 10.0.0.0");
        let mut mgr = manager(&text);
        mgr.update_link(1, &opts(&[("knet_link_priority", None)])).unwrap();
        assert_eq!(mgr.conf().get_str("totem.interface.bindnetaddr", 0), Some("10.0.0.0"));
    }

    #[test]
    fn test_update_link_errors() {
        let mut mgr = manager(TWO_LINKS);
        assert!(matches!(
            mgr.update_link(5, &opts(&[("mcastport", Some("5405"))])),
            Err(Error::LinkNotFound(5))
        ));
        assert!(matches!(
            mgr.update_link(0, &opts(&[("nodes", Some("x"))])),
            Err(Error::ReservedOption(_))
        ));
        assert!(matches!(
            mgr.update_link(0, &opts(&[("linknumber", Some("3"))])),
            Err(Error::UnsupportedOption { .. })
        ));
        // A bad value in a batch leaves the tree untouched
        let before = mgr.conf().to_text();
        assert!(mgr
            .update_link(
                0,
                &opts(&[("knet_ping_interval", Some("100")), ("mcastport", Some("x"))])
            )
            .is_err());
        assert_eq!(mgr.conf().to_text(), before);
    }

    #[test]
    fn test_update_node_addr() {
        let mut mgr = manager(TWO_LINKS);
        mgr.update_node_addr(0, &addrs(&[(1, "10.0.0.11")])).unwrap();
        assert_eq!(mgr.conf().get_str("nodelist.node.ring0_addr", 1), Some("10.0.0.11"));
        assert_eq!(mgr.conf().get_str("nodelist.node.ring0_addr", 0), Some("10.0.0.2"));
    }

    #[test]
    fn test_update_node_addr_same_address_is_noop() {
        let mut mgr = manager(TWO_LINKS);
        mgr.update_node_addr(0, &addrs(&[(1, "10.0.0.1")])).unwrap();
        assert_eq!(mgr.conf().to_text(), TWO_LINKS);
    }

    #[test]
    fn test_update_node_addr_rejects_duplicates_across_links() {
        let mut mgr = manager(TWO_LINKS);
        let err = mgr
            .update_node_addr(0, &addrs(&[(1, "192.168.0.2")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicatedNodeAddress { node1: 1, node2: 2, .. }
        ));
        assert_eq!(mgr.conf().to_text(), TWO_LINKS);
    }

    #[test]
    fn test_update_node_addr_sees_earlier_pairs() {
        let mut mgr = manager(TWO_LINKS);
        // Node 1 takes the address first; node 2 then collides with it
        let err = mgr
            .update_node_addr(0, &addrs(&[(1, "10.0.0.9"), (2, "10.0.0.9")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicatedNodeAddress { node1: 2, node2: 1, .. }
        ));
        // A replaced address still counts as taken for the rest of the call
        assert!(mgr
            .update_node_addr(0, &addrs(&[(1, "10.0.0.3"), (2, "10.0.0.1")]))
            .is_err());
        mgr.update_node_addr(0, &addrs(&[(1, "10.0.0.3"), (2, "10.0.0.4")]))
            .unwrap();
        assert_eq!(
            mgr.conf().get_all_str("nodelist.node.ring0_addr"),
            vec!["10.0.0.4", "10.0.0.3"]
        );
    }

    #[test]
    fn test_update_node_addr_unknown_node() {
        let mut mgr = manager(TWO_LINKS);
        assert!(matches!(
            mgr.update_node_addr(0, &addrs(&[(7, "10.0.0.7")])),
            Err(Error::UnknownNodeId(7))
        ));
    }

    #[test]
    fn test_add_link() {
        let mut mgr = manager(TWO_LINKS);
        let linknumber = mgr
            .add_link(
                &addrs(&[(1, "172.16.0.1"), (2, "172.16.0.2")]),
                &opts(&[("knet_link_priority", Some("3"))]),
            )
            .unwrap();
        assert_eq!(linknumber, 2);
        let links = mgr.links().unwrap();
        let link2 = links[2].as_ref().unwrap();
        assert_eq!(link2.nodes[0].addr, "172.16.0.1");
        assert_eq!(link2.options.knet_link_priority, Some(3));
        assert_eq!(mgr.conf().get_str("nodelist.node.ring2_addr", 0), Some("172.16.0.2"));
    }

    #[test]
    fn test_add_link_fills_gap() {
        let text = TWO_LINKS
            .replace("ring1_addr", "ring2_addr")
            .replace("linknumber: 1", "linknumber: 2");
        let mut mgr = manager(&text);
        let linknumber = mgr
            .add_link(&addrs(&[(1, "172.16.0.1"), (2, "172.16.0.2")]), &OptionUpdates::new())
            .unwrap();
        assert_eq!(linknumber, 1);
        assert!(mgr.links().unwrap()[1].is_some());
    }

    #[test]
    fn test_add_link_missing_nodes() {
        let mut mgr = manager(TWO_LINKS);
        let err = mgr
            .add_link(&addrs(&[(1, "172.16.0.1")]), &OptionUpdates::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingNodes(ids) if ids == vec![2]));
    }

    #[test]
    fn test_add_link_duplicate_address() {
        let mut mgr = manager(TWO_LINKS);
        let err = mgr
            .add_link(&addrs(&[(1, "172.16.0.1"), (2, "10.0.0.1")]), &OptionUpdates::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatedNodeAddress { .. }));
        assert_eq!(mgr.conf().to_text(), TWO_LINKS);
    }

    #[test]
    fn test_add_link_limit() {
        let mut mgr = manager(TWO_LINKS);
        for n in 2..KNET_LINK_NUM_LIMIT {
            mgr.add_link(
                &addrs(&[(1, &format!("172.16.{}.1", n)), (2, &format!("172.16.{}.2", n))]),
                &OptionUpdates::new(),
            )
            .unwrap();
        }
        assert_eq!(mgr.links().unwrap().iter().flatten().count(), 8);
        let err = mgr
            .add_link(&addrs(&[(1, "172.17.0.1"), (2, "172.17.0.2")]), &OptionUpdates::new())
            .unwrap_err();
        assert!(matches!(err, Error::LinkLimitReached(8)));
        assert_eq!(
            err.to_string(),
            "Cannot add a new link. The maximum number of links supported is 8."
        );
    }

    #[test]
    fn test_add_link_without_nodelist() {
        let mut mgr = manager("totem {\n    version: 2\n}\n");
        assert!(matches!(
            mgr.add_link(&addrs(&[(1, "10.0.0.1")]), &OptionUpdates::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_link() {
        let mut mgr = manager(TWO_LINKS);
        mgr.remove_link(1).unwrap();
        let links = mgr.links().unwrap();
        assert!(links[0].is_some());
        assert!(links[1].is_none());
        assert!(mgr.conf().get_all_str("nodelist.node.ring1_addr").is_empty());
        assert!(mgr.conf().get_all("totem.interface").is_empty());
    }

    #[test]
    fn test_remove_link_keeps_numbering() {
        let mut mgr = manager(TWO_LINKS);
        mgr.remove_link(0).unwrap();
        let links = mgr.links().unwrap();
        assert!(links[0].is_none());
        assert_eq!(links[1].as_ref().unwrap().options.knet_link_priority, Some(10));
    }

    #[test]
    fn test_remove_last_link() {
        let mut mgr = manager(TWO_LINKS);
        mgr.remove_link(1).unwrap();
        assert!(matches!(mgr.remove_link(0), Err(Error::LastLink)));
        assert!(matches!(mgr.remove_link(1), Err(Error::LinkNotFound(1))));
        assert!(matches!(mgr.remove_link(9), Err(Error::LinkNotFound(9))));
    }
}
