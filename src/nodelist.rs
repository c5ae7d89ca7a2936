//! Node list membership helpers.
//!
//! These operate on `nodelist.node` entries through [`CorosyncConf`] and are
//! used when members join or leave, and by the link manager for address
//! comparison.

use std::net::IpAddr;

use tracing::info;

use crate::conf::CorosyncConf;
use crate::link::KNET_LINK_NUM_LIMIT;
use crate::{Error, Result};

/// Canonical form of an address for equality checks.
///
/// IP literals are normalized (`::0:1` and `::1` compare equal); anything
/// else is treated as a host name and compared case-insensitively.
pub fn canonical_addr(addr: &str) -> String {
    let addr = addr.trim();
    match addr.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => addr.to_ascii_lowercase(),
    }
}

/// Numeric ids of every node entry, in file order.
pub fn node_ids(conf: &CorosyncConf) -> Result<Vec<u32>> {
    conf.get_all("nodelist.node")
        .iter()
        .filter_map(|node| node.as_section())
        .filter_map(|node| node.get_str("nodeid"))
        .map(parse_nodeid)
        .collect()
}

pub(crate) fn parse_nodeid(raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid nodeid '{}'", raw)))
}

/// The lowest positive node id not used by any node entry.
pub fn free_nodeid(conf: &CorosyncConf) -> Result<u32> {
    let ids = node_ids(conf)?;
    Ok((1..).find(|id| !ids.contains(id)).unwrap_or(u32::MAX))
}

/// Every `ringN_addr` value in the node list.
pub fn configured_addrs(conf: &CorosyncConf) -> Vec<String> {
    let mut addrs = Vec::new();
    for node in conf.get_all("nodelist.node") {
        let Some(node) = node.as_section() else {
            continue;
        };
        for i in 0..KNET_LINK_NUM_LIMIT {
            if let Some(addr) = node.get_str(&format!("ring{}_addr", i)) {
                addrs.push(addr.to_string());
            }
        }
    }
    addrs
}

/// Fail if any of `addrs` is already used by a node entry.
pub fn find_configured_addrs(conf: &CorosyncConf, addrs: &[String]) -> Result<()> {
    let existing: Vec<String> = configured_addrs(conf)
        .iter()
        .map(|a| canonical_addr(a))
        .collect();
    let mut taken: Vec<String> = Vec::new();
    for addr in addrs {
        if existing.contains(&canonical_addr(addr)) && !taken.contains(addr) {
            taken.push(addr.clone());
        }
    }
    if taken.is_empty() {
        Ok(())
    } else {
        Err(Error::AddressAlreadyConfigured(taken))
    }
}

/// Append a node entry for `name` with one address per link.
///
/// Returns the node id assigned to the new entry.
pub fn add_node(conf: &mut CorosyncConf, name: &str, addrs: &[String]) -> Result<u32> {
    if addrs.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "node '{}' needs at least one address",
            name
        )));
    }
    if addrs.len() > KNET_LINK_NUM_LIMIT {
        return Err(Error::LinkLimitReached(KNET_LINK_NUM_LIMIT));
    }
    if conf.get_all_str("nodelist.node.name").contains(&name) {
        return Err(Error::InvalidConfig(format!(
            "node '{}' is already configured",
            name
        )));
    }
    find_configured_addrs(conf, addrs)?;

    let nodeid = free_nodeid(conf)?;
    let index = conf.get_all("nodelist.node").len();
    let mut staged = conf.clone();
    for (i, addr) in addrs.iter().enumerate() {
        staged.set(&format!("nodelist.node.ring{}_addr", i), addr.as_str(), index)?;
    }
    staged.set("nodelist.node.name", name, index)?;
    staged.set("nodelist.node.nodeid", nodeid.to_string(), index)?;
    *conf = staged;

    info!(name, nodeid, "Added node entry");
    Ok(nodeid)
}

/// Remove the node entry whose `ring0_addr` is `addr`.
pub fn remove_node_by_addr(conf: &mut CorosyncConf, addr: &str) -> Result<()> {
    let wanted = canonical_addr(addr);
    let index = conf
        .get_all("nodelist.node")
        .iter()
        .position(|node| {
            node.as_section()
                .and_then(|n| n.get_str("ring0_addr"))
                .is_some_and(|a| canonical_addr(a) == wanted)
        })
        .ok_or_else(|| Error::NotFound(format!("nodelist.node.ring0_addr={}", addr)))?;
    conf.remove("nodelist.node", index)?;
    info!(addr, "Removed node entry");
    Ok(())
}
