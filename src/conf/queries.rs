//! Read-mostly questions asked of a loaded corosync.conf.

use serde::Serialize;

use super::CorosyncConf;
use crate::{Error, Result};

/// Default totem token timeout, in milliseconds.
pub const COROSYNC_TOKEN_DEFAULT_MS: u64 = 1000;

/// A minimal corosync.conf used to bootstrap a new cluster.
pub const TEMPLATE: &str = r#"# Generated by coroconf
# For more details please see corosync.conf.5 man page
totem {
    version: 2
}

quorum {
    provider: corosync_votequorum
}

logging {
    to_logfile: yes
    logfile: /var/log/cluster/corosync.log
    to_syslog: yes
    timestamp: on
}
"#;

/// Totem token and consensus timeouts, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeouts {
    pub token: u64,
    pub consensus: u64,
}

impl Timeouts {
    pub fn total(&self) -> u64 {
        self.token + self.consensus
    }
}

impl CorosyncConf {
    /// Whether the transport is knet. corosync 3 defaults to knet when unset.
    pub fn is_knet(&self) -> bool {
        self.get_str("totem.transport", 0).is_none_or(|t| t == "knet")
    }

    pub fn is_using_ipv6(&self) -> bool {
        self.get_str("totem.ip_version", 0) == Some("ipv6")
    }

    /// Number of links the first node entry has an address for, at least one.
    pub fn link_count(&self) -> usize {
        let extra = (1..crate::link::KNET_LINK_NUM_LIMIT)
            .filter(|i| {
                self.get_str(&format!("nodelist.node.ring{}_addr", i), 0)
                    .is_some_and(|addr| !addr.is_empty())
            })
            .count();
        1 + extra
    }

    pub fn is_qdevice_configured(&self) -> bool {
        self.get_str("quorum.device.model", 0) == Some("net")
    }

    pub fn is_qdevice_tls_on(&self) -> bool {
        self.get_str("quorum.device.net.tls", 0) == Some("on")
    }

    /// Token and consensus timeouts from `totem`, falling back to corosync defaults.
    ///
    /// The consensus default is 1.2 times the token, as corosync computes it.
    pub fn token_and_consensus_timeout(&self) -> Result<Timeouts> {
        let token = match self.get_str("totem.token", 0) {
            Some(ms) => parse_millis("totem.token", ms)? / 1000,
            None => COROSYNC_TOKEN_DEFAULT_MS / 1000,
        };
        let consensus = match self.get_str("totem.consensus", 0) {
            Some(ms) => parse_millis("totem.consensus", ms)? / 1000,
            None => token * 6 / 5,
        };
        Ok(Timeouts { token, consensus })
    }

    /// Set `quorum.two_node` for a cluster expecting `expected_votes` votes.
    ///
    /// `removing` accounts for a member about to leave, `qdevice_adding` for a
    /// quorum device about to contribute a vote.
    pub fn configure_two_node(
        &mut self,
        expected_votes: u32,
        removing: bool,
        qdevice_adding: bool,
    ) -> Result<()> {
        let mut votes = expected_votes;
        if removing {
            votes = votes.saturating_sub(1);
        }
        if qdevice_adding && votes > 1 {
            votes += 1;
        }
        let two_node = if votes == 2 { "1" } else { "0" };
        self.set("quorum.two_node", two_node, 0)
    }
}

fn parse_millis(path: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::InvalidConfig(format!("{} must be a number of milliseconds, got '{}'", path, value))
    })
}
