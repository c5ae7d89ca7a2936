//! CLI argument definitions for Coroconf.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Coroconf - edit corosync.conf, manage knet links and migrate corosync 2 clusters.
#[derive(Parser, Debug)]
#[command(name = "coroconf")]
#[command(author, version, long_version = long_version(), about = "Manage corosync.conf for knet clusters", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// corosync.conf to operate on (default: $COROSYNC_MAIN_CONFIG_FILE or /etc/corosync/corosync.conf)
    #[arg(long = "conf", global = true)]
    pub conf_path: Option<PathBuf>,

    /// Raw CIB file consulted by migration (default: $CIB_file or /var/lib/pacemaker/cib/cib.xml)
    #[arg(long = "cib", global = true)]
    pub cib_path: Option<PathBuf>,

    /// Name of this node (default: $COROCONF_NODE or the short hostname)
    #[arg(long = "node", global = true)]
    pub node_name: Option<String>,

    /// Timeout for each remote copy, in seconds (default: $COROCONF_PEER_TIMEOUT or 30)
    #[arg(long = "peer-timeout", global = true)]
    pub peer_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Get the value at a dotted path (e.g. totem.cluster_name)
    Get {
        /// Dotted path
        path: String,
        /// Which repeated section to read (e.g. the second node entry is 1)
        #[arg(short, long, default_value_t = 0)]
        index: usize,
        /// Return every value matching the path across repeated sections
        #[arg(long, conflicts_with = "index")]
        all: bool,
    },

    /// Set the value at a dotted path, creating sections as needed
    Set {
        /// Dotted path
        path: String,
        /// New value
        value: String,
        /// Which repeated section to write; the current count appends a new one
        #[arg(short, long, default_value_t = 0)]
        index: usize,
    },

    /// Remove a value, or one entry of a repeated section
    Remove {
        /// Dotted path
        path: String,
        /// Which repeated section to remove from
        #[arg(short, long, default_value_t = 0)]
        index: usize,
    },

    /// List every value path in the file
    Paths,

    /// Check that the file parses
    Validate,

    /// Write a minimal corosync.conf
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// knet link management
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },

    /// Node list management
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Migrate a corosync 2 configuration to corosync 3 and copy it to all members
    Migrate {
        /// Only run the pre-flight checks
        #[arg(long)]
        check: bool,
    },

    /// Copy the local file to other members
    Push {
        /// Hosts to copy to
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Replace the local file with a member's copy
    Pull {
        /// Host to copy from
        host: String,
    },

    /// Compare the local file's checksum with other members' copies
    Diff {
        /// Hosts to compare with
        #[arg(required = true)]
        hosts: Vec<String>,
    },
}

/// Link subcommands
#[derive(Subcommand, Debug)]
pub enum LinkCommands {
    /// Show all links with their member addresses and options
    Show,

    /// Add a link at the lowest free linknumber
    Add {
        /// Address of each member on the new link, as NODEID=ADDR
        #[arg(short, long = "addr", value_parser = parse_node_addr, required = true)]
        addrs: Vec<(u32, String)>,
        /// Link option, as NAME=VALUE
        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, Option<String>)>,
    },

    /// Remove a link
    Remove {
        /// Link number
        linknumber: usize,
    },

    /// Change link options
    Update {
        /// Link number
        linknumber: usize,
        /// Option to set as NAME=VALUE, or reset to the default as NAME=
        #[arg(short, long = "option", value_parser = parse_option, required = true)]
        options: Vec<(String, Option<String>)>,
    },

    /// Change member addresses on a link
    SetAddr {
        /// Link number
        linknumber: usize,
        /// New address, as NODEID=ADDR
        #[arg(short, long = "addr", value_parser = parse_node_addr, required = true)]
        addrs: Vec<(u32, String)>,
    },
}

/// Node list subcommands
#[derive(Subcommand, Debug)]
pub enum NodeCommands {
    /// Add a node entry with one address per link
    Add {
        /// Node name
        name: String,
        /// Addresses, in link order
        #[arg(required = true)]
        addrs: Vec<String>,
    },

    /// Remove the node entry whose ring0 address matches
    Remove {
        /// ring0 address of the node
        addr: String,
    },

    /// Print the lowest unused node id
    FreeId,
}

/// Parse `NODEID=ADDR`.
pub fn parse_node_addr(s: &str) -> Result<(u32, String), String> {
    let (id, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NODEID=ADDR, got '{}'", s))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid node id '{}'", id))?;
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(format!("missing address for node {}", id));
    }
    Ok((id, addr.to_string()))
}

/// Parse `NAME=VALUE`; an empty value means "reset to default".
pub fn parse_option(s: &str) -> Result<(String, Option<String>), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing option name in '{}'", s));
    }
    let value = value.trim();
    Ok((
        name.to_string(),
        (!value.is_empty()).then(|| value.to_string()),
    ))
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit: ",
        env!("COROCONF_GIT_COMMIT"),
        "\nbuilt: ",
        env!("COROCONF_BUILD_TIMESTAMP"),
    )
}
