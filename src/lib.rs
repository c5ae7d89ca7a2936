//! Coroconf - corosync.conf editing, knet link management and legacy migration.
//!
//! This library provides the core functionality for the `coroconf` CLI tool:
//! a formatting-preserving parser for the corosync configuration grammar, a
//! dotted-path addressing layer over it, the knet link topology manager and
//! the corosync 2 to corosync 3 migration engine.

pub mod cib;
pub mod cli;
pub mod commands;
pub mod conf;
pub mod config;
pub mod link;
pub mod migration;
pub mod nodelist;
pub mod peer;
pub mod tree;

/// Library-level error type for Coroconf operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot find value on path \"{0}\"")]
    NotFound(String),

    #[error("Invalid path \"{0}\"")]
    InvalidPath(String),

    #[error("Index {index} out of range at path \"{path}\"")]
    IndexOutOfRange { path: String, index: usize },

    #[error("Link {0} does not exist.")]
    LinkNotFound(usize),

    #[error("Unsupported transport \"{0}\": only knet links can be managed")]
    UnsupportedTransport(String),

    #[error("Unknown option \"{0}\".")]
    ReservedOption(String),

    #[error("Updating option \"{option}\" is not supported. Updatable options: {allowed}")]
    UnsupportedOption { option: String, allowed: String },

    #[error("Invalid value \"{value}\" for option \"{option}\"")]
    InvalidOptionValue { option: String, value: String },

    #[error("Unknown nodeid {0}.")]
    UnknownNodeId(u32),

    #[error("Duplicated address {address}: node {node1} and node {node2}")]
    DuplicatedNodeAddress {
        address: String,
        node1: u32,
        node2: u32,
    },

    #[error("Cannot add a new link. The maximum number of links supported is {0}.")]
    LinkLimitReached(usize),

    #[error("Addresses of nodes {0:?} are not specified")]
    MissingNodes(Vec<u32>),

    #[error("Cannot remove the last link.")]
    LastLink,

    #[error("Inconsistent link {linknumber}: node {nodeid} disagrees with the first node entry")]
    InconsistentLink { linknumber: usize, nodeid: u32 },

    #[error("IP {} was already configured", .0.join(","))]
    AddressAlreadyConfigured(Vec<String>),

    #[error("CIB error: {0}")]
    Cib(String),

    #[error("{host}: {message}")]
    Peer { host: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Coroconf operations.
pub type Result<T> = std::result::Result<T, Error>;
