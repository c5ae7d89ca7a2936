//! Well-known locations, environment variables and defaults.

use std::time::Duration;

/// Default location of corosync.conf.
pub const DEFAULT_COROSYNC_CONF: &str = "/etc/corosync/corosync.conf";

/// Environment variable overriding the corosync.conf location.
pub const COROSYNC_CONF_ENV: &str = "COROSYNC_MAIN_CONFIG_FILE";

/// Default location of the raw CIB on a cluster node.
pub const DEFAULT_CIB_FILE: &str = "/var/lib/pacemaker/cib/cib.xml";

/// Environment variable overriding the CIB location (same name pacemaker tools use).
pub const CIB_FILE_ENV: &str = "CIB_file";

/// Environment variable overriding the per-peer timeout, in seconds.
pub const PEER_TIMEOUT_ENV: &str = "COROCONF_PEER_TIMEOUT";

/// Default timeout for one remote copy.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable overriding the local node name.
pub const NODE_NAME_ENV: &str = "COROCONF_NODE";

/// Log filter environment variable read by the binary.
pub const LOG_ENV: &str = "COROCONF_LOG";

/// Set to `json` to get JSON log lines on stderr.
pub const LOG_FORMAT_ENV: &str = "COROCONF_LOG_FORMAT";

/// Permissions corosync.conf is written with (rw-r--r--).
pub const CONF_FILE_MODE: u32 = 0o644;
