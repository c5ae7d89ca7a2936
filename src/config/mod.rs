//! Runtime settings for Coroconf.
//!
//! ## Locations
//!
//! - corosync.conf: `COROSYNC_MAIN_CONFIG_FILE`, else `/etc/corosync/corosync.conf`
//! - CIB: `CIB_file`, else `/var/lib/pacemaker/cib/cib.xml`
//!
//! ## Precedence
//!
//! CLI flag > environment variable > built-in default.
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    Resolved, Settings, SettingsOverrides, ValueSource, cib_path, conf_path, local_hostname,
    resolve_settings_with,
};
pub use schema::{
    CIB_FILE_ENV, CONF_FILE_MODE, COROSYNC_CONF_ENV, DEFAULT_CIB_FILE, DEFAULT_COROSYNC_CONF,
    DEFAULT_PEER_TIMEOUT, LOG_ENV, LOG_FORMAT_ENV, NODE_NAME_ENV, PEER_TIMEOUT_ENV,
};
