//! Per-link knet tuning options.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;

use crate::tree::ConfigTree;
use crate::{Error, Result};

/// Requested option changes: `Some` sets a value, `None` resets to the default.
pub type OptionUpdates = BTreeMap<String, Option<String>>;

/// Tuning fields of one `totem.interface` entry. `None` means the corosync default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcastport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knet_link_priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knet_ping_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knet_ping_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knet_ping_precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knet_pong_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knet_transport: Option<String>,
}

impl LinkOptions {
    /// Option names that can be changed through the link manager.
    pub const UPDATABLE: [&'static str; 7] = [
        "mcastport",
        "knet_link_priority",
        "knet_ping_interval",
        "knet_ping_timeout",
        "knet_ping_precision",
        "knet_pong_count",
        "knet_transport",
    ];

    /// Read the known options out of an interface entry; other keys are ignored.
    pub fn from_tree(tree: &ConfigTree) -> Result<Self> {
        let mut options = Self::default();
        for name in Self::UPDATABLE {
            if let Some(value) = tree.get_str(name) {
                options.set(name, Some(value))?;
            }
        }
        Ok(options)
    }

    /// Set or clear one option by name, checking the value's type.
    pub fn set(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        match name {
            "mcastport" => self.mcastport = parse_field(name, value)?,
            "knet_link_priority" => self.knet_link_priority = parse_field(name, value)?,
            "knet_ping_interval" => self.knet_ping_interval = parse_field(name, value)?,
            "knet_ping_timeout" => self.knet_ping_timeout = parse_field(name, value)?,
            "knet_ping_precision" => self.knet_ping_precision = parse_field(name, value)?,
            "knet_pong_count" => self.knet_pong_count = parse_field(name, value)?,
            "knet_transport" => self.knet_transport = value.map(|v| v.trim().to_string()),
            _ => return Err(unsupported(name)),
        }
        Ok(())
    }

    /// Current value of one option as it would be written to the file.
    pub fn get(&self, name: &str) -> Option<String> {
        match name {
            "mcastport" => self.mcastport.map(|v| v.to_string()),
            "knet_link_priority" => self.knet_link_priority.map(|v| v.to_string()),
            "knet_ping_interval" => self.knet_ping_interval.map(|v| v.to_string()),
            "knet_ping_timeout" => self.knet_ping_timeout.map(|v| v.to_string()),
            "knet_ping_precision" => self.knet_ping_precision.map(|v| v.to_string()),
            "knet_pong_count" => self.knet_pong_count.map(|v| v.to_string()),
            "knet_transport" => self.knet_transport.clone(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Iterate over the options that are set.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        Self::UPDATABLE
            .into_iter()
            .filter_map(|name| self.get(name).map(|value| (name, value)))
    }

    /// Check every requested change, returning the values to write.
    ///
    /// Fails on the reserved `nodes` key, on unknown names and on values of
    /// the wrong type, before anything is applied.
    pub fn validate_updates(updates: &OptionUpdates) -> Result<Vec<(&'static str, Option<String>)>> {
        if updates.contains_key("nodes") {
            return Err(Error::ReservedOption("nodes".to_string()));
        }
        let mut scratch = Self::default();
        let mut changes = Vec::with_capacity(updates.len());
        for (name, value) in updates {
            let name = Self::UPDATABLE
                .into_iter()
                .find(|known| *known == name.as_str())
                .ok_or_else(|| unsupported(name))?;
            scratch.set(name, value.as_deref())?;
            changes.push((name, scratch.get(name)));
        }
        Ok(changes)
    }
}

fn unsupported(name: &str) -> Error {
    Error::UnsupportedOption {
        option: name.to_string(),
        allowed: LinkOptions::UPDATABLE.join(", "),
    }
}

fn parse_field<T: FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>> {
    value
        .map(|raw| {
            raw.trim().parse().map_err(|_| Error::InvalidOptionValue {
                option: name.to_string(),
                value: raw.to_string(),
            })
        })
        .transpose()
}
