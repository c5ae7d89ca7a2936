//! Dotted-path access to corosync.conf.
//!
//! [`CorosyncConf`] wraps a parsed [`ConfigTree`] and addresses it with paths
//! such as `nodelist.node.ring0_addr`. An `index` selects among repeated
//! sections wherever the path crosses one. Only the sections named by the
//! [`ListSchema`] (`totem.interface`, `nodelist.node`) are ever promoted to
//! sequences, and they are normalized to sequences as soon as a file is loaded.
//!
//! Every associated function (`get_value`, `set_value`, ...) is a fresh
//! load/mutate/save cycle of the default file. Callers doing several
//! mutations should hold one [`CorosyncConf`] and save it once.

pub mod atomic;
mod queries;

pub use atomic::write_atomic;
pub use queries::{COROSYNC_TOKEN_DEFAULT_MS, TEMPLATE, Timeouts};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{self, CONF_FILE_MODE};
use crate::tree::{ConfigTree, Section, Value};
use crate::{Error, Result};

/// The fixed set of section paths that may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSchema {
    sections: &'static [&'static [&'static str]],
}

impl ListSchema {
    /// corosync.conf: transport interfaces and node list entries.
    pub const COROSYNC: ListSchema = ListSchema {
        sections: &[&["totem", "interface"], &["nodelist", "node"]],
    };

    pub const fn new(sections: &'static [&'static [&'static str]]) -> Self {
        Self { sections }
    }

    /// Whether the section at `path` may repeat.
    pub fn is_list(&self, path: &[&str]) -> bool {
        self.sections.iter().any(|s| *s == path)
    }

    /// Wrap every lone list-capable section in a one-element sequence.
    ///
    /// Idempotent; serialization output is unchanged.
    pub fn normalize(&self, tree: &mut ConfigTree) {
        for path in self.sections {
            let Some((last, parents)) = path.split_last() else {
                continue;
            };
            if let Some(parent) = descend_mut(tree, parents)
                && let Some(value) = parent.get_mut(last)
            {
                value.promote_to_sequence();
            }
        }
    }
}

/// Normalize the corosync list-capable sections of `tree`.
pub fn transform_dom_with_list_schema(tree: &mut ConfigTree) {
    ListSchema::COROSYNC.normalize(tree);
}

/// Follow plain sections (or the first element of a sequence) down `path`.
fn descend_mut<'a>(tree: &'a mut ConfigTree, path: &[&str]) -> Option<&'a mut ConfigTree> {
    let mut node = tree;
    for key in path {
        node = match node.get_mut(key)? {
            Value::Section(section) => section.tree_mut(),
            Value::Sequence(items) => items.first_mut()?.tree_mut(),
            Value::Scalar(_) => return None,
        };
    }
    Some(node)
}

/// A borrowed view of the value found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef<'a> {
    Scalar(&'a str),
    Section(&'a ConfigTree),
}

impl<'a> ValueRef<'a> {
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            ValueRef::Scalar(s) => Some(s),
            ValueRef::Section(_) => None,
        }
    }

    pub fn as_section(&self) -> Option<&'a ConfigTree> {
        match self {
            ValueRef::Section(tree) => Some(tree),
            ValueRef::Scalar(_) => None,
        }
    }
}

/// A loaded corosync.conf.
#[derive(Debug, Clone)]
pub struct CorosyncConf {
    path: Option<PathBuf>,
    tree: ConfigTree,
    schema: ListSchema,
}

impl CorosyncConf {
    /// Load the file at the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(config::conf_path())
    }

    /// Load and parse a file. IO and parse failures become [`Error::InvalidConfig`].
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let mut conf = Self::from_text(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        conf.path = Some(path.to_path_buf());
        debug!(path = %path.display(), "Loaded corosync configuration");
        Ok(conf)
    }

    /// Parse configuration text that has no backing file.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(Self::from_tree(text.parse()?))
    }

    /// Wrap an existing tree, normalizing its list-capable sections.
    pub fn from_tree(tree: ConfigTree) -> Self {
        Self::with_schema(tree, ListSchema::COROSYNC)
    }

    pub fn with_schema(mut tree: ConfigTree, schema: ListSchema) -> Self {
        schema.normalize(&mut tree);
        Self {
            path: None,
            tree,
            schema,
        }
    }

    /// The file this configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ConfigTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> ConfigTree {
        self.tree
    }

    pub fn to_text(&self) -> String {
        self.tree.to_text()
    }

    /// Get the value at `path`; `index` selects among repeated sections.
    ///
    /// Returns `None` when anything along the path is absent.
    pub fn get(&self, path: &str, index: usize) -> Option<ValueRef<'_>> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;
        let mut node = &self.tree;
        for key in parents {
            node = match node.get(key)? {
                Value::Section(section) => section.tree(),
                Value::Sequence(items) => items.get(index)?.tree(),
                Value::Scalar(_) => return None,
            };
        }
        match node.get(last)? {
            Value::Scalar(scalar) => Some(ValueRef::Scalar(scalar.value())),
            Value::Section(section) => Some(ValueRef::Section(section.tree())),
            Value::Sequence(items) => items.get(index).map(|s| ValueRef::Section(s.tree())),
        }
    }

    /// Scalar at `path`, if present.
    pub fn get_str(&self, path: &str, index: usize) -> Option<&str> {
        self.get(path, index).and_then(|v| v.as_str())
    }

    /// Every value matching `path`, fanning out over repeated sections.
    ///
    /// Returns an empty list when nothing matches.
    pub fn get_all(&self, path: &str) -> Vec<ValueRef<'_>> {
        let mut out = Vec::new();
        if let Ok(segments) = split_path(path) {
            collect(&self.tree, &segments, &mut out);
        }
        out
    }

    /// Every scalar matching `path`.
    pub fn get_all_str(&self, path: &str) -> Vec<&str> {
        self.get_all(path)
            .into_iter()
            .filter_map(|v| v.as_str())
            .collect()
    }

    /// Set the scalar at `path`, creating missing sections.
    ///
    /// Where the path crosses a list-capable section, `index` selects the
    /// element; `index == len` appends a new element and `index > len` is an
    /// error. A lone list-capable section is promoted to a sequence when
    /// addressed with `index == 1`.
    pub fn set(&mut self, path: &str, value: impl Into<String>, index: usize) -> Result<()> {
        let segments = split_path(path)?;
        let out_of_range = || Error::IndexOutOfRange {
            path: path.to_string(),
            index,
        };
        let Some((last, parents)) = segments.split_last() else {
            return Err(Error::InvalidPath(path.to_string()));
        };

        let schema = self.schema;
        let mut staged = self.tree.clone();
        let mut node = &mut staged;
        for (depth, key) in parents.iter().enumerate() {
            let is_list = schema.is_list(&segments[..=depth]);
            if !node.contains_key(key) {
                let fresh = Section::new(ConfigTree::new());
                if is_list {
                    if index > 0 {
                        return Err(out_of_range());
                    }
                    node.insert(*key, Value::Sequence(vec![fresh]));
                } else {
                    node.insert(*key, Value::Section(fresh));
                }
            }
            let slot = node
                .get_mut(key)
                .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
            if is_list && index == 1 {
                slot.promote_to_sequence();
            }
            node = match slot {
                Value::Scalar(_) => return Err(Error::InvalidPath(path.to_string())),
                Value::Section(_) if is_list && index > 0 => return Err(out_of_range()),
                Value::Section(section) => section.tree_mut(),
                Value::Sequence(items) => {
                    if index > items.len() {
                        return Err(out_of_range());
                    }
                    if index == items.len() {
                        items.push(Section::new(ConfigTree::new()));
                    }
                    items[index].tree_mut()
                }
            };
        }

        match node.get_mut(last) {
            None => node.insert(*last, Value::scalar(value)),
            Some(Value::Scalar(scalar)) => scalar.set(value),
            Some(_) => return Err(Error::InvalidPath(path.to_string())),
        }
        self.tree = staged;
        Ok(())
    }

    /// Remove the scalar, section or sequence element at `path`.
    ///
    /// Removing the last element of a sequence removes the key.
    pub fn remove(&mut self, path: &str, index: usize) -> Result<()> {
        let segments = split_path(path)?;
        let not_found = || Error::NotFound(format!("{}:{}", path, index));
        let (last, parents) = segments.split_last().ok_or_else(not_found)?;

        let mut node = &mut self.tree;
        for key in parents {
            node = match node.get_mut(key).ok_or_else(not_found)? {
                Value::Section(section) => section.tree_mut(),
                Value::Sequence(items) => items.get_mut(index).ok_or_else(not_found)?.tree_mut(),
                Value::Scalar(_) => return Err(not_found()),
            };
        }

        let drop_key = match node.get_mut(last).ok_or_else(not_found)? {
            Value::Sequence(items) => {
                if index >= items.len() {
                    return Err(not_found());
                }
                items.remove(index);
                items.is_empty()
            }
            _ => true,
        };
        if drop_key {
            node.remove(last);
        }
        Ok(())
    }

    /// Every distinct scalar path, in document order.
    pub fn enumerate_all_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        enumerate(&self.tree, "", &mut out);
        out
    }

    /// Write back to the file this configuration was loaded from.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| Error::Other("Configuration has no backing file".to_string()))?;
        self.save_to(path, CONF_FILE_MODE)
    }

    /// Atomically write to `path` with permission bits `mode`.
    pub fn save_to(&self, path: impl AsRef<Path>, mode: u32) -> Result<()> {
        let path = path.as_ref();
        write_atomic(path, &self.to_text(), mode)?;
        info!(path = %path.display(), "Saved corosync configuration");
        Ok(())
    }

    /// Load the default file and get one scalar.
    pub fn get_value(path: &str, index: usize) -> Result<Option<String>> {
        Ok(Self::load()?.get_str(path, index).map(str::to_string))
    }

    /// Load the default file and get every scalar matching `path`.
    pub fn get_values(path: &str) -> Result<Vec<String>> {
        Ok(Self::load()?
            .get_all_str(path)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Load the default file, set one scalar and save.
    pub fn set_value(path: &str, value: impl Into<String>, index: usize) -> Result<()> {
        let mut conf = Self::load()?;
        conf.set(path, value, index)?;
        conf.save()
    }

    /// Load the default file, remove one entry and save.
    pub fn remove_key(path: &str, index: usize) -> Result<()> {
        let mut conf = Self::load()?;
        conf.remove(path, index)?;
        conf.save()
    }
}

/// Whether `path` (or the default file) parses as corosync.conf.
pub fn is_valid_corosync_conf(path: Option<&Path>) -> bool {
    let result = match path {
        Some(path) => CorosyncConf::load_from(path),
        None => CorosyncConf::load(),
    };
    match result {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(error = %e, "Invalid corosync configuration");
            false
        }
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

fn collect<'a>(tree: &'a ConfigTree, segments: &[&str], out: &mut Vec<ValueRef<'a>>) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let sections: Vec<&ConfigTree> = match tree.get(first) {
        None => return,
        Some(Value::Scalar(scalar)) => {
            if rest.is_empty() {
                out.push(ValueRef::Scalar(scalar.value()));
            }
            return;
        }
        Some(Value::Section(section)) => vec![section.tree()],
        Some(Value::Sequence(items)) => items.iter().map(Section::tree).collect(),
    };
    for section in sections {
        if rest.is_empty() {
            out.push(ValueRef::Section(section));
        } else {
            collect(section, rest, out);
        }
    }
}

fn enumerate(tree: &ConfigTree, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in tree.iter() {
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Scalar(_) => {
                if !out.contains(&path) {
                    out.push(path);
                }
            }
            Value::Section(section) => enumerate(section.tree(), &path, out),
            Value::Sequence(items) => {
                for section in items {
                    enumerate(section.tree(), &path, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONF: &str = r#"totem {
    version: 2
    cluster_name: hacluster
    transport: knet
    interface {
        linknumber: 0
        knet_link_priority: 10
    }
}

nodelist {
    node {
        ring0_addr: 192.168.1.1
        name: node1
        nodeid: 1
    }
    node {
        ring0_addr: 192.168.1.2
        name: node2
        nodeid: 2
    }
}

quorum {
    provider: corosync_votequorum
}
"#;

    fn conf() -> CorosyncConf {
        CorosyncConf::from_text(CONF).unwrap()
    }

    #[test]
    fn test_load_normalizes_list_sections() {
        let conf = conf();
        let totem = conf.tree().get("totem").and_then(Value::as_section).unwrap();
        assert!(matches!(totem.get("interface"), Some(Value::Sequence(items)) if items.len() == 1));
        // Normalization does not change the text
        assert_eq!(conf.to_text(), CONF);
    }

    #[test]
    fn test_transform_is_idempotent() {
        let mut once: ConfigTree = CONF.parse().unwrap();
        transform_dom_with_list_schema(&mut once);
        let mut twice = once.clone();
        transform_dom_with_list_schema(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_get_scalar_and_index() {
        let conf = conf();
        assert_eq!(conf.get_str("totem.cluster_name", 0), Some("hacluster"));
        assert_eq!(conf.get_str("nodelist.node.name", 0), Some("node1"));
        assert_eq!(conf.get_str("nodelist.node.name", 1), Some("node2"));
        assert_eq!(conf.get_str("nodelist.node.name", 2), None);
        assert_eq!(conf.get_str("totem.missing", 0), None);
        assert_eq!(conf.get_str("totem..version", 0), None);
    }

    #[test]
    fn test_get_section() {
        let conf = conf();
        let node = conf.get("nodelist.node", 1).and_then(|v| v.as_section()).unwrap();
        assert_eq!(node.get_str("nodeid"), Some("2"));
    }

    #[test]
    fn test_get_all() {
        let conf = conf();
        assert_eq!(
            conf.get_all_str("nodelist.node.ring0_addr"),
            vec!["192.168.1.1", "192.168.1.2"]
        );
        assert_eq!(conf.get_all("nodelist.node").len(), 2);
        assert!(conf.get_all("nodelist.missing").is_empty());
        assert!(conf.get_all("nope").is_empty());
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let mut conf = conf();
        conf.set("totem.token", "3000", 0).unwrap();
        assert_eq!(conf.get_str("totem.token", 0), Some("3000"));

        conf.set("nodelist.node.ring1_addr", "10.0.0.2", 1).unwrap();
        assert_eq!(conf.get_str("nodelist.node.ring1_addr", 1), Some("10.0.0.2"));
        assert_eq!(conf.get_str("nodelist.node.ring1_addr", 0), None);

        conf.set("quorum.device.net.host", "qnetd", 0).unwrap();
        assert_eq!(conf.get_str("quorum.device.net.host", 0), Some("qnetd"));
    }

    #[test]
    fn test_set_appends_at_len() {
        let mut conf = conf();
        conf.set("nodelist.node.ring0_addr", "192.168.1.3", 2).unwrap();
        conf.set("nodelist.node.name", "node3", 2).unwrap();
        assert_eq!(conf.get_all("nodelist.node").len(), 3);
        assert_eq!(conf.get_str("nodelist.node.name", 2), Some("node3"));
    }

    #[test]
    fn test_set_beyond_len_fails() {
        let mut conf = conf();
        let err = conf.set("nodelist.node.name", "x", 5).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 5, .. }));
    }

    #[test]
    fn test_failed_set_changes_nothing() {
        let text = "totem {\n    version: 2\n}\n";
        let mut conf = CorosyncConf::from_text(text).unwrap();
        let err = conf.set("nodelist.node.name", "x", 2).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 2, .. }));
        assert_eq!(conf.to_text(), text);

        let mut conf = self::conf();
        let before = conf.to_text();
        assert!(conf.set("nodelist.node.name", "x", 5).is_err());
        assert_eq!(conf.to_text(), before);
    }

    #[test]
    fn test_set_promotes_lone_section_at_index_one() {
        let tree: ConfigTree = "nodelist {\n    node {\n        nodeid: 1\n    }\n}\n"
            .parse()
            .unwrap();
        // Bypass load-time normalization to exercise in-place promotion
        let mut conf = CorosyncConf {
            path: None,
            tree,
            schema: ListSchema::COROSYNC,
        };
        conf.set("nodelist.node.nodeid", "2", 1).unwrap();
        assert_eq!(conf.get_all_str("nodelist.node.nodeid"), vec!["1", "2"]);

        let mut conf = CorosyncConf {
            path: None,
            tree: "nodelist {\n    node {\n    }\n}\n".parse().unwrap(),
            schema: ListSchema::COROSYNC,
        };
        assert!(matches!(
            conf.set("nodelist.node.nodeid", "3", 2),
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_set_creates_list_section_as_sequence() {
        let mut conf = CorosyncConf::from_text("totem {\n    version: 2\n}\n").unwrap();
        conf.set("nodelist.node.nodeid", "1", 0).unwrap();
        assert!(matches!(
            conf.tree()
                .get("nodelist")
                .and_then(Value::as_section)
                .and_then(|n| n.get("node")),
            Some(Value::Sequence(_))
        ));
        assert!(matches!(
            conf.set("totem.interface.linknumber", "0", 1),
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_set_ignores_index_on_plain_sections() {
        let mut conf = conf();
        conf.set("quorum.two_node", "1", 1).unwrap();
        assert_eq!(conf.get_str("quorum.two_node", 0), Some("1"));
    }

    #[test]
    fn test_set_invalid_paths() {
        let mut conf = conf();
        assert!(matches!(
            conf.set("totem.version.sub", "x", 0),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(conf.set("totem", "x", 0), Err(Error::InvalidPath(_))));
        assert!(matches!(conf.set("", "x", 0), Err(Error::InvalidPath(_))));
        assert!(matches!(conf.set("a..b", "x", 0), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_remove() {
        let mut conf = conf();
        conf.remove("totem.cluster_name", 0).unwrap();
        assert_eq!(conf.get_str("totem.cluster_name", 0), None);

        conf.remove("nodelist.node", 0).unwrap();
        assert_eq!(conf.get_all_str("nodelist.node.name"), vec!["node2"]);

        conf.remove("nodelist.node.ring0_addr", 0).unwrap();
        assert!(conf.get_all_str("nodelist.node.ring0_addr").is_empty());
    }

    #[test]
    fn test_remove_last_element_drops_key() {
        let mut conf = conf();
        conf.remove("totem.interface", 0).unwrap();
        let totem = conf.tree().get("totem").and_then(Value::as_section).unwrap();
        assert!(!totem.contains_key("interface"));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut conf = conf();
        let err = conf.remove("totem.token", 0).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("totem.token:0"));
        assert!(conf.remove("nodelist.node", 9).is_err());
    }

    #[test]
    fn test_enumerate_all_paths() {
        let paths = conf().enumerate_all_paths();
        assert_eq!(
            paths,
            vec![
                "totem.version",
                "totem.cluster_name",
                "totem.transport",
                "totem.interface.linknumber",
                "totem.interface.knet_link_priority",
                "nodelist.node.ring0_addr",
                "nodelist.node.name",
                "nodelist.node.nodeid",
                "quorum.provider",
            ]
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corosync.conf");
        fs::write(&path, CONF).unwrap();

        let mut conf = CorosyncConf::load_from(&path).unwrap();
        conf.set("totem.token", "5000", 0).unwrap();
        conf.save().unwrap();

        let reloaded = CorosyncConf::load_from(&path).unwrap();
        assert_eq!(reloaded.get_str("totem.token", 0), Some("5000"));
        assert_eq!(reloaded.get_str("totem.cluster_name", 0), Some("hacluster"));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corosync.conf");
        fs::write(&path, "totem {\n").unwrap();
        assert!(matches!(
            CorosyncConf::load_from(&path),
            Err(Error::InvalidConfig(_))
        ));
        assert!(!is_valid_corosync_conf(Some(&path)));
        assert!(!is_valid_corosync_conf(Some(&dir.path().join("missing"))));
    }

    #[test]
    fn test_save_without_path_fails() {
        assert!(conf().save().is_err());
    }
}
