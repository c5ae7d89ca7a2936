//! Read-only node list extraction from a raw CIB file.
//!
//! Only `<nodes><node id=".." uname=".."/></nodes>` is consulted. Pacemaker
//! does not need to be running.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// A cluster member as recorded in the CIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CibNode {
    pub node_id: u32,
    pub uname: String,
}

/// A parsed CIB document.
#[derive(Debug, Clone)]
pub struct Cib {
    text: String,
}

impl Cib {
    /// Read the CIB from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Cib(format!("{}: {}", path.display(), e)))?;
        let cib = Self::from_text(text)?;
        debug!(path = %path.display(), "Loaded CIB");
        Ok(cib)
    }

    /// Wrap CIB text, checking that it is well-formed XML.
    pub fn from_text(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        roxmltree::Document::parse(&text).map_err(|e| Error::Cib(e.to_string()))?;
        Ok(Self { text })
    }

    /// Cluster members in document order.
    ///
    /// A `type="remote"` entry is skipped when a pacemaker remote resource
    /// already points at the same host, since that member is listed under
    /// its primary entry.
    pub fn nodes(&self) -> Result<Vec<CibNode>> {
        let doc = roxmltree::Document::parse(&self.text).map_err(|e| Error::Cib(e.to_string()))?;
        let remote_servers: Vec<&str> = doc
            .descendants()
            .filter(|n| {
                n.has_tag_name("primitive")
                    && n.attribute("provider") == Some("pacemaker")
                    && n.attribute("type") == Some("remote")
            })
            .flat_map(|primitive| primitive.children().filter(|c| c.has_tag_name("instance_attributes")))
            .flat_map(|attrs| attrs.children().filter(|c| c.has_tag_name("nvpair")))
            .filter(|nvpair| nvpair.attribute("name") == Some("server"))
            .filter_map(|nvpair| nvpair.attribute("value"))
            .collect();

        let mut nodes = Vec::new();
        for element in doc.descendants().filter(|n| {
            n.has_tag_name("node")
                && n.parent_element().is_some_and(|p| p.has_tag_name("nodes"))
        }) {
            let uname = element
                .attribute("uname")
                .filter(|u| !u.is_empty())
                .ok_or_else(|| Error::Cib("node element without uname".to_string()))?;
            if element.attribute("type") == Some("remote") && remote_servers.contains(&uname) {
                debug!(uname, "Skipping remote node");
                continue;
            }
            let id = element
                .attribute("id")
                .ok_or_else(|| Error::Cib(format!("node {} has no id", uname)))?;
            let node_id = id
                .trim()
                .parse()
                .map_err(|_| Error::Cib(format!("node {} has a non-numeric id '{}'", uname, id)))?;
            nodes.push(CibNode {
                node_id,
                uname: uname.to_string(),
            });
        }
        Ok(nodes)
    }
}
