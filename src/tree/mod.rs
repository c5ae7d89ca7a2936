//! Ordered, nested configuration tree for the corosync.conf grammar.
//!
//! A tree maps keys to one of three kinds of slot:
//!
//! - a scalar (`key: value`)
//! - a single section (`name { ... }`)
//! - a sequence of sections, for a section name that repeats under the same
//!   parent (`node { ... } node { ... }`)
//!
//! Parsed entries remember the text around them (comments, blank lines,
//! indentation, separators) and the line they started on, so a tree that is
//! parsed and serialized again without mutation reproduces its input, even
//! when other entries sit between two occurrences of a repeated section. Entries created in memory carry no
//! layout and are rendered canonically.

mod parser;
mod serializer;

pub use parser::parse;
pub use serializer::serialize;

use std::fmt;
use std::str::FromStr;

/// An ordered mapping from key to [`Value`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    entries: Vec<Entry>,
    /// Text between the last entry and the closing brace (or end of file).
    trailer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: Value,
}

/// The content of one slot in a [`ConfigTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(Scalar),
    Section(Section),
    Sequence(Vec<Section>),
}

/// A `key: value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    value: String,
    layout: Option<LineLayout>,
}

/// A `name { ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    tree: ConfigTree,
    layout: Option<SectionLayout>,
}

/// Source text around a parsed scalar: `{leading}{key}{separator}{value}{trailing}`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LineLayout {
    line: usize,
    leading: String,
    separator: String,
    trailing: String,
}

/// Source text around a parsed section:
/// `{leading}{key}{opening}...{tree.trailer}}{closing}`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SectionLayout {
    /// Line of the opening brace.
    line: usize,
    leading: String,
    opening: String,
    closing: String,
}

impl ConfigTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[i].value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.position(key).map(|i| &mut self.entries[i].value)
    }

    /// Scalar value stored under `key`, if that slot is a scalar.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_scalar)
    }

    /// Insert or replace the value under `key`.
    ///
    /// Replacing keeps the entry's position; a new key is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.position(&key) {
            Some(i) => self.entries[i].value = value,
            None => self.entries.push(Entry { key, value }),
        }
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).value)
    }

    /// Iterate over `(key, value)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.key.as_str(), &e.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Serialize back to corosync.conf text.
    pub fn to_text(&self) -> String {
        serialize(self)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }
}

impl FromStr for ConfigTree {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        parse(s)
    }
}

impl fmt::Display for ConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize(self))
    }
}

impl Value {
    /// A new scalar without source layout.
    pub fn scalar(value: impl Into<String>) -> Self {
        Value::Scalar(Scalar::new(value))
    }

    /// A new section without source layout.
    pub fn section(tree: ConfigTree) -> Self {
        Value::Section(Section::new(tree))
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s.value()),
            _ => None,
        }
    }

    pub fn as_section(&self) -> Option<&ConfigTree> {
        match self {
            Value::Section(s) => Some(s.tree()),
            _ => None,
        }
    }

    /// Short name of the slot kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "value",
            Value::Section(_) => "section",
            Value::Sequence(_) => "section list",
        }
    }

    /// Turn a lone section into a one-element sequence. Other kinds are left as is.
    pub fn promote_to_sequence(&mut self) {
        if matches!(self, Value::Section(_))
            && let Value::Section(section) = std::mem::replace(self, Value::Sequence(Vec::new()))
        {
            *self = Value::Sequence(vec![section]);
        }
    }

    /// Add another occurrence of a section, promoting a lone section to a sequence.
    ///
    /// Returns `false` (and leaves `self` untouched) when the slot is a scalar.
    fn push_section(&mut self, section: Section) -> bool {
        self.promote_to_sequence();
        match self {
            Value::Sequence(items) => {
                items.push(section);
                true
            }
            _ => false,
        }
    }
}

impl Scalar {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            layout: None,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replace the value, keeping the surrounding layout.
    pub fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }
}

impl Section {
    pub fn new(tree: ConfigTree) -> Self {
        Self { tree, layout: None }
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
}
