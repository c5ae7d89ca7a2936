//! Line-oriented parser for the corosync.conf grammar.
//!
//! ```text
//! # comment
//! totem {
//!     version: 2
//!     interface {
//!         linknumber: 0
//!     }
//! }
//! ```
//!
//! Every line is one of: blank, comment (`#`), section opening (`name {`),
//! section closing (`}`) or `key: value`. Blank and comment lines are kept
//! verbatim as leading text of the next entry.

use super::{ConfigTree, LineLayout, Scalar, Section, SectionLayout, Value};
use crate::{Error, Result};

/// An open section waiting for its closing brace.
struct Frame {
    key: String,
    tree: ConfigTree,
    leading: String,
    opening: String,
    line: usize,
}

/// Parse corosync.conf text into a [`ConfigTree`].
pub fn parse(text: &str) -> Result<ConfigTree> {
    let mut root = ConfigTree::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut pending = String::new();

    for (idx, raw) in text.split_inclusive('\n').enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            pending.push_str(raw);
            continue;
        }

        let indent_len = raw.len() - raw.trim_start().len();
        let (indent, rest) = raw.split_at(indent_len);

        if trimmed == "}" {
            let frame = stack
                .pop()
                .ok_or_else(|| parse_error(line, "unexpected '}'"))?;
            let mut tree = frame.tree;
            tree.trailer = Some(format!("{pending}{indent}"));
            pending.clear();
            // rest is "}" followed by whitespace and the line break
            let closing = rest[1..].to_string();
            let section = Section {
                tree,
                layout: Some(SectionLayout {
                    line: frame.line,
                    leading: frame.leading,
                    opening: frame.opening,
                    closing,
                }),
            };
            let parent = current(&mut stack, &mut root);
            add_section(parent, frame.key, section, line)?;
        } else if let Some(colon) = rest.find(':') {
            let key = rest[..colon].trim_end();
            validate_key(key, line)?;

            let after = &rest[colon + 1..];
            let value_part = after.trim_start_matches([' ', '\t']);
            let value = value_part.trim_end();
            let separator = &rest[key.len()..rest.len() - value_part.len()];
            let trailing = &value_part[value.len()..];

            let parent = current(&mut stack, &mut root);
            if let Some(existing) = parent.get(key) {
                return Err(parse_error(
                    line,
                    format!("duplicate key '{}' (already a {})", key, existing.kind()),
                ));
            }
            parent.insert(
                key,
                Value::Scalar(Scalar {
                    value: value.to_string(),
                    layout: Some(LineLayout {
                        line,
                        leading: format!("{pending}{indent}"),
                        separator: separator.to_string(),
                        trailing: trailing.to_string(),
                    }),
                }),
            );
            pending.clear();
        } else if trimmed.ends_with('{') {
            let brace = rest.rfind('{').unwrap_or(0);
            let key = rest[..brace].trim_end();
            validate_key(key, line)?;
            stack.push(Frame {
                key: key.to_string(),
                tree: ConfigTree::new(),
                leading: format!("{pending}{indent}"),
                opening: rest[key.len()..].to_string(),
                line,
            });
            pending.clear();
        } else {
            return Err(parse_error(
                line,
                format!("expected 'key: value', 'name {{' or '}}', found '{}'", trimmed),
            ));
        }
    }

    if let Some(frame) = stack.last() {
        return Err(parse_error(
            frame.line,
            format!("unterminated section '{}'", frame.key),
        ));
    }

    if !pending.is_empty() {
        root.trailer = Some(pending);
    }
    Ok(root)
}

fn current<'a>(stack: &'a mut [Frame], root: &'a mut ConfigTree) -> &'a mut ConfigTree {
    match stack.last_mut() {
        Some(frame) => &mut frame.tree,
        None => root,
    }
}

/// Attach a closed section to its parent, grouping repeated names into a sequence.
fn add_section(parent: &mut ConfigTree, key: String, section: Section, line: usize) -> Result<()> {
    match parent.get_mut(&key) {
        None => {
            parent.insert(key, Value::Section(section));
            Ok(())
        }
        Some(slot) => {
            if slot.push_section(section) {
                Ok(())
            } else {
                Err(parse_error(
                    line,
                    format!("'{}' is used both as a value and as a section", key),
                ))
            }
        }
    }
}

fn validate_key(key: &str, line: usize) -> Result<()> {
    if key.is_empty() {
        return Err(parse_error(line, "missing key name"));
    }
    if key
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | ':' | '#'))
    {
        return Err(parse_error(line, format!("invalid key name '{}'", key)));
    }
    Ok(())
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}
