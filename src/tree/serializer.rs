//! Serialize a [`ConfigTree`] back to corosync.conf text.

use super::{ConfigTree, Scalar, Section, Value};

const INDENT: &str = "    ";

/// Render a tree as corosync.conf text.
///
/// Parsed entries are written with their original layout. Entries without
/// layout are written canonically: four spaces per level, `key: value` and
/// `name {` ... `}`, with a blank line before a new top-level section.
pub fn serialize(tree: &ConfigTree) -> String {
    let mut out = String::new();
    write_tree(&mut out, tree, 0);
    if let Some(trailer) = &tree.trailer {
        out.push_str(trailer);
    }
    out
}

fn write_tree(out: &mut String, tree: &ConfigTree, depth: usize) {
    for item in document_order(tree) {
        match item {
            Item::Scalar(key, scalar) => write_scalar(out, key, scalar, depth),
            Item::Section(key, section) => write_section(out, key, section, depth),
        }
    }
}

/// One scalar, or one occurrence of a section, in output order.
#[derive(Clone, Copy)]
enum Item<'a> {
    Scalar(&'a str, &'a Scalar),
    Section(&'a str, &'a Section),
}

impl Item<'_> {
    fn line(&self) -> Option<usize> {
        match self {
            Item::Scalar(_, scalar) => scalar.layout.as_ref().map(|l| l.line),
            Item::Section(_, section) => section.layout.as_ref().map(|l| l.line),
        }
    }
}

/// Order a tree's items the way they appeared in the source.
///
/// Parsed items are sorted by source line. An item created in memory stays
/// right after the item it follows in the tree; items after the last parsed
/// one are written at the end.
fn document_order(tree: &ConfigTree) -> Vec<Item<'_>> {
    let mut items = Vec::with_capacity(tree.entries.len());
    for entry in &tree.entries {
        match &entry.value {
            Value::Scalar(scalar) => items.push(Item::Scalar(&entry.key, scalar)),
            Value::Section(section) => items.push(Item::Section(&entry.key, section)),
            Value::Sequence(sections) => {
                items.extend(sections.iter().map(|s| Item::Section(&entry.key, s)));
            }
        }
    }
    let Some(last_parsed) = items.iter().rposition(|item| item.line().is_some()) else {
        return items;
    };

    let mut head = Vec::new();
    let mut groups: Vec<(usize, Vec<Item<'_>>)> = Vec::new();
    let mut tail = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match item.line() {
            Some(line) => groups.push((line, vec![item])),
            None if i > last_parsed => tail.push(item),
            None => match groups.last_mut() {
                Some((_, group)) => group.push(item),
                None => head.push(item),
            },
        }
    }
    groups.sort_by_key(|(line, _)| *line);
    head.into_iter()
        .chain(groups.into_iter().flat_map(|(_, group)| group))
        .chain(tail)
        .collect()
}

fn write_scalar(out: &mut String, key: &str, scalar: &Scalar, depth: usize) {
    match &scalar.layout {
        Some(layout) => {
            out.push_str(&layout.leading);
            out.push_str(key);
            out.push_str(&layout.separator);
            out.push_str(&scalar.value);
            out.push_str(&layout.trailing);
        }
        None => {
            start_line(out);
            indent(out, depth);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&scalar.value);
            out.push('\n');
        }
    }
}

fn write_section(out: &mut String, key: &str, section: &Section, depth: usize) {
    match &section.layout {
        Some(layout) => {
            out.push_str(&layout.leading);
            out.push_str(key);
            out.push_str(&layout.opening);
            write_tree(out, &section.tree, depth + 1);
            close(out, section, depth);
            out.push_str(&layout.closing);
        }
        None => {
            start_line(out);
            if depth == 0 && !out.is_empty() {
                out.push('\n');
            }
            indent(out, depth);
            out.push_str(key);
            out.push_str(" {\n");
            write_tree(out, &section.tree, depth + 1);
            close(out, section, depth);
            out.push('\n');
        }
    }
}

fn close(out: &mut String, section: &Section, depth: usize) {
    match &section.tree.trailer {
        Some(trailer) => out.push_str(trailer),
        None => {
            start_line(out);
            indent(out, depth);
        }
    }
    out.push('}');
}

/// Make sure the next canonical entry starts on a fresh line.
fn start_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}
