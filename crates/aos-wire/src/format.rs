//! The canonical formatter.

use aos_tree::{AttrValue, Tree};

/// Renders a tree in canonical text form.
///
/// Leaf trees render on one line; trees with children indent each child by
/// two spaces. Attribute order is the tree's insertion order, which makes
/// the output deterministic for a given tree.
pub fn format_tree(tree: &Tree) -> String {
    let mut out = String::new();
    write_tree(&mut out, tree, 0);
    out
}

fn write_tree(out: &mut String, tree: &Tree, depth: usize) {
    out.push('(');
    out.push_str(&tree.kind);
    if !tree.id.is_empty() {
        out.push_str(" @");
        out.push_str(&tree.id);
    }
    for (key, value) in &tree.attrs {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        write_scalar(out, value);
    }
    for child in &tree.children {
        out.push('\n');
        for _ in 0..(depth + 1) {
            out.push_str("  ");
        }
        write_tree(out, child, depth + 1);
    }
    out.push(')');
}

fn write_scalar(out: &mut String, value: &AttrValue) {
    match value {
        AttrValue::Str(s) => {
            out.push('"');
            for ch in s.chars() {
                match ch {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        AttrValue::Int(n) => out.push_str(&n.to_string()),
        AttrValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        AttrValue::Ident(ident) => out.push_str(ident),
    }
}
