//! Structural and permission validation.
//!
//! Runs before any evaluation; the first diagnostic is fatal for program
//! load (exit code 2). Permission findings make the capability boundary
//! visible at load time instead of only at the first gated call.

use std::collections::{BTreeSet, HashSet};

use aos_tree::{Diagnostic, Tree, kinds};
use tracing::debug;

pub fn validate(root: &Tree, permissions: &BTreeSet<String>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if !root.is_kind(kinds::PROGRAM) {
        diagnostics.push(
            Diagnostic::new(
                "VAL001",
                format!("expected Program root, found {}", root.kind),
            )
            .with_node(root.id.clone()),
        );
    }

    let mut seen = HashSet::new();
    walk(root, permissions, &mut seen, &mut diagnostics);
    debug!(count = diagnostics.len(), "validation finished");
    diagnostics
}

fn walk(
    tree: &Tree,
    permissions: &BTreeSet<String>,
    seen: &mut HashSet<String>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !tree.id.is_empty() && !seen.insert(tree.id.clone()) {
        diagnostics.push(
            Diagnostic::new("VAL002", format!("duplicate node id: {}", tree.id))
                .with_node(tree.id.clone()),
        );
    }

    if tree.is_kind("Call")
        && let Some(name) = tree.attr_str("fn")
    {
        if name.starts_with("sys.") && !permissions.contains("sys") {
            diagnostics.push(
                Diagnostic::new("VAL003", format!("{name} requires the sys capability"))
                    .with_node(tree.id.clone()),
            );
        }
        if name == "print" && !permissions.contains("console") {
            diagnostics.push(
                Diagnostic::new("VAL004", "print requires the console capability")
                    .with_node(tree.id.clone()),
            );
        }
    }

    for child in &tree.children {
        walk(child, permissions, seen, diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use aos_wire::parse;

    use super::validate;

    fn perms(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn non_program_root_is_val001() {
        let root = parse("(Block (Lit value=1))").root.unwrap();
        let diags = validate(&root, &perms(&[]));
        assert_eq!(diags[0].code, "VAL001");
    }

    #[test]
    fn duplicate_ids_are_val002() {
        let root = parse("(Program @p (Lit @a value=1) (Lit @a value=2))")
            .root
            .unwrap();
        let diags = validate(&root, &perms(&[]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "VAL002");
        assert_eq!(diags[0].node_id.as_deref(), Some("a"));
    }

    #[test]
    fn sys_call_without_grant_is_val003() {
        let root = parse("(Program (Call @c fn=\"sys.nextEvent\"))").root.unwrap();
        let diags = validate(&root, &perms(&["console"]));
        assert_eq!(diags[0].code, "VAL003");

        assert!(validate(&root, &perms(&["sys"])).is_empty());
    }

    #[test]
    fn print_without_console_is_val004() {
        let root = parse("(Program (Call fn=\"print\" (Lit value=\"x\")))")
            .root
            .unwrap();
        let diags = validate(&root, &perms(&[]));
        assert_eq!(diags[0].code, "VAL004");

        assert!(validate(&root, &perms(&["console"])).is_empty());
    }
}
