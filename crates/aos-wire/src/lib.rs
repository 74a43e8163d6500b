//! # aos-wire — Canonical Tree Text
//!
//! One text syntax serves as the wire format for results (`Ok`, `Err`,
//! `Trace`), the program source format, and the embedded payload format:
//!
//! ```text
//! (Err @rm2e code="RUN024" message="Import file not found: m.aos" nodeId="rm2")
//! ```
//!
//! The formatter is deterministic (attribute insertion order preserved);
//! the reader produces `PAR0xx` diagnostics on malformed input.

pub mod format;
pub mod reader;

pub use format::format_tree;
pub use reader::{ParseOutcome, parse};

#[cfg(test)]
mod tests {
    use aos_tree::Tree;

    use crate::{format_tree, parse};

    #[test]
    fn err_tree_round_trips_through_the_wire_format() {
        let err = Tree::err("RUN024", "Import file not found: m.aos", "rm2").with_id("rm2e");
        let text = format_tree(&err);
        let outcome = parse(&text);
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        let back = outcome.root.expect("root");
        assert_eq!(back.attr_str("code"), Some("RUN024"));
        assert_eq!(
            back.attr_str("message"),
            Some("Import file not found: m.aos")
        );
        assert_eq!(back.attr_str("nodeId"), Some("rm2"));
        assert_eq!(back.id, "rm2e");
    }

    #[test]
    fn nested_trees_round_trip() {
        let trace = Tree::trace([
            Tree::step("EventDispatch").with_str("event", "Start"),
            Tree::step("CommandExecute").with_str("command", "Print"),
        ]);
        let text = format_tree(&trace);
        let back = parse(&text).root.expect("root");
        assert_eq!(back.children.len(), 2);
        assert_eq!(back.children[0].attr_str("kind"), Some("EventDispatch"));
        assert_eq!(back.children[1].attr_str("command"), Some("Print"));
    }
}
