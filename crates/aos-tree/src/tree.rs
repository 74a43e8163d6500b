//! The universal tree node.
//!
//! A [`Tree`] is immutable once constructed; every "mutation" in the system
//! builds a new tree. Attribute order is preserved (insertion order) because
//! it is observable through the canonical formatter.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Tree kinds the host core interprets. The `kind` field itself stays an
/// open string for forward compatibility with kinds the core passes through.
pub mod kinds {
    pub const PROGRAM: &str = "Program";
    pub const EVENT: &str = "Event";
    pub const COMMAND: &str = "Command";
    pub const ERR: &str = "Err";
    pub const OK: &str = "Ok";
    pub const TRACE: &str = "Trace";
    pub const STEP: &str = "Step";
    pub const BLOCK: &str = "Block";
    pub const LIT: &str = "Lit";
    pub const BUNDLE: &str = "Bundle";
    pub const BYTECODE: &str = "Bytecode";
}

/// Well-known node ids for events and commands.
pub mod ids {
    pub const START: &str = "Start";
    pub const MESSAGE: &str = "Message";
    pub const EXIT: &str = "Exit";
    pub const PRINT: &str = "Print";
    pub const EMIT: &str = "Emit";
}

/// A typed attribute scalar. `Ident` is a bare word in the canonical syntax,
/// distinct from a quoted `Str`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Ident(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) | AttrValue::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A single source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

/// A source range. Synthetic trees built by the host use [`Span::zero`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn zero() -> Self {
        Span::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Span::default()
    }
}

/// The universal representation for programs, values, events, commands,
/// and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attrs: IndexMap<String, AttrValue>,
    #[serde(default)]
    pub children: Vec<Tree>,
    #[serde(default)]
    pub span: Span,
}

impl Tree {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: String::new(),
            attrs: IndexMap::new(),
            children: Vec::new(),
            span: Span::zero(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_str(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_attr(key, AttrValue::Str(value.into()))
    }

    pub fn with_int(self, key: impl Into<String>, value: i64) -> Self {
        self.with_attr(key, AttrValue::Int(value))
    }

    pub fn with_child(mut self, child: Tree) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Tree>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_str)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).and_then(AttrValue::as_int)
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attrs.get(key).and_then(AttrValue::as_bool)
    }

    // --- event shapes ---

    pub fn event_start() -> Tree {
        Tree::new(kinds::EVENT).with_id(ids::START)
    }

    pub fn event_message(message_type: impl Into<String>, payload: impl Into<String>) -> Tree {
        Tree::new(kinds::EVENT)
            .with_id(ids::MESSAGE)
            .with_str("type", message_type)
            .with_str("payload", payload)
    }

    // --- command shapes ---

    pub fn command_exit(code: i64) -> Tree {
        Tree::new(kinds::COMMAND).with_id(ids::EXIT).with_int("code", code)
    }

    pub fn command_print(text: impl Into<String>) -> Tree {
        Tree::new(kinds::COMMAND).with_id(ids::PRINT).with_str("text", text)
    }

    pub fn command_emit(emit_type: impl Into<String>, payload: impl Into<String>) -> Tree {
        Tree::new(kinds::COMMAND)
            .with_id(ids::EMIT)
            .with_str("type", emit_type)
            .with_str("payload", payload)
    }

    // --- result shapes ---

    pub fn err(
        code: impl Into<String>,
        message: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Tree {
        Tree::new(kinds::ERR)
            .with_str("code", code)
            .with_str("message", message)
            .with_str("nodeId", node_id)
    }

    pub fn ok_value(value: &Value) -> Tree {
        let ok = Tree::new(kinds::OK).with_str("type", value.type_name());
        match value {
            Value::Int(n) => ok.with_int("value", *n),
            Value::Str(s) => ok.with_str("value", s.clone()),
            Value::Bool(b) => ok.with_attr("value", AttrValue::Bool(*b)),
            Value::Node(tree) => ok.with_child(tree.clone()),
            Value::Unknown => ok,
        }
    }

    pub fn trace(steps: impl IntoIterator<Item = Tree>) -> Tree {
        Tree::new(kinds::TRACE).with_children(steps)
    }

    pub fn step(step_kind: &str) -> Tree {
        Tree::new(kinds::STEP).with_str("kind", step_kind)
    }

    /// True when this tree is an `Err` result.
    pub fn is_err(&self) -> bool {
        self.kind == kinds::ERR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_order_is_insertion_order() {
        let tree = Tree::new("Node")
            .with_str("zeta", "1")
            .with_str("alpha", "2")
            .with_int("mid", 3);
        let keys: Vec<&str> = tree.attrs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn command_builders_carry_expected_shape() {
        let exit = Tree::command_exit(7);
        assert_eq!(exit.kind, kinds::COMMAND);
        assert_eq!(exit.id, ids::EXIT);
        assert_eq!(exit.attr_int("code"), Some(7));

        let emit = Tree::command_emit("http.response", "body");
        assert_eq!(emit.attr_str("type"), Some("http.response"));
        assert_eq!(emit.attr_str("payload"), Some("body"));
    }

    #[test]
    fn ok_tree_wraps_node_values_as_children() {
        let inner = Tree::event_start();
        let ok = Tree::ok_value(&Value::Node(inner.clone()));
        assert_eq!(ok.attr_str("type"), Some("Node"));
        assert_eq!(ok.children, vec![inner]);
    }

    #[test]
    fn synthetic_trees_use_zero_span() {
        assert!(Tree::err("RUN001", "boom", "n1").span.is_zero());
    }

    #[test]
    fn tree_serde_roundtrip() {
        let tree = Tree::event_message("http.request", "GET /");
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, back);
    }
}
