//! Evaluation results.

use serde::{Deserialize, Serialize};

use crate::tree::Tree;

/// Tagged result of evaluating a tree.
///
/// `Unknown` is a distinct "no meaningful result" sentinel, not an error.
/// `Node` wraps a tree, which keeps values and programs homoiconic: an
/// `Err` or `Ok` result is itself a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Node(Tree),
    Unknown,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Str(_) => "String",
            Value::Bool(_) => "Bool",
            Value::Node(_) => "Node",
            Value::Unknown => "Unknown",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Tree> {
        match self {
            Value::Node(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    /// True when the value is an `Err` tree.
    pub fn is_err_tree(&self) -> bool {
        self.as_node().is_some_and(Tree::is_err)
    }
}
