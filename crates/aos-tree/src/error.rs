//! The uniform runtime failure.
//!
//! Every failure past program load converges to a `HostError`, which
//! converts losslessly into an `Err` tree for reporting. There is no
//! exception-style signaling visible at any crate boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diag::Diagnostic;
use crate::tree::Tree;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct HostError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub node_id: String,
}

impl HostError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            node_id: String::new(),
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn into_tree(self) -> Tree {
        Tree::err(self.code, self.message, self.node_id)
    }
}

impl From<&Diagnostic> for HostError {
    fn from(diag: &Diagnostic) -> Self {
        Self {
            code: diag.code.clone(),
            message: diag.message.clone(),
            node_id: diag.node_id.clone().unwrap_or_default(),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
