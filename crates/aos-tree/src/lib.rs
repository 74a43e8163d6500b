//! # aos-tree — Canonical aOS Tree Model
//!
//! This crate defines the universal node type shared by every aOS crate:
//! programs, evaluation results, events, commands, and diagnostics are all
//! the same [`Tree`] shape.
//!
//! It is intentionally dependency-light (no runtime deps like tokio) so it
//! can be used as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`tree`] — `Tree`, `AttrValue`, `Span` plus builders for the event,
//!   command, and result shapes the host interprets
//! - [`value`] — `Value`, the tagged result of evaluation
//! - [`diag`] — `Diagnostic` (parser/validator findings)
//! - [`error`] — `HostError`, the uniform runtime failure that converts
//!   into an `Err` tree

pub mod diag;
pub mod error;
pub mod tree;
pub mod value;

pub use diag::Diagnostic;
pub use error::{HostError, HostResult};
pub use tree::{AttrValue, Pos, Span, Tree, ids, kinds};
pub use value::Value;
