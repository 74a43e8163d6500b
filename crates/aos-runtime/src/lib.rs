//! # aos-runtime — Execution Context and Evaluators
//!
//! Owns the process-scoped [`Runtime`] context (environment, read-only
//! names, capability permission set, trace log, module base), the
//! permission validator, the tree-walking evaluator, and the bytecode VM.
//!
//! Host effects never happen here directly: the evaluator reaches the host
//! only through the [`SyscallHost`] strategy carried by the runtime, which
//! keeps the crate free of ambient global state and testable by
//! substitution.

pub mod context;
pub mod eval;
pub mod validate;
pub mod vm;

pub use context::{Runtime, SyscallHost, TraceLog};
pub use eval::{evaluate_expr, evaluate_program};
pub use validate::validate;
pub use vm::run_bytecode;
