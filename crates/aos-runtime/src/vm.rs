//! The bytecode VM.
//!
//! Kernel-less by design: a `Bytecode` tree is executed directly against a
//! command executor for minimal startup. A `Bytecode` tree contains
//! `Func{name}` children whose children are `Instr{op, ...}` leaves.

use aos_events::CommandExecutor;
use aos_tree::{AttrValue, HostError, Tree, Value, kinds};
use tracing::debug;

use crate::context::Runtime;

/// Runs `entry` from a `Bytecode` tree. `args` is a `Block` of `Lit` leaves
/// reachable through the `pusharg` instruction.
pub fn run_bytecode(
    bytecode: &Tree,
    entry: &str,
    args: &Tree,
    runtime: &mut Runtime,
    executor: &mut dyn CommandExecutor,
) -> Result<Value, HostError> {
    let func = bytecode
        .children
        .iter()
        .find(|child| child.is_kind("Func") && child.attr_str("name") == Some(entry))
        .ok_or_else(|| {
            HostError::new("VM001", format!("bytecode entry not found: {entry}"))
                .with_node(bytecode.id.clone())
        })?;

    let mut stack: Vec<Value> = Vec::new();
    for instr in &func.children {
        let op = instr.attr_str("op").unwrap_or("");
        if runtime.trace_enabled {
            runtime.trace.push(
                Tree::step("VmInstruction")
                    .with_str("op", op)
                    .with_str("func", entry),
            );
        }
        match op {
            "push" => stack.push(match instr.attr("value") {
                Some(AttrValue::Str(s)) => Value::Str(s.clone()),
                Some(AttrValue::Int(n)) => Value::Int(*n),
                Some(AttrValue::Bool(b)) => Value::Bool(*b),
                Some(AttrValue::Ident(ident)) => Value::Str(ident.clone()),
                None => Value::Unknown,
            }),
            "pusharg" => {
                let index = instr.attr_int("index").unwrap_or(0) as usize;
                let value = args
                    .children
                    .get(index)
                    .filter(|child| child.is_kind(kinds::LIT))
                    .and_then(|child| child.attr("value"))
                    .map(|attr| match attr {
                        AttrValue::Str(s) => Value::Str(s.clone()),
                        AttrValue::Int(n) => Value::Int(*n),
                        AttrValue::Bool(b) => Value::Bool(*b),
                        AttrValue::Ident(ident) => Value::Str(ident.clone()),
                    })
                    .unwrap_or(Value::Unknown);
                stack.push(value);
            }
            "print" => {
                let value = pop(&mut stack, instr)?;
                executor.execute(&Tree::command_print(render(&value)));
            }
            "emit" => {
                let emit_type = instr.attr_str("type").unwrap_or("stdout");
                let value = pop(&mut stack, instr)?;
                executor.execute(&Tree::command_emit(emit_type, render(&value)));
            }
            "exit" => {
                let code = instr.attr_int("code").unwrap_or(0);
                executor.execute(&Tree::command_exit(code));
                debug!(code, "bytecode requested exit");
                return Ok(Value::Int(code));
            }
            "halt" => {
                return Ok(stack.pop().unwrap_or(Value::Unknown));
            }
            other => {
                return Err(HostError::new(
                    "VM003",
                    format!("unknown instruction: {other}"),
                )
                .with_node(instr.id.clone()));
            }
        }
    }
    Ok(stack.pop().unwrap_or(Value::Unknown))
}

fn pop(stack: &mut Vec<Value>, instr: &Tree) -> Result<Value, HostError> {
    stack
        .pop()
        .ok_or_else(|| HostError::new("VM002", "stack underflow").with_node(instr.id.clone()))
}

fn render(value: &Value) -> String {
    match value {
        Value::Int(n) => n.to_string(),
        Value::Str(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Node(tree) => aos_wire::format_tree(tree),
        Value::Unknown => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aos_events::{CliExecutor, MemorySink};
    use aos_tree::{Tree, Value, kinds};
    use aos_wire::parse;

    use crate::context::Runtime;

    use super::run_bytecode;

    fn bytecode(source: &str) -> Tree {
        parse(source).root.unwrap()
    }

    fn empty_args() -> Tree {
        Tree::new(kinds::BLOCK)
    }

    #[test]
    fn main_prints_and_halts_with_top_of_stack() {
        let code = bytecode(
            r#"(Bytecode
                 (Func name="main"
                   (Instr op="push" value="hello")
                   (Instr op="print")
                   (Instr op="push" value=3)
                   (Instr op="halt")))"#,
        );
        let sink = Arc::new(MemorySink::default());
        let mut executor = CliExecutor::with_console(sink.clone());
        let mut runtime = Runtime::new(".");
        let value =
            run_bytecode(&code, "main", &empty_args(), &mut runtime, &mut executor).unwrap();
        assert_eq!(value, Value::Int(3));
        assert_eq!(sink.lines(), vec!["hello"]);
    }

    #[test]
    fn exit_stops_execution_and_returns_its_code() {
        let code = bytecode(
            r#"(Bytecode
                 (Func name="main"
                   (Instr op="exit" code=5)
                   (Instr op="push" value="never")))"#,
        );
        let mut executor = CliExecutor::with_console(Arc::new(MemorySink::default()));
        let mut runtime = Runtime::new(".");
        let value =
            run_bytecode(&code, "main", &empty_args(), &mut runtime, &mut executor).unwrap();
        assert_eq!(value, Value::Int(5));
    }

    #[test]
    fn missing_entry_is_vm001_and_underflow_is_vm002() {
        let code = bytecode(r#"(Bytecode (Func name="other"))"#);
        let mut executor = CliExecutor::with_console(Arc::new(MemorySink::default()));
        let mut runtime = Runtime::new(".");
        let err = run_bytecode(&code, "main", &empty_args(), &mut runtime, &mut executor)
            .unwrap_err();
        assert_eq!(err.code, "VM001");

        let code = bytecode(r#"(Bytecode (Func name="main" (Instr op="print")))"#);
        let err = run_bytecode(&code, "main", &empty_args(), &mut runtime, &mut executor)
            .unwrap_err();
        assert_eq!(err.code, "VM002");
    }

    #[test]
    fn pusharg_reads_lit_args_and_traces_when_enabled() {
        let code = bytecode(
            r#"(Bytecode
                 (Func name="main"
                   (Instr op="pusharg" index=0)
                   (Instr op="emit" type="stdout")
                   (Instr op="halt")))"#,
        );
        let args = bytecode(r#"(Block (Lit value="from-args"))"#);
        let sink = Arc::new(MemorySink::default());
        let mut executor = CliExecutor::with_console(sink.clone());
        let mut runtime = Runtime::new(".");
        runtime.trace_enabled = true;

        run_bytecode(&code, "main", &args, &mut runtime, &mut executor).unwrap();
        assert_eq!(sink.lines(), vec!["from-args"]);

        let steps = runtime.trace.steps();
        assert_eq!(steps.len(), 3);
        assert!(steps
            .iter()
            .all(|step| step.attr_str("kind") == Some("VmInstruction")));
        assert_eq!(steps[0].attr_str("op"), Some("pusharg"));
    }
}
