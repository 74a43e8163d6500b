//! The tree-walking evaluator.
//!
//! Interprets the minimal expression vocabulary the kernel program and user
//! programs are written in. Capability gating happens here: `sys.*` needs
//! the `sys` permission, `print` needs `console`, checked against the
//! runtime's permission set on every call.

use std::sync::Arc;

use aos_tree::{AttrValue, HostError, Tree, Value, kinds};
use tracing::debug;

use crate::context::Runtime;

/// A user-defined function: parameter names plus a body tree.
pub struct FnDef {
    pub params: Vec<String>,
    pub body: Tree,
}

enum Flow {
    Value(Value),
    Break(Value),
}

impl Flow {
    fn into_value(self) -> Value {
        match self {
            Flow::Value(v) | Flow::Break(v) => v,
        }
    }
}

/// Evaluates a `Program` root: defines its functions, evaluates its
/// remaining children in order, and returns the last non-definition value.
pub fn evaluate_program(root: &Tree, runtime: &mut Runtime) -> Result<Value, HostError> {
    if !root.is_kind(kinds::PROGRAM) {
        return evaluate_expr(root, runtime);
    }
    let program_name = root.attr_str("name").map(str::to_owned);
    let mut result = Value::Unknown;
    for child in &root.children {
        if child.is_kind("Fn") {
            define_fn(child, program_name.as_deref(), runtime)?;
        } else {
            result = eval(child, runtime)?.into_value();
        }
    }
    debug!(program = program_name.as_deref().unwrap_or(""), "program evaluated");
    Ok(result)
}

/// Evaluates a single expression tree (REPL lines, synthesized `Call`s).
pub fn evaluate_expr(tree: &Tree, runtime: &mut Runtime) -> Result<Value, HostError> {
    Ok(eval(tree, runtime)?.into_value())
}

fn define_fn(
    tree: &Tree,
    program_name: Option<&str>,
    runtime: &mut Runtime,
) -> Result<(), HostError> {
    let name = tree
        .attr_str("name")
        .ok_or_else(|| invalid(tree, "Fn requires a name attribute"))?
        .to_owned();
    let params: Vec<String> = tree
        .children
        .iter()
        .filter(|child| child.is_kind("Param"))
        .filter_map(|param| param.attr_str("name").map(str::to_owned))
        .collect();
    let body = tree
        .children
        .iter()
        .find(|child| !child.is_kind("Param"))
        .ok_or_else(|| invalid(tree, "Fn requires a body"))?
        .clone();

    let def = Arc::new(FnDef { params, body });
    if tree.attr_bool("export").unwrap_or(false)
        && let Some(program) = program_name
    {
        runtime.define_fn(format!("{program}.{name}"), def.clone());
    }
    runtime.define_fn(name, def);
    Ok(())
}

fn eval(tree: &Tree, runtime: &mut Runtime) -> Result<Flow, HostError> {
    match tree.kind.as_str() {
        "Lit" => Ok(Flow::Value(match tree.attr("value") {
            Some(AttrValue::Str(s)) => Value::Str(s.clone()),
            Some(AttrValue::Int(n)) => Value::Int(*n),
            Some(AttrValue::Bool(b)) => Value::Bool(*b),
            Some(AttrValue::Ident(ident)) => Value::Str(ident.clone()),
            None => Value::Unknown,
        })),
        "Var" => {
            let name = tree
                .attr_str("name")
                .ok_or_else(|| invalid(tree, "Var requires a name attribute"))?;
            runtime
                .lookup(name)
                .cloned()
                .map(Flow::Value)
                .ok_or_else(|| {
                    HostError::new("RUN011", format!("unknown name: {name}"))
                        .with_node(tree.id.clone())
                })
        }
        "Let" => {
            let name = tree
                .attr_str("name")
                .ok_or_else(|| invalid(tree, "Let requires a name attribute"))?
                .to_owned();
            let child = tree
                .children
                .first()
                .ok_or_else(|| invalid(tree, "Let requires a value expression"))?;
            let value = match eval(child, runtime)? {
                Flow::Value(v) => v,
                flow @ Flow::Break(_) => return Ok(flow),
            };
            runtime
                .bind(&name, value.clone())
                .map_err(|err| err.with_node(tree.id.clone()))?;
            Ok(Flow::Value(value))
        }
        kinds::BLOCK => {
            let mut result = Value::Unknown;
            for child in &tree.children {
                match eval(child, runtime)? {
                    Flow::Value(v) => result = v,
                    flow @ Flow::Break(_) => return Ok(flow),
                }
            }
            Ok(Flow::Value(result))
        }
        "If" => {
            let cond = tree
                .children
                .first()
                .ok_or_else(|| invalid(tree, "If requires a condition"))?;
            let cond_value = match eval(cond, runtime)? {
                Flow::Value(v) => v,
                flow @ Flow::Break(_) => return Ok(flow),
            };
            let truthy = cond_value.as_bool().ok_or_else(|| {
                HostError::new(
                    "RUN012",
                    format!("condition must be Bool, got {}", cond_value.type_name()),
                )
                .with_node(tree.id.clone())
            })?;
            let branch = if truthy {
                tree.children.get(1)
            } else {
                tree.children.get(2)
            };
            match branch {
                Some(expr) => eval(expr, runtime),
                None => Ok(Flow::Value(Value::Unknown)),
            }
        }
        "Loop" => loop {
            for child in &tree.children {
                if let Flow::Break(v) = eval(child, runtime)? {
                    return Ok(Flow::Value(v));
                }
            }
        },
        "Break" => {
            let value = match tree.children.first() {
                Some(child) => match eval(child, runtime)? {
                    Flow::Value(v) => v,
                    Flow::Break(v) => v,
                },
                None => Value::Unknown,
            };
            Ok(Flow::Break(value))
        }
        "Fn" => {
            // Nested definitions bind under their plain name only.
            define_fn(tree, None, runtime)?;
            Ok(Flow::Value(Value::Unknown))
        }
        "Quote" => Ok(Flow::Value(
            tree.children
                .first()
                .cloned()
                .map(Value::Node)
                .unwrap_or(Value::Unknown),
        )),
        "Call" => eval_call(tree, runtime),
        "Import" => eval_import(tree, runtime),
        kinds::PROGRAM => Ok(Flow::Value(evaluate_program(tree, runtime)?)),
        other => Err(HostError::new(
            "RUN001",
            format!("unsupported node kind: {other}"),
        )
        .with_node(tree.id.clone())),
    }
}

fn eval_call(tree: &Tree, runtime: &mut Runtime) -> Result<Flow, HostError> {
    let name = tree
        .attr_str("fn")
        .ok_or_else(|| invalid(tree, "Call requires a fn attribute"))?
        .to_owned();

    let mut args = Vec::with_capacity(tree.children.len());
    for child in &tree.children {
        match eval(child, runtime)? {
            Flow::Value(v) => args.push(v),
            flow @ Flow::Break(_) => return Ok(flow),
        }
    }

    if let Some(def) = runtime.function(&name) {
        return call_user_fn(tree, &name, &def, args, runtime);
    }
    eval_builtin(tree, &name, args, runtime).map(Flow::Value)
}

fn call_user_fn(
    tree: &Tree,
    name: &str,
    def: &FnDef,
    args: Vec<Value>,
    runtime: &mut Runtime,
) -> Result<Flow, HostError> {
    if args.len() != def.params.len() {
        return Err(HostError::new(
            "RUN021",
            format!(
                "{name} expects {} argument(s), got {}",
                def.params.len(),
                args.len()
            ),
        )
        .with_node(tree.id.clone()));
    }

    // Dynamic scoping: bind params, evaluate the body, restore shadowed
    // bindings afterwards.
    let mut shadowed = Vec::with_capacity(def.params.len());
    for (param, arg) in def.params.iter().zip(args) {
        shadowed.push((param.clone(), runtime.remove_binding(param)));
        runtime
            .bind(param, arg)
            .map_err(|err| err.with_node(tree.id.clone()))?;
    }
    let result = eval(&def.body, runtime);
    for (param, previous) in shadowed {
        match previous {
            Some(value) => {
                let _ = runtime.bind(&param, value);
            }
            None => {
                runtime.remove_binding(&param);
            }
        }
    }
    // A Break escaping a function body is the function's return value.
    Ok(Flow::Value(result?.into_value()))
}

fn eval_import(tree: &Tree, runtime: &mut Runtime) -> Result<Flow, HostError> {
    let file = tree
        .attr_str("file")
        .ok_or_else(|| invalid(tree, "Import requires a file attribute"))?
        .to_owned();
    let path = runtime.module_base().join(&file);
    let source = std::fs::read_to_string(&path).map_err(|_| {
        HostError::new("RUN024", format!("Import file not found: {file}"))
            .with_node(tree.id.clone())
    })?;

    let outcome = aos_wire::parse(&source);
    if let Some(diag) = outcome.diagnostics.first() {
        return Err(HostError::from(diag));
    }
    let root = outcome
        .root
        .ok_or_else(|| invalid(tree, "imported file produced no tree"))?;

    let saved_base = runtime.module_base().to_path_buf();
    if let Some(parent) = path.parent() {
        runtime.set_module_base(parent);
    }
    let result = evaluate_program(&root, runtime);
    runtime.set_module_base(saved_base);
    result?;
    debug!(file, "module imported");
    Ok(Flow::Value(Value::Unknown))
}

fn eval_builtin(
    tree: &Tree,
    name: &str,
    args: Vec<Value>,
    runtime: &mut Runtime,
) -> Result<Value, HostError> {
    match name {
        "eq" => binary(tree, name, args, |a, b| Ok(Value::Bool(a == b))),
        "not" => {
            let value = unary(tree, name, args)?;
            let b = expect_bool(tree, name, &value)?;
            Ok(Value::Bool(!b))
        }
        "and" => binary(tree, name, args, |a, b| {
            Ok(Value::Bool(
                expect_bool(tree, name, &a)? && expect_bool(tree, name, &b)?,
            ))
        }),
        "or" => binary(tree, name, args, |a, b| {
            Ok(Value::Bool(
                expect_bool(tree, name, &a)? || expect_bool(tree, name, &b)?,
            ))
        }),
        "add" => binary(tree, name, args, |a, b| match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x + y)),
            (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
            _ => Err(type_error(tree, name, &a)),
        }),
        "len" => {
            let value = unary(tree, name, args)?;
            match &value {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Node(node) => Ok(Value::Int(node.children.len() as i64)),
                _ => Err(type_error(tree, name, &value)),
            }
        }
        "argAt" => binary(tree, name, args, |node, index| {
            let (Some(block), Some(i)) = (node.as_node(), index.as_int()) else {
                return Ok(Value::Unknown);
            };
            let lit = block.children.get(i as usize);
            Ok(match lit {
                Some(child) if child.is_kind(kinds::LIT) => match child.attr("value") {
                    Some(AttrValue::Str(s)) => Value::Str(s.clone()),
                    Some(AttrValue::Int(n)) => Value::Int(*n),
                    Some(AttrValue::Bool(b)) => Value::Bool(*b),
                    Some(AttrValue::Ident(ident)) => Value::Str(ident.clone()),
                    None => Value::Unknown,
                },
                _ => Value::Unknown,
            })
        }),
        "child" => binary(tree, name, args, |node, index| {
            let (Some(parent), Some(i)) = (node.as_node(), index.as_int()) else {
                return Ok(Value::Unknown);
            };
            Ok(parent
                .children
                .get(i as usize)
                .cloned()
                .map(Value::Node)
                .unwrap_or(Value::Unknown))
        }),
        "attr" => binary(tree, name, args, |node, key| {
            let (Some(parent), Some(key)) = (node.as_node(), key.as_str()) else {
                return Ok(Value::Unknown);
            };
            Ok(match parent.attr(key) {
                Some(AttrValue::Str(s)) => Value::Str(s.clone()),
                Some(AttrValue::Int(n)) => Value::Int(*n),
                Some(AttrValue::Bool(b)) => Value::Bool(*b),
                Some(AttrValue::Ident(ident)) => Value::Str(ident.clone()),
                None => Value::Unknown,
            })
        }),
        "isUnknown" => {
            let value = unary(tree, name, args)?;
            Ok(Value::Bool(value.is_unknown()))
        }
        "isInt" => {
            let value = unary(tree, name, args)?;
            Ok(Value::Bool(matches!(value, Value::Int(_))))
        }
        "fail" => {
            let [code, message] = take_two(tree, name, args)?;
            Err(HostError::new(
                code.as_str().unwrap_or("RUN000").to_owned(),
                message.as_str().unwrap_or("failure").to_owned(),
            )
            .with_node(tree.id.clone()))
        }
        "print" => {
            require(runtime, "console", tree)?;
            let value = unary(tree, name, args)?;
            runtime.console().write_line(&display(&value));
            Ok(Value::Unknown)
        }
        "sys.nextEvent" => {
            require(runtime, "sys", tree)?;
            let host = syscall_host(runtime, tree)?;
            Ok(host.next_event().map(Value::Node).unwrap_or(Value::Unknown))
        }
        "sys.dispatch" => {
            require(runtime, "sys", tree)?;
            let host = syscall_host(runtime, tree)?;
            let event = unary(tree, name, args)?;
            let event_tree = event
                .as_node()
                .ok_or_else(|| type_error(tree, name, &event))?;
            host.dispatch(event_tree)
        }
        "sys.exitRequested" => {
            require(runtime, "sys", tree)?;
            let host = syscall_host(runtime, tree)?;
            Ok(Value::Bool(host.exit_requested()))
        }
        other => Err(HostError::new(
            "RUN020",
            format!("unknown function: {other}"),
        )
        .with_node(tree.id.clone())),
    }
}

fn require(runtime: &Runtime, capability: &str, tree: &Tree) -> Result<(), HostError> {
    if runtime.has_permission(capability) {
        return Ok(());
    }
    Err(HostError::new(
        "RUN030",
        format!("capability denied: {capability}"),
    )
    .with_node(tree.id.clone()))
}

fn syscall_host(
    runtime: &Runtime,
    tree: &Tree,
) -> Result<std::sync::Arc<dyn crate::context::SyscallHost>, HostError> {
    runtime.syscalls().ok_or_else(|| {
        HostError::new("RUN031", "no syscall host attached").with_node(tree.id.clone())
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::Int(n) => n.to_string(),
        Value::Str(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Node(tree) => aos_wire::format_tree(tree),
        Value::Unknown => "unknown".to_owned(),
    }
}

fn unary(tree: &Tree, name: &str, args: Vec<Value>) -> Result<Value, HostError> {
    let [value] = <[Value; 1]>::try_from(args).map_err(|args| arity(tree, name, 1, args.len()))?;
    Ok(value)
}

fn take_two(tree: &Tree, name: &str, args: Vec<Value>) -> Result<[Value; 2], HostError> {
    <[Value; 2]>::try_from(args).map_err(|args| arity(tree, name, 2, args.len()))
}

fn binary(
    tree: &Tree,
    name: &str,
    args: Vec<Value>,
    apply: impl FnOnce(Value, Value) -> Result<Value, HostError>,
) -> Result<Value, HostError> {
    let [a, b] = take_two(tree, name, args)?;
    apply(a, b)
}

fn expect_bool(tree: &Tree, name: &str, value: &Value) -> Result<bool, HostError> {
    value.as_bool().ok_or_else(|| type_error(tree, name, value))
}

fn arity(tree: &Tree, name: &str, expected: usize, got: usize) -> HostError {
    HostError::new(
        "RUN021",
        format!("{name} expects {expected} argument(s), got {got}"),
    )
    .with_node(tree.id.clone())
}

fn type_error(tree: &Tree, name: &str, value: &Value) -> HostError {
    HostError::new(
        "RUN012",
        format!("{name}: unexpected {} operand", value.type_name()),
    )
    .with_node(tree.id.clone())
}

fn invalid(tree: &Tree, message: &str) -> HostError {
    HostError::new("RUN001", message.to_owned()).with_node(tree.id.clone())
}
