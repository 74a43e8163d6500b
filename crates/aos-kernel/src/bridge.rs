//! The host side of the kernel's syscalls.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use aos_events::{CommandExecutor, ConsoleSink, EventSource, StdoutSink};
use aos_runtime::{Runtime, SyscallHost, TraceLog, evaluate_program};
use aos_tree::{HostError, Tree, Value, kinds};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Implements [`SyscallHost`] over one event source / command executor
/// pair. One bridge serves one execution cycle's worth of state in serve
/// mode (connection-local), or the whole invocation in batch mode.
pub struct HostBridge {
    source: Mutex<Box<dyn EventSource>>,
    executor: Mutex<Box<dyn CommandExecutor>>,
    user_root: Option<Arc<Tree>>,
    user_permissions: BTreeSet<String>,
    argv: Value,
    vm_mode: String,
    module_base: PathBuf,
    console: Arc<dyn ConsoleSink>,
    trace: TraceLog,
    trace_enabled: bool,
    exit_code: Mutex<Option<i32>>,
}

impl HostBridge {
    pub fn new(source: Box<dyn EventSource>, executor: Box<dyn CommandExecutor>) -> Self {
        Self {
            source: Mutex::new(source),
            executor: Mutex::new(executor),
            user_root: None,
            user_permissions: BTreeSet::new(),
            argv: Value::Unknown,
            vm_mode: "ast".to_owned(),
            module_base: PathBuf::from("."),
            console: Arc::new(StdoutSink),
            trace: TraceLog::new(),
            trace_enabled: false,
            exit_code: Mutex::new(None),
        }
    }

    pub fn with_user_program(mut self, root: Arc<Tree>) -> Self {
        self.user_root = Some(root);
        self
    }

    pub fn with_permissions(mut self, permissions: BTreeSet<String>) -> Self {
        self.user_permissions = permissions;
        self
    }

    pub fn with_argv(mut self, argv: Value) -> Self {
        self.argv = argv;
        self
    }

    pub fn with_vm_mode(mut self, vm_mode: impl Into<String>) -> Self {
        self.vm_mode = vm_mode.into();
        self
    }

    pub fn with_module_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.module_base = base.into();
        self
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    pub fn with_trace(mut self, trace: TraceLog, enabled: bool) -> Self {
        self.trace = trace;
        self.trace_enabled = enabled;
        self
    }

    /// The code of the first executed `Exit` command, if any.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    /// Runs `f` against the attached executor. Used by the listener to pull
    /// the buffered response out of a serve executor after a cycle.
    pub fn with_executor<R>(&self, f: impl FnOnce(&mut dyn CommandExecutor) -> R) -> R {
        f(self.executor.lock().as_mut())
    }

    /// The commands a cycle value yields: a `Command` node is one command,
    /// a `Block` node yields its `Command` children in order, anything
    /// else yields none.
    fn harvest(value: &Value) -> Vec<Tree> {
        match value.as_node() {
            Some(node) if node.is_kind(kinds::COMMAND) => vec![node.clone()],
            Some(node) if node.is_kind(kinds::BLOCK) => node
                .children
                .iter()
                .filter(|child| child.is_kind(kinds::COMMAND))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl SyscallHost for HostBridge {
    fn next_event(&self) -> Option<Tree> {
        self.source.lock().next_event()
    }

    #[instrument(skip(self, event), fields(event = %event.id))]
    fn dispatch(&self, event: &Tree) -> Result<Value, HostError> {
        if self.trace_enabled {
            let mut step = Tree::step("EventDispatch").with_str("event", event.id.clone());
            if let Some(message_type) = event.attr_str("type") {
                step = step.with_str("type", message_type);
            }
            self.trace.push(step);
        }

        let Some(root) = &self.user_root else {
            return Ok(Value::Unknown);
        };

        // The user program runs with only the user's grant; kernel trust
        // (the sys capability) never leaks into dispatched code.
        let mut runtime = Runtime::new(&self.module_base);
        runtime.trace = self.trace.clone();
        runtime.trace_enabled = self.trace_enabled;
        runtime.set_console(self.console.clone());
        for capability in &self.user_permissions {
            runtime.grant(capability.clone());
        }
        runtime.seed(self.argv.clone(), &self.vm_mode);
        runtime.bind_read_only("event", Value::Node(event.clone()));

        let value = evaluate_program(root, &mut runtime)?;

        let commands = Self::harvest(&value);
        let mut executor = self.executor.lock();
        for command in &commands {
            if self.trace_enabled {
                let mut step = Tree::step("CommandExecute").with_str("command", command.id.clone());
                if let Some(emit_type) = command.attr_str("type") {
                    step = step.with_str("type", emit_type);
                }
                self.trace.push(step);
            }
            if let Some(code) = executor.execute(command) {
                // Exit short-circuits further dispatch.
                *self.exit_code.lock() = Some(code);
                debug!(code, "exit command latched");
                return Ok(Value::Int(code as i64));
            }
        }
        Ok(value)
    }

    fn exit_requested(&self) -> bool {
        self.exit_code.lock().is_some()
    }
}
