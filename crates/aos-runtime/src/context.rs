//! The runtime context.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aos_events::{ConsoleSink, StdoutSink};
use aos_tree::{HostError, Tree, Value};
use parking_lot::Mutex;

use crate::eval::FnDef;

/// Host syscall surface, reachable from gated `sys.*` builtins.
///
/// Injected through the runtime rather than a mutable global so tests can
/// substitute it wholesale.
pub trait SyscallHost: Send + Sync {
    /// Pulls the next event from the attached event source.
    fn next_event(&self) -> Option<Tree>;
    /// Runs one event through the user program and the attached command
    /// executor, returning the cycle's value.
    fn dispatch(&self, event: &Tree) -> Result<Value, HostError>;
    /// True once an `Exit` command has been executed.
    fn exit_requested(&self) -> bool;
}

/// Ordered trace-step log, shared between the runtime, the syscall bridge,
/// and the VM. Connection-local in serve mode.
#[derive(Clone, Default)]
pub struct TraceLog {
    steps: Arc<Mutex<Vec<Tree>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Tree) {
        self.steps.lock().push(step);
    }

    pub fn steps(&self) -> Vec<Tree> {
        self.steps.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.lock().is_empty()
    }

    pub fn to_tree(&self) -> Tree {
        Tree::trace(self.steps())
    }
}

/// Process-scoped execution context: one owner per execution, created fresh
/// per CLI invocation and discarded at process exit.
pub struct Runtime {
    env: HashMap<String, Value>,
    functions: HashMap<String, Arc<FnDef>>,
    read_only: BTreeSet<String>,
    permissions: BTreeSet<String>,
    pub trace: TraceLog,
    pub trace_enabled: bool,
    module_base: PathBuf,
    console: Arc<dyn ConsoleSink>,
    syscalls: Option<Arc<dyn SyscallHost>>,
}

impl Runtime {
    pub fn new(module_base: impl Into<PathBuf>) -> Self {
        Self {
            env: HashMap::new(),
            functions: HashMap::new(),
            read_only: BTreeSet::new(),
            permissions: BTreeSet::new(),
            trace: TraceLog::new(),
            trace_enabled: false,
            module_base: module_base.into(),
            console: Arc::new(StdoutSink),
            syscalls: None,
        }
    }

    /// Installs the reserved read-only bindings every program starts with.
    pub fn seed(&mut self, argv: Value, vm_mode: &str) {
        self.bind_read_only("argv", argv);
        self.bind_read_only("__vm_mode", Value::Str(vm_mode.to_owned()));
    }

    /// Binds a name, failing with `RUN010` when the name is read-only.
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), HostError> {
        if self.read_only.contains(name) {
            return Err(HostError::new(
                "RUN010",
                format!("cannot assign read-only name: {name}"),
            ));
        }
        self.env.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn bind_read_only(&mut self, name: &str, value: Value) {
        self.env.insert(name.to_owned(), value);
        self.read_only.insert(name.to_owned());
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.env.get(name)
    }

    pub(crate) fn remove_binding(&mut self, name: &str) -> Option<Value> {
        self.env.remove(name)
    }

    pub fn define_fn(&mut self, name: impl Into<String>, def: Arc<FnDef>) {
        self.functions.insert(name.into(), def);
    }

    pub fn function(&self, name: &str) -> Option<Arc<FnDef>> {
        self.functions.get(name).cloned()
    }

    pub fn grant(&mut self, capability: impl Into<String>) {
        self.permissions.insert(capability.into());
    }

    pub fn has_permission(&self, capability: &str) -> bool {
        self.permissions.contains(capability)
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn module_base(&self) -> &Path {
        &self.module_base
    }

    pub fn set_module_base(&mut self, base: impl Into<PathBuf>) {
        self.module_base = base.into();
    }

    pub fn console(&self) -> Arc<dyn ConsoleSink> {
        self.console.clone()
    }

    pub fn set_console(&mut self, console: Arc<dyn ConsoleSink>) {
        self.console = console;
    }

    pub fn syscalls(&self) -> Option<Arc<dyn SyscallHost>> {
        self.syscalls.clone()
    }

    pub fn set_syscalls(&mut self, host: Arc<dyn SyscallHost>) {
        self.syscalls = Some(host);
    }
}
