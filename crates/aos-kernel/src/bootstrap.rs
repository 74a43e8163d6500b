//! Kernel location and bootstrap.
//!
//! Terminal on first failure: a missing or invalid kernel is an
//! internal-consistency error (`KRN001`/`KRN002`), never reported the same
//! way as a user program error.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use aos_events::{ConsoleSink, StdoutSink};
use aos_runtime::{Runtime, TraceLog, evaluate_expr, evaluate_program, validate};
use aos_tree::{AttrValue, HostError, Tree, Value, kinds};
use tracing::{debug, instrument};

use crate::bridge::HostBridge;

/// Fixed kernel filename searched for in candidate roots.
pub const KERNEL_FILENAME: &str = "runtime.aos";

/// The compiled-in kernel program, used as the final locate candidate so
/// self-contained binaries run without a disk copy.
pub const KERNEL_SOURCE: &str = include_str!("../runtime.aos");

/// A located kernel source and where it came from (`None` = compiled-in).
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub text: String,
    pub path: Option<PathBuf>,
}

impl KernelSource {
    pub fn builtin() -> Self {
        Self {
            text: KERNEL_SOURCE.to_owned(),
            path: None,
        }
    }
}

/// Ordered search over candidate roots for [`KERNEL_FILENAME`]; first match
/// wins.
#[derive(Debug, Clone)]
pub struct KernelLocator {
    roots: Vec<PathBuf>,
    builtin_fallback: bool,
}

impl KernelLocator {
    /// Binary directory, working directory, then the `runtime/` and
    /// `assets/` subpaths, with the compiled-in copy as final candidate.
    pub fn standard() -> Self {
        let mut roots = Vec::new();
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            roots.push(dir.to_path_buf());
        }
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd.clone());
            roots.push(cwd.join("runtime"));
            roots.push(cwd.join("assets"));
        }
        Self {
            roots,
            builtin_fallback: true,
        }
    }

    /// Searches only the given roots; no compiled-in fallback.
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            builtin_fallback: false,
        }
    }

    #[instrument(skip(self))]
    pub fn locate(&self) -> Result<KernelSource, HostError> {
        for root in &self.roots {
            let candidate = root.join(KERNEL_FILENAME);
            if candidate.is_file() {
                let text = std::fs::read_to_string(&candidate).map_err(|err| {
                    HostError::new(
                        "KRN001",
                        format!("failed reading kernel source {}: {err}", candidate.display()),
                    )
                })?;
                debug!(path = %candidate.display(), "kernel source located");
                return Ok(KernelSource {
                    text,
                    path: Some(candidate),
                });
            }
        }
        if self.builtin_fallback {
            debug!("using compiled-in kernel source");
            return Ok(KernelSource::builtin());
        }
        Err(HostError::new(
            "KRN001",
            format!("kernel source {KERNEL_FILENAME} not found in any candidate root"),
        ))
    }
}

/// Everything the bootstrap needs besides the kernel text itself.
pub struct HostOptions {
    pub module_base: PathBuf,
    pub permissions: BTreeSet<String>,
    pub argv: Value,
    pub vm_mode: String,
    pub trace: bool,
    pub console: Arc<dyn ConsoleSink>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            module_base: PathBuf::from("."),
            permissions: BTreeSet::new(),
            argv: Value::Unknown,
            vm_mode: "ast".to_owned(),
            trace: false,
            console: Arc::new(StdoutSink),
        }
    }
}

/// The bootstrapped kernel: its evaluated top level plus the runtime that
/// carries kernel trust. Dispatch goes through an attached [`HostBridge`].
pub struct KernelHost {
    runtime: Runtime,
}

impl KernelHost {
    /// Steps 1–3 of the bootstrap state machine: parse, validate, and
    /// evaluate the kernel top level with the `sys` capability granted.
    #[instrument(skip(kernel, options), fields(kernel_path = ?kernel.path))]
    pub fn bootstrap(kernel: &KernelSource, options: &HostOptions) -> Result<Self, HostError> {
        let outcome = aos_wire::parse(&kernel.text);
        if let Some(diag) = outcome.diagnostics.first() {
            return Err(HostError::new(
                "KRN002",
                format!("kernel source invalid: {}", diag.message),
            ));
        }
        let root = outcome
            .root
            .ok_or_else(|| HostError::new("KRN002", "kernel source produced no tree"))?;

        let mut runtime = Runtime::new(&options.module_base);
        for capability in &options.permissions {
            runtime.grant(capability.clone());
        }
        // The kernel is trusted infrastructure; the user program is not.
        runtime.grant("sys");
        runtime.trace_enabled = options.trace;
        runtime.set_console(options.console.clone());
        runtime.seed(options.argv.clone(), &options.vm_mode);

        if let Some(diag) = validate(&root, runtime.permissions()).first() {
            return Err(HostError::new(
                "KRN002",
                format!("kernel source invalid: {} ({})", diag.message, diag.code),
            ));
        }

        evaluate_program(&root, &mut runtime)?;
        debug!("kernel top level evaluated");
        Ok(Self { runtime })
    }

    /// Attaches the event source / command executor pair for the next
    /// dispatch. Serve mode re-attaches a fresh bridge per connection.
    pub fn attach(&mut self, bridge: Arc<HostBridge>) {
        self.runtime.set_syscalls(bridge);
    }

    pub fn trace(&self) -> TraceLog {
        self.runtime.trace.clone()
    }

    /// Steps 4–5: bind the mode-argument block under a reserved key and
    /// invoke the kernel's `runtime.start` export with it.
    #[instrument(skip(self, args))]
    pub fn invoke_start(&mut self, args: Tree) -> Result<Value, HostError> {
        self.runtime
            .bind_read_only("__kernel_args", Value::Node(args));
        let call = Tree::new("Call")
            .with_attr("fn", AttrValue::Ident("runtime.start".to_owned()))
            .with_child(
                Tree::new("Var").with_attr("name", AttrValue::Ident("__kernel_args".to_owned())),
            );
        evaluate_expr(&call, &mut self.runtime)
    }

    /// Drives one event→command cycle through the kernel's `cycle` export.
    pub fn run_cycle(&mut self) -> Result<Value, HostError> {
        let call =
            Tree::new("Call").with_attr("fn", AttrValue::Ident("runtime.cycle".to_owned()));
        evaluate_expr(&call, &mut self.runtime)
    }
}

/// Builds a kernel-argument `Block` of `Lit` leaves.
pub fn mode_args(parts: &[AttrValue]) -> Tree {
    let mut block = Tree::new(kinds::BLOCK);
    for part in parts {
        block = block.with_child(Tree::new(kinds::LIT).with_attr("value", part.clone()));
    }
    block
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use aos_events::{CliExecutor, MemorySink, ServeExecutor, StartOnlySource};
    use aos_tree::{AttrValue, Tree, Value};
    use aos_wire::parse;

    use super::{HostOptions, KernelHost, KernelLocator, KernelSource, mode_args};
    use crate::bridge::HostBridge;

    fn unique_test_root(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn user_program(source: &str) -> Arc<Tree> {
        Arc::new(parse(source).root.unwrap())
    }

    fn run_once(source: &str, sink: Arc<MemorySink>) -> Value {
        let mut host =
            KernelHost::bootstrap(&KernelSource::builtin(), &HostOptions::default()).unwrap();
        let bridge = HostBridge::new(
            Box::new(StartOnlySource::new()),
            Box::new(CliExecutor::with_console(sink)),
        )
        .with_user_program(user_program(source));
        host.attach(Arc::new(bridge));
        host.invoke_start(mode_args(&[AttrValue::Str("run".into())]))
            .unwrap()
    }

    #[test]
    fn run_mode_executes_one_cycle_and_returns_the_program_value() {
        let sink = Arc::new(MemorySink::default());
        let value = run_once(r#"(Program @app (Lit value="hello"))"#, sink);
        assert_eq!(value, Value::Str("hello".into()));
    }

    #[test]
    fn run_mode_executes_yielded_commands() {
        let sink = Arc::new(MemorySink::default());
        let value = run_once(
            r#"(Program @app (Quote (Command @Print text="from program")))"#,
            sink.clone(),
        );
        assert_eq!(sink.lines(), vec!["from program"]);
        // The cycle value is the program's own result tree.
        assert!(matches!(value, Value::Node(_)));
    }

    #[test]
    fn serve_mode_start_returns_zero_without_cycling() {
        let mut host =
            KernelHost::bootstrap(&KernelSource::builtin(), &HostOptions::default()).unwrap();
        let bridge = HostBridge::new(
            Box::new(StartOnlySource::new()),
            Box::new(ServeExecutor::with_console(Arc::new(MemorySink::default()))),
        )
        .with_user_program(user_program(r#"(Program @app (Lit value=1))"#));
        host.attach(Arc::new(bridge));
        let value = host
            .invoke_start(mode_args(&[
                AttrValue::Str("serve".into()),
                AttrValue::Int(8080),
            ]))
            .unwrap();
        assert_eq!(value, Value::Int(0));
    }

    #[test]
    fn unknown_mode_is_run002() {
        let mut host =
            KernelHost::bootstrap(&KernelSource::builtin(), &HostOptions::default()).unwrap();
        let bridge = HostBridge::new(
            Box::new(StartOnlySource::new()),
            Box::new(CliExecutor::with_console(Arc::new(MemorySink::default()))),
        );
        host.attach(Arc::new(bridge));
        let err = host
            .invoke_start(mode_args(&[AttrValue::Str("dance".into())]))
            .unwrap_err();
        assert_eq!(err.code, "RUN002");
    }

    #[test]
    fn exhausted_source_makes_cycle_return_zero() {
        let mut host =
            KernelHost::bootstrap(&KernelSource::builtin(), &HostOptions::default()).unwrap();
        let bridge = Arc::new(
            HostBridge::new(
                Box::new(StartOnlySource::new()),
                Box::new(CliExecutor::with_console(Arc::new(MemorySink::default()))),
            )
            .with_user_program(user_program(r#"(Program @app (Lit value="x"))"#)),
        );
        host.attach(bridge);
        assert_eq!(host.run_cycle().unwrap(), Value::Str("x".into()));
        // Start-only source is now terminal; the next cycle sees no event.
        assert_eq!(host.run_cycle().unwrap(), Value::Int(0));
    }

    #[test]
    fn invalid_kernel_source_is_krn002() {
        let kernel = KernelSource {
            text: "(Program name=\"runtime\"".to_owned(),
            path: None,
        };
        let err = KernelHost::bootstrap(&kernel, &HostOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.code, "KRN002");

        let kernel = KernelSource {
            text: "(Block (Lit value=1))".to_owned(),
            path: None,
        };
        let err = KernelHost::bootstrap(&kernel, &HostOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.code, "KRN002");
    }

    #[test]
    fn locator_prefers_disk_copies_and_strict_mode_is_krn001() {
        let root = unique_test_root("aos-kernel-locate");
        std::fs::create_dir_all(&root).unwrap();

        let strict = KernelLocator::with_roots(vec![root.clone()]);
        assert_eq!(strict.locate().unwrap_err().code, "KRN001");

        std::fs::write(root.join("runtime.aos"), "(Program name=\"runtime\")").unwrap();
        let located = strict.locate().unwrap();
        assert_eq!(located.text, "(Program name=\"runtime\")");
        assert_eq!(located.path, Some(root.join("runtime.aos")));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn user_permissions_reach_dispatched_programs() {
        let sink = Arc::new(MemorySink::default());
        let mut host =
            KernelHost::bootstrap(&KernelSource::builtin(), &HostOptions::default()).unwrap();
        let mut permissions = BTreeSet::new();
        permissions.insert("console".to_owned());
        let bridge = HostBridge::new(
            Box::new(StartOnlySource::new()),
            Box::new(CliExecutor::with_console(sink.clone())),
        )
        .with_user_program(user_program(
            r#"(Program @app (Call fn="print" (Lit value="granted")))"#,
        ))
        .with_permissions(permissions)
        .with_console(sink.clone());
        host.attach(Arc::new(bridge));
        host.invoke_start(mode_args(&[AttrValue::Str("run".into())]))
            .unwrap();
        assert_eq!(sink.lines(), vec!["granted"]);
    }
}
