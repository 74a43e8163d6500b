//! aOS daemon: runs tree-language programs in batch, serves them over
//! HTTP(S), or evaluates them line by line in a REPL. Before any CLI
//! parsing the binary probes its own executable for an embedded payload and,
//! when one is present, runs that instead.

use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use aos_events::{CliExecutor, StdoutSink, source_from_argv};
use aos_kernel::{HostBridge, HostOptions, KernelHost, KernelLocator, mode_args};
use aos_payload::Payload;
use aos_runtime::{Runtime, evaluate_expr, evaluate_program, run_bytecode, validate};
use aos_server::{ServeConfig, TlsPaths};
use aos_tree::{AttrValue, Diagnostic, HostError, Tree, Value, kinds};
use aos_wire::format_tree;
use clap::{Parser, Subcommand, ValueEnum, error::ErrorKind};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "aosd")]
#[command(about = "aOS tree-language runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a program once and print its result tree.
    Run {
        path: PathBuf,
        /// Print the Trace tree after the result.
        #[arg(long)]
        trace: bool,
        #[arg(long, value_enum, default_value_t = VmMode::Ast)]
        vm: VmMode,
        /// Capability grants in addition to the default `console`.
        #[arg(long = "allow", value_name = "CAP")]
        allow: Vec<String>,
        /// Program arguments, after `--`.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Serve a program: one dispatch cycle per HTTP(S) request.
    Serve {
        path: PathBuf,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, requires = "tls_key")]
        tls_cert: Option<PathBuf>,
        #[arg(long, requires = "tls_cert")]
        tls_key: Option<PathBuf>,
        #[arg(long)]
        trace: bool,
        #[arg(long = "allow", value_name = "CAP")]
        allow: Vec<String>,
    },
    /// Evaluate trees line by line in a persistent environment.
    Repl {
        #[arg(long = "allow", value_name = "CAP")]
        allow: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VmMode {
    Ast,
    Bytecode,
}

impl VmMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ast => "ast",
            Self::Bytecode => "bytecode",
        }
    }
}

const EXIT_USAGE: u8 = 1;
const EXIT_LOAD: u8 = 2;
const EXIT_RUNTIME: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .compact()
        .with_writer(std::io::stderr)
        .init();

    // Embedded payloads take precedence over the CLI surface entirely.
    match aos_payload::probe_current_exe() {
        Ok(Some(payload)) => return run_payload(payload),
        Ok(None) => {}
        Err(err) => return report_error(err, EXIT_RUNTIME),
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    match cli.command {
        Command::Run {
            path,
            trace,
            vm,
            allow,
            args,
        } => run_command(&path, trace, vm, &allow, &args),
        Command::Serve {
            path,
            port,
            tls_cert,
            tls_key,
            trace,
            allow,
        } => {
            let tls = tls_cert
                .zip(tls_key)
                .map(|(cert, key)| TlsPaths { cert, key });
            serve_command(&path, ServeConfig { port, tls, trace }, &allow).await
        }
        Command::Repl { allow } => repl_command(&allow),
    }
}

fn print_tree(tree: &Tree) {
    println!("{}", format_tree(tree));
}

fn report_error(err: HostError, code: u8) -> ExitCode {
    print_tree(&err.into_tree());
    ExitCode::from(code)
}

fn report_diagnostic(diag: &Diagnostic) -> ExitCode {
    print_tree(&HostError::from(diag).into_tree());
    ExitCode::from(EXIT_LOAD)
}

/// Maps a cycle value to the tree to print and the process exit code. A
/// `Node` wrapping an `Err` tree is a failure result: the `Err` tree itself
/// is reported and the process exits 3, never `Ok`-wrapped.
fn report_value(value: &Value) -> (Tree, u8) {
    match value.as_node() {
        Some(node) if node.is_err() => (node.clone(), EXIT_RUNTIME),
        _ => {
            let code = match value {
                Value::Int(code) => (*code).clamp(0, 255) as u8,
                _ => 0,
            };
            (Tree::ok_value(value), code)
        }
    }
}

fn grants(allow: &[String]) -> BTreeSet<String> {
    let mut permissions: BTreeSet<String> = allow.iter().cloned().collect();
    permissions.insert("console".to_owned());
    permissions
}

fn argv_block(args: &[String]) -> Tree {
    let mut block = Tree::new(kinds::BLOCK);
    for arg in args {
        block = block.with_child(Tree::new(kinds::LIT).with_str("value", arg.clone()));
    }
    block
}

/// Loads and parses one source file; parse failures are load errors.
fn load_source(path: &Path) -> Result<Arc<Tree>, ExitCode> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read program {}", path.display()))
        .map_err(|err| {
            eprintln!("{err:#}");
            ExitCode::from(EXIT_USAGE)
        })?;
    let outcome = aos_wire::parse(&source);
    if let Some(diag) = outcome.diagnostics.first() {
        return Err(report_diagnostic(diag));
    }
    match outcome.root {
        Some(root) => Ok(Arc::new(root)),
        None => Err(report_diagnostic(&Diagnostic::new(
            "PAR001",
            "source produced no tree",
        ))),
    }
}

fn module_base(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn maybe_print_trace(host: &KernelHost, enabled: bool) {
    let trace = host.trace();
    if enabled && !trace.is_empty() {
        print_tree(&trace.to_tree());
    }
}

fn run_command(
    path: &Path,
    trace: bool,
    vm: VmMode,
    allow: &[String],
    args: &[String],
) -> ExitCode {
    let root = match load_source(path) {
        Ok(root) => root,
        Err(code) => return code,
    };
    let permissions = grants(allow);

    if vm == VmMode::Bytecode {
        // Bytecode trees are kernel-less and bypass the program validator.
        return run_bytecode_tree(&root, &argv_block(args), &permissions, trace);
    }

    if let Some(diag) = validate(&root, &permissions).first() {
        return report_diagnostic(diag);
    }

    let argv = Value::Node(argv_block(args));
    run_tree(
        root,
        module_base(path),
        permissions,
        argv,
        VmMode::Ast,
        trace,
    )
}

/// Bootstraps the kernel and runs one `start(["run"])` invocation over the
/// given user program.
fn run_tree(
    root: Arc<Tree>,
    base: PathBuf,
    permissions: BTreeSet<String>,
    argv: Value,
    vm: VmMode,
    trace: bool,
) -> ExitCode {
    let kernel = match KernelLocator::standard().locate() {
        Ok(kernel) => kernel,
        Err(err) => return report_error(err, EXIT_RUNTIME),
    };
    let options = HostOptions {
        module_base: base.clone(),
        permissions: permissions.clone(),
        argv: argv.clone(),
        vm_mode: vm.as_str().to_owned(),
        trace,
        console: Arc::new(StdoutSink),
    };
    let mut host = match KernelHost::bootstrap(&kernel, &options) {
        Ok(host) => host,
        Err(err) => return report_error(err, EXIT_RUNTIME),
    };

    let bridge = Arc::new(
        HostBridge::new(source_from_argv(&argv), Box::new(CliExecutor::new()))
            .with_user_program(root)
            .with_permissions(permissions)
            .with_argv(argv)
            .with_vm_mode(vm.as_str())
            .with_module_base(base)
            .with_trace(host.trace(), trace),
    );
    host.attach(bridge);

    match host.invoke_start(mode_args(&[AttrValue::Str("run".to_owned())])) {
        Ok(value) => {
            let (result, code) = report_value(&value);
            print_tree(&result);
            maybe_print_trace(&host, trace);
            ExitCode::from(code)
        }
        Err(err) => {
            print_tree(&err.into_tree());
            maybe_print_trace(&host, trace);
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

/// Hands a `Bytecode` tree straight to the VM entry `main`.
fn run_bytecode_tree(
    bytecode: &Tree,
    args: &Tree,
    permissions: &BTreeSet<String>,
    trace: bool,
) -> ExitCode {
    let mut runtime = Runtime::new(".");
    for capability in permissions {
        runtime.grant(capability.clone());
    }
    runtime.trace_enabled = trace;
    runtime.seed(Value::Node(args.clone()), "bytecode");
    let mut executor = CliExecutor::new();

    match run_bytecode(bytecode, "main", args, &mut runtime, &mut executor) {
        Ok(value) => {
            let (result, code) = report_value(&value);
            print_tree(&result);
            if trace && !runtime.trace.is_empty() {
                print_tree(&runtime.trace.to_tree());
            }
            ExitCode::from(code)
        }
        Err(err) => {
            print_tree(&err.into_tree());
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

async fn serve_command(path: &Path, config: ServeConfig, allow: &[String]) -> ExitCode {
    let root = match load_source(path) {
        Ok(root) => root,
        Err(code) => return code,
    };
    let permissions = grants(allow);
    if let Some(diag) = validate(&root, &permissions).first() {
        return report_diagnostic(diag);
    }

    let kernel = match KernelLocator::standard().locate() {
        Ok(kernel) => kernel,
        Err(err) => return report_error(err, EXIT_RUNTIME),
    };
    let options = HostOptions {
        module_base: module_base(path),
        permissions: permissions.clone(),
        argv: Value::Unknown,
        vm_mode: VmMode::Ast.as_str().to_owned(),
        trace: config.trace,
        console: Arc::new(StdoutSink),
    };
    let mut host = match KernelHost::bootstrap(&kernel, &options) {
        Ok(host) => host,
        Err(err) => return report_error(err, EXIT_RUNTIME),
    };

    // The kernel validates the serve mode up front; the listener drives the
    // per-connection cycles afterwards.
    if let Err(err) = host.invoke_start(mode_args(&[
        AttrValue::Str("serve".to_owned()),
        AttrValue::Int(i64::from(config.port)),
    ])) {
        return report_error(err, EXIT_RUNTIME);
    }

    match aos_server::serve(
        &mut host,
        Some(root),
        permissions,
        Arc::new(StdoutSink),
        &config,
    )
    .await
    {
        Ok(code) => {
            debug!(code, "listener stopped");
            ExitCode::from(code.clamp(0, 255) as u8)
        }
        Err(err) => report_error(err, EXIT_RUNTIME),
    }
}

fn repl_command(allow: &[String]) -> ExitCode {
    let mut runtime = Runtime::new(".");
    for capability in grants(allow) {
        runtime.grant(capability);
    }
    runtime.seed(Value::Unknown, VmMode::Ast.as_str());

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        if write!(stdout, "aos> ").and_then(|()| stdout.flush()).is_err() {
            return ExitCode::SUCCESS;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return ExitCode::SUCCESS,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" {
            return ExitCode::SUCCESS;
        }

        let outcome = aos_wire::parse(line);
        if let Some(diag) = outcome.diagnostics.first() {
            print_tree(&HostError::from(diag).into_tree());
            continue;
        }
        let Some(tree) = outcome.root else {
            continue;
        };

        let result = if tree.is_kind(kinds::PROGRAM) {
            evaluate_program(&tree, &mut runtime)
        } else {
            evaluate_expr(&tree, &mut runtime)
        };
        match result {
            Ok(value) => print_tree(&Tree::ok_value(&value)),
            Err(err) => print_tree(&err.into_tree()),
        }
    }
}

/// Runs an embedded payload: bundles go through the ordinary kernel
/// bootstrap with `run` arguments, bytecode goes straight to the VM.
fn run_payload(payload: Payload) -> ExitCode {
    let permissions = grants(&[]);
    match payload {
        Payload::Bundle { driver, .. } => {
            if let Some(diag) = validate(&driver, &permissions).first() {
                return report_diagnostic(diag);
            }
            run_tree(
                Arc::new(driver),
                PathBuf::from("."),
                permissions,
                Value::Unknown,
                VmMode::Ast,
                false,
            )
        }
        Payload::Bytecode(bytecode) => {
            run_bytecode_tree(&bytecode, &Tree::new(kinds::BLOCK), &permissions, false)
        }
    }
}
