//! Command executors.

use std::sync::Arc;

use aos_tree::{Tree, ids, kinds};
use parking_lot::Mutex;
use tracing::debug;

/// Where `Print` and stdout emits land. Injectable so tests capture output
/// instead of scraping the process stdout.
pub trait ConsoleSink: Send + Sync {
    fn write_line(&self, text: &str);
}

/// Default sink: standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn write_line(&self, text: &str) {
        println!("{text}");
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ConsoleSink for MemorySink {
    fn write_line(&self, text: &str) {
        self.lines.lock().push(text.to_owned());
    }
}

/// Consumer of `Command` trees, called once per command in yield order.
/// Returns `Some(code)` only for `Exit`; non-`Command` trees are ignored.
pub trait CommandExecutor: Send {
    fn execute(&mut self, command: &Tree) -> Option<i32>;
}

fn exit_code(command: &Tree) -> i32 {
    command.attr_int("code").unwrap_or(0) as i32
}

/// Batch-mode executor: `Print` and `Emit{type="stdout"}` write to the
/// console sink, any other emit type is a no-op, `Exit` returns its code.
pub struct CliExecutor {
    console: Arc<dyn ConsoleSink>,
}

impl CliExecutor {
    pub fn new() -> Self {
        Self::with_console(Arc::new(StdoutSink))
    }

    pub fn with_console(console: Arc<dyn ConsoleSink>) -> Self {
        Self { console }
    }
}

impl Default for CliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for CliExecutor {
    fn execute(&mut self, command: &Tree) -> Option<i32> {
        if !command.is_kind(kinds::COMMAND) {
            return None;
        }
        match command.id.as_str() {
            ids::EXIT => Some(exit_code(command)),
            ids::PRINT => {
                self.console.write_line(command.attr_str("text").unwrap_or(""));
                None
            }
            ids::EMIT => {
                if command.attr_str("type") == Some("stdout") {
                    self.console
                        .write_line(command.attr_str("payload").unwrap_or(""));
                }
                None
            }
            other => {
                debug!(command = other, "unrecognized command id ignored");
                None
            }
        }
    }
}

/// Shared handle on a serve executor's pending response body. The listener
/// keeps a clone so it can drain the body after the executor has been boxed
/// behind the syscall bridge.
#[derive(Clone, Default)]
pub struct ResponseSlot {
    body: Arc<Mutex<Option<String>>>,
}

impl ResponseSlot {
    pub fn set(&self, body: String) {
        *self.body.lock() = Some(body);
    }

    pub fn take(&self) -> Option<String> {
        self.body.lock().take()
    }

    pub fn get(&self) -> Option<String> {
        self.body.lock().clone()
    }

    pub fn clear(&self) {
        *self.body.lock() = None;
    }
}

/// Serve-mode executor. `Emit{type="http.response"}` buffers the payload as
/// the pending response body (last write wins within one request cycle);
/// `Exit` additionally latches an exit-requested flag. `reset` clears both
/// before each connection's cycle so no stale body leaks across requests.
pub struct ServeExecutor {
    console: Arc<dyn ConsoleSink>,
    response: ResponseSlot,
    exit_requested: bool,
}

impl ServeExecutor {
    pub fn new() -> Self {
        Self::with_console(Arc::new(StdoutSink))
    }

    pub fn with_console(console: Arc<dyn ConsoleSink>) -> Self {
        Self {
            console,
            response: ResponseSlot::default(),
            exit_requested: false,
        }
    }

    pub fn response_slot(&self) -> ResponseSlot {
        self.response.clone()
    }

    pub fn reset(&mut self) {
        self.response.clear();
        self.exit_requested = false;
    }

    pub fn take_response(&mut self) -> Option<String> {
        self.response.take()
    }

    pub fn response(&self) -> Option<String> {
        self.response.get()
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

impl Default for ServeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ServeExecutor {
    fn execute(&mut self, command: &Tree) -> Option<i32> {
        if !command.is_kind(kinds::COMMAND) {
            return None;
        }
        match command.id.as_str() {
            ids::EXIT => {
                self.exit_requested = true;
                Some(exit_code(command))
            }
            ids::PRINT => {
                self.console.write_line(command.attr_str("text").unwrap_or(""));
                None
            }
            ids::EMIT => {
                match command.attr_str("type") {
                    Some("http.response") => {
                        self.response
                            .set(command.attr_str("payload").unwrap_or("").to_owned());
                    }
                    Some("stdout") => {
                        self.console
                            .write_line(command.attr_str("payload").unwrap_or(""));
                    }
                    _ => {}
                }
                None
            }
            other => {
                debug!(command = other, "unrecognized command id ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aos_tree::Tree;

    use super::*;

    #[test]
    fn cli_executor_prints_and_exits() {
        let sink = Arc::new(MemorySink::default());
        let mut executor = CliExecutor::with_console(sink.clone());

        assert_eq!(executor.execute(&Tree::command_print("hello")), None);
        assert_eq!(executor.execute(&Tree::command_emit("stdout", "world")), None);
        assert_eq!(executor.execute(&Tree::command_emit("metrics", "x")), None);
        assert_eq!(executor.execute(&Tree::command_exit(4)), Some(4));
        assert_eq!(sink.lines(), vec!["hello", "world"]);
    }

    #[test]
    fn non_command_trees_are_ignored() {
        let mut executor = CliExecutor::with_console(Arc::new(MemorySink::default()));
        assert_eq!(executor.execute(&Tree::event_start()), None);
        assert_eq!(executor.execute(&Tree::err("RUN001", "x", "")), None);
    }

    #[test]
    fn serve_executor_buffers_response_and_resets() {
        let mut executor = ServeExecutor::with_console(Arc::new(MemorySink::default()));
        executor.reset();
        assert_eq!(executor.response(), None);

        executor.execute(&Tree::command_emit("http.response", "X"));
        assert_eq!(executor.response(), Some("X".to_owned()));

        // stdout emits do not disturb the buffered response.
        executor.execute(&Tree::command_emit("stdout", "Y"));
        assert_eq!(executor.response(), Some("X".to_owned()));

        // The detached slot sees the same body as the executor.
        let slot = executor.response_slot();
        assert_eq!(slot.get(), Some("X".to_owned()));

        // Last write wins within one cycle.
        executor.execute(&Tree::command_emit("http.response", "Z"));
        assert_eq!(executor.take_response(), Some("Z".to_owned()));
        assert_eq!(executor.response(), None);
    }

    #[test]
    fn serve_executor_latches_exit_until_reset() {
        let mut executor = ServeExecutor::with_console(Arc::new(MemorySink::default()));
        assert!(!executor.exit_requested());
        assert_eq!(executor.execute(&Tree::command_exit(9)), Some(9));
        assert!(executor.exit_requested());

        executor.execute(&Tree::command_emit("http.response", "body"));
        executor.reset();
        assert!(!executor.exit_requested());
        assert_eq!(executor.response(), None);
    }
}
