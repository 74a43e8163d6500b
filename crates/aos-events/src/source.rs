//! Event sources.

use aos_tree::{Tree, Value, kinds};
use tracing::debug;

/// Producer of a finite sequence of `Event` trees.
///
/// Contract: once `next_event` returns `None` it keeps returning `None` for
/// the lifetime of the instance.
pub trait EventSource: Send {
    fn next_event(&mut self) -> Option<Tree>;
}

/// Yields exactly one `Event{Start}` then terminates. The default driver
/// for batch `run`.
#[derive(Debug, Default)]
pub struct StartOnlySource {
    consumed: bool,
}

impl StartOnlySource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for StartOnlySource {
    fn next_event(&mut self) -> Option<Tree> {
        if self.consumed {
            return None;
        }
        self.consumed = true;
        Some(Tree::event_start())
    }
}

/// Yields exactly one `Event{Message}` then terminates. Used by test and
/// simulation harnesses to feed a single synthetic inbound message without
/// a real transport.
#[derive(Debug)]
pub struct MessageOnceSource {
    event: Option<Tree>,
}

impl MessageOnceSource {
    pub fn new(message_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: Some(Tree::event_message(message_type, payload)),
        }
    }

    /// Extracts a message event from the program's argv-shaped input:
    /// a `Node` wrapping a `Block`-like tree whose first three children are
    /// `Lit` leaves with string `value` attributes, the first of which is
    /// the `"__event_message"` tag. Returns `None` on any shape mismatch.
    pub fn from_argv(argv: &Value) -> Option<Self> {
        let block = argv.as_node()?;
        let mut literals = block.children.iter().take(3).filter_map(|child| {
            if child.is_kind(kinds::LIT) {
                child.attr_str("value")
            } else {
                None
            }
        });
        let tag = literals.next()?;
        let message_type = literals.next()?;
        let payload = literals.next()?;
        if tag != "__event_message" {
            return None;
        }
        debug!(message_type, "message-once source extracted from argv");
        Some(Self::new(message_type, payload))
    }
}

impl EventSource for MessageOnceSource {
    fn next_event(&mut self) -> Option<Tree> {
        self.event.take()
    }
}

/// Selects the event source for a batch run: a message-once source when the
/// argv block carries the `__event_message` tag, otherwise start-only.
/// Shape mismatches fall back silently — a deliberate permissive default.
pub fn source_from_argv(argv: &Value) -> Box<dyn EventSource> {
    match MessageOnceSource::from_argv(argv) {
        Some(source) => Box::new(source),
        None => Box::new(StartOnlySource::new()),
    }
}

/// Constructed per accepted connection; yields exactly one `Event{Message}`
/// with `type="http.request"` and `payload="<METHOD> <PATH>"`.
#[derive(Debug)]
pub struct HttpRequestSource {
    event: Option<Tree>,
}

impl HttpRequestSource {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            event: Some(Tree::event_message(
                "http.request",
                format!("{method} {path}"),
            )),
        }
    }
}

impl EventSource for HttpRequestSource {
    fn next_event(&mut self) -> Option<Tree> {
        self.event.take()
    }
}
