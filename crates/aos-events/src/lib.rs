//! # aos-events — Host Side of the Kernel Protocol
//!
//! The kernel program only ever sees "pull an event, yield commands". These
//! traits are that boundary: an [`EventSource`] produces `Event` trees, a
//! [`CommandExecutor`] consumes `Command` trees. Swapping variants is how
//! one kernel is driven by a test harness, a batch run, or a live socket
//! without knowing which is attached.

pub mod executor;
pub mod source;

pub use executor::{
    CliExecutor, CommandExecutor, ConsoleSink, MemorySink, ResponseSlot, ServeExecutor,
    StdoutSink,
};
pub use source::{
    EventSource, HttpRequestSource, MessageOnceSource, StartOnlySource, source_from_argv,
};
