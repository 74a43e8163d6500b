//! # aos-kernel — Kernel Bootstrap & Dispatch
//!
//! Loads the fixed kernel program (`runtime.aos`), evaluates its top level
//! with the `sys` capability granted, and invokes its exported entry point
//! with mode arguments. The [`HostBridge`] mediates between the kernel's
//! event loop and the host's event source / command executor pair; the
//! kernel never learns which variants are attached.

pub mod bootstrap;
pub mod bridge;

pub use bootstrap::{
    HostOptions, KERNEL_FILENAME, KERNEL_SOURCE, KernelHost, KernelLocator, KernelSource,
    mode_args,
};
pub use bridge::HostBridge;
