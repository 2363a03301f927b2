//! wfvm – a durable workflow virtual machine
//!
//! This crate runs declarative activity trees as long-lived processes:
//! - Tick-based, single-step interpretation of an immutable activity tree
//! - Scoped variables living on the execution stack
//! - Named breakpoints that suspend the machine until resumed from outside
//! - Countdown-driven delays that let the host sleep instead of polling
//! - Preserve/restore of the whole machine as a plain JSON document
//! - An invoker with injection hooks for driving machines to completion

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Workflow virtual machine: activities, stack, scheduler and persistence
pub mod vm;

// Re-export key types for convenience
pub use vm::{ActivityRegistry, Invoker, Vm, VmConfig, VmError, VmResult};

/// Current version of wfvm
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
