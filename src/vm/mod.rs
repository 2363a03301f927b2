//! Workflow virtual machine and public API
//!
//! The machine interprets an immutable activity tree one tick at a time,
//! keeps scoped variables on its execution stack and can be frozen into a
//! plain JSON document and rebuilt in another process.

use serde::{Deserialize, Serialize};

// Submodules
pub mod activities;
pub mod activity;
pub mod breakpoint;
pub mod clock;
pub mod context;
pub mod control;
pub mod error;
pub mod injection;
pub mod invoker;
pub mod machine;
pub mod persistence;
pub mod registry;
pub mod stack;
pub mod storage;
pub mod value;
pub mod variables;

pub use activity::{Activity, ActivityKind, ActivityRef, BreakpointInfo};
pub use breakpoint::BreakpointControl;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::ExecutionContext;
pub use error::{PersistError, RegistryError, StateError, StructuralError, VmError, VmResult};
pub use injection::{InjectionContext, InjectionRegistry};
pub use invoker::{Invoker, InvokerState, InvokerStatus, WorkflowId};
pub use machine::Vm;
pub use persistence::{FrameState, PersistedDocument};
pub use registry::ActivityRegistry;
pub use stack::{ExecutionStack, StackFrame};
pub use storage::DocumentStore;
pub use value::{Scope, Value, Variable};
pub use variables::Variables;

/// Configuration for a workflow machine and its invoker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Wake delay armed by a paused breakpoint before it is re-evaluated
    pub breakpoint_recheck_ms: u64,

    /// Invoker sleep when idle without a countdown
    pub idle_backoff_ms: u64,

    /// Completed injection count above which the registry compacts
    pub injection_compaction_threshold: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            breakpoint_recheck_ms: 1000,
            idle_backoff_ms: 1000,
            injection_compaction_threshold: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_fills_missing_fields() {
        let config: VmConfig = serde_json::from_str(r#"{"idle_backoff_ms": 50}"#).unwrap();
        assert_eq!(config.idle_backoff_ms, 50);
        assert_eq!(config.breakpoint_recheck_ms, 1000);
        assert_eq!(config.injection_compaction_threshold, 10);
    }
}
