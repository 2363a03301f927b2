//! Persisted machine documents
//!
//! A document holds the root type id (plus optional root options), the armed
//! wake time and, per frame, the child index, invocation counter and
//! variable bindings. Activities are never serialized: restore rebuilds the
//! tree from the registry and re-derives every frame by indexing the
//! children of the frame below it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::VmConfig;
use super::activity::ActivityRef;
use super::error::{PersistError, PersistResult, StructuralError, VmResult};
use super::machine::Vm;
use super::registry::ActivityRegistry;
use super::stack::{ExecutionStack, StackFrame};
use super::value::Variable;

/// Persisted state of one stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameState {
    /// Position in the parent's children; 0 for the root
    pub child_index: usize,
    /// Invocations so far
    pub invocation_count: u64,
    /// Bindings owned by the frame
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// Serializable snapshot of a whole machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    /// Registry key of the root activity
    pub root_type_id: String,

    /// Construction options of the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_options: Option<serde_json::Value>,

    /// Armed wake time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_wake_time: Option<DateTime<Utc>>,

    /// Frames, root first
    pub frames: Vec<FrameState>,
}

impl PersistedDocument {
    /// Encode as JSON
    pub fn to_json(&self) -> PersistResult<String> {
        serde_json::to_string(self).map_err(|err| PersistError::Encoding(err.to_string()))
    }

    /// Encode as indented JSON
    pub fn to_json_pretty(&self) -> PersistResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| PersistError::Encoding(err.to_string()))
    }

    /// Decode from JSON
    pub fn from_json(text: &str) -> PersistResult<Self> {
        serde_json::from_str(text).map_err(|err| PersistError::Decoding(err.to_string()))
    }

    /// Whether the document describes a finished machine
    pub fn is_terminated(&self) -> bool {
        self.frames.is_empty()
    }

    /// Rebuild the execution stack on top of `root`.
    fn rebuild_stack(&self, root: &ActivityRef) -> VmResult<ExecutionStack> {
        let mut frames: Vec<StackFrame> = Vec::with_capacity(self.frames.len());

        for (depth, state) in self.frames.iter().enumerate() {
            let activity = match frames.last() {
                None => {
                    if state.child_index != 0 {
                        return Err(StructuralError::InvalidDocument(format!(
                            "root frame has child index {}",
                            state.child_index
                        ))
                        .into());
                    }
                    root.clone()
                }
                Some(parent) => {
                    let parent = parent.activity();
                    if !parent.kind().is_composite() {
                        return Err(StructuralError::InvalidDocument(format!(
                            "frame {depth} sits on leaf activity '{}'",
                            parent.activity_type()
                        ))
                        .into());
                    }
                    parent
                        .children()
                        .get(state.child_index)
                        .cloned()
                        .ok_or_else(|| StructuralError::ChildOutOfRange {
                            activity: parent.activity_type().to_string(),
                            index: state.child_index,
                        })?
                }
            };

            let mut seen = std::collections::HashSet::new();
            for variable in &state.variables {
                if !seen.insert(variable.name.as_str()) {
                    return Err(StructuralError::InvalidDocument(format!(
                        "frame {depth} binds '{}' twice",
                        variable.name
                    ))
                    .into());
                }
            }

            frames.push(StackFrame::restored(
                activity,
                state.child_index,
                state.invocation_count,
                state.variables.clone(),
            ));
        }

        Ok(ExecutionStack::from_frames(frames))
    }
}

impl Vm {
    /// Capture the persistable state of the machine.
    ///
    /// Control flags and breakpoint waiters are runtime-only and left out.
    pub fn preserve(&self) -> PersistedDocument {
        let root = self.root();
        let options = root.options();
        PersistedDocument {
            root_type_id: root.activity_type().to_string(),
            root_options: (!options.is_null()).then_some(options),
            pending_wake_time: self.pending_wake(),
            frames: self
                .stack()
                .frames()
                .iter()
                .map(|frame| FrameState {
                    child_index: frame.child_index(),
                    invocation_count: frame.invocation_count(),
                    variables: frame.variables().to_vec(),
                })
                .collect(),
        }
    }

    /// Rebuild a machine from a document.
    pub fn restore(
        document: &PersistedDocument,
        registry: &ActivityRegistry,
        config: VmConfig,
    ) -> VmResult<Self> {
        let options = document
            .root_options
            .clone()
            .unwrap_or(serde_json::Value::Null);
        let root = registry.construct(&document.root_type_id, &options)?;
        let stack = document.rebuild_stack(&root)?;

        let mut vm = Vm::from_parts(root, stack, document.pending_wake_time, config)?;
        vm.resync_breakpoints();

        tracing::info!(
            root = %document.root_type_id,
            depth = document.frames.len(),
            paused = vm.is_paused(),
            "workflow machine restored"
        );
        Ok(vm)
    }

    /// Decode and restore in one step.
    pub fn restore_json(text: &str, registry: &ActivityRegistry, config: VmConfig) -> VmResult<Self> {
        let document = PersistedDocument::from_json(text)?;
        Self::restore(&document, registry, config)
    }
}
