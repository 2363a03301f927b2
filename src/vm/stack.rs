//! Execution stack
//!
//! Frames trace the path from the root activity to the active node. The
//! activity of every frame above the root is always
//! `parent.children()[child_index]`, which is what makes the stack
//! reconstructible from child indices alone.

use std::sync::Arc;

use super::activity::{Activity, ActivityRef};
use super::error::{StateError, StructuralError, VmResult};
use super::value::{Scope, Variable};

/// One in-progress activity invocation
#[derive(Debug, Clone)]
pub struct StackFrame {
    activity: ActivityRef,
    child_index: usize,
    invocation_count: u64,
    variables: Vec<Variable>,
}

impl StackFrame {
    fn new(activity: ActivityRef, child_index: usize) -> Self {
        Self {
            activity,
            child_index,
            invocation_count: 0,
            variables: Vec::new(),
        }
    }

    pub(crate) fn restored(
        activity: ActivityRef,
        child_index: usize,
        invocation_count: u64,
        variables: Vec<Variable>,
    ) -> Self {
        Self {
            activity,
            child_index,
            invocation_count,
            variables,
        }
    }

    /// Activity executed by this frame
    pub fn activity(&self) -> &ActivityRef {
        &self.activity
    }

    /// Position in the parent's children (0 for the root)
    pub fn child_index(&self) -> usize {
        self.child_index
    }

    /// Number of times the activity was invoked on this frame
    pub fn invocation_count(&self) -> u64 {
        self.invocation_count
    }

    /// Bindings defined in this frame, in definition order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub(crate) fn increment(&mut self) -> u64 {
        self.invocation_count += 1;
        self.invocation_count
    }

    pub(crate) fn binding(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub(crate) fn binding_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub(crate) fn bind(&mut self, variable: Variable) -> VmResult<()> {
        if self.binding(&variable.name).is_some() {
            return Err(StateError::AlreadyDefined(variable.name).into());
        }
        if !variable.value.is_persistable() {
            return Err(StateError::NotPersistable(variable.name).into());
        }
        self.variables.push(variable);
        Ok(())
    }
}

/// Ordered frames, root first
#[derive(Debug, Default)]
pub struct ExecutionStack {
    frames: Vec<StackFrame>,
}

impl ExecutionStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack with the root activity as frame 0
    pub fn with_root(root: ActivityRef) -> Self {
        Self {
            frames: vec![StackFrame::new(root, 0)],
        }
    }

    pub(crate) fn from_frames(frames: Vec<StackFrame>) -> Self {
        Self { frames }
    }

    /// Number of frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the stack is empty (the machine terminated)
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames, root first
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Top frame
    pub fn top(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut()
    }

    pub(crate) fn frame_mut(&mut self, depth: usize) -> Option<&mut StackFrame> {
        self.frames.get_mut(depth)
    }

    /// Push `parent.children()[index]` where parent is the top activity.
    pub fn push(&mut self, index: usize) -> VmResult<()> {
        let parent = self.top().ok_or(StateError::EmptyStack)?.activity.clone();

        if !parent.kind().is_composite() {
            return Err(StateError::NotComposite(parent.activity_type().to_string()).into());
        }

        let child = parent.children().get(index).cloned().ok_or_else(|| {
            StructuralError::ChildOutOfRange {
                activity: parent.activity_type().to_string(),
                index,
            }
        })?;

        self.frames.push(StackFrame::new(child, index));
        Ok(())
    }

    /// Remove the top frame.
    pub fn pop(&mut self) -> VmResult<StackFrame> {
        self.frames
            .pop()
            .ok_or_else(|| StateError::StackUnderflow.into())
    }

    /// Oid of the frame at `depth`: dot-joined child indices from the root.
    pub fn oid_at(&self, depth: usize) -> Option<String> {
        if depth >= self.frames.len() {
            return None;
        }
        let parts: Vec<String> = self.frames[..=depth]
            .iter()
            .map(|frame| frame.child_index.to_string())
            .collect();
        Some(parts.join("."))
    }

    /// Oid of the top frame.
    pub fn top_oid(&self) -> Option<String> {
        self.frames.len().checked_sub(1).and_then(|d| self.oid_at(d))
    }

    /// Oid of a specific activity, walking the stack from the root.
    pub fn oid_of(&self, activity: &ActivityRef) -> VmResult<String> {
        let mut parts = Vec::new();
        for frame in &self.frames {
            parts.push(frame.child_index.to_string());
            if same_activity(&frame.activity, activity) {
                return Ok(parts.join("."));
            }
        }
        Err(StructuralError::NotOnStack(activity.activity_type().to_string()).into())
    }

    /// Depth of the nearest frame strictly below the top whose activity
    /// matches `predicate`.
    pub fn nearest_ancestor<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&dyn Activity) -> bool,
    {
        let below_top = self.frames.len().checked_sub(1)?;
        (0..below_top)
            .rev()
            .find(|&depth| predicate(self.frames[depth].activity.as_ref()))
    }

    /// Depth of the frame running the breakpoint called `name`.
    pub fn breakpoint_depth(&self, name: &str) -> Option<usize> {
        self.frames.iter().position(|frame| {
            frame
                .activity
                .breakpoint()
                .is_some_and(|info| info.name == name)
        })
    }

    /// Scope-aware lookup: scan from the top frame outward, accepting a
    /// binding in the top frame or an INHERIT binding below it.
    pub fn find_variable(&self, name: &str) -> Option<(usize, usize)> {
        let top = self.frames.len().checked_sub(1)?;
        for depth in (0..=top).rev() {
            let frame = &self.frames[depth];
            if let Some(slot) = frame.variables.iter().position(|v| v.name == name) {
                let variable = &frame.variables[slot];
                if depth == top || variable.scope == Scope::Inherit {
                    return Some((depth, slot));
                }
            }
        }
        None
    }

    pub(crate) fn variable(&self, depth: usize, slot: usize) -> &Variable {
        &self.frames[depth].variables[slot]
    }

    pub(crate) fn variable_mut(&mut self, depth: usize, slot: usize) -> &mut Variable {
        &mut self.frames[depth].variables[slot]
    }
}

/// Pointer identity of two activity handles.
pub(crate) fn same_activity(a: &ActivityRef, b: &ActivityRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
