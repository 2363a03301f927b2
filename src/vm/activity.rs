//! Activity tree node abstraction
//!
//! An activity tree is built once by the host and never mutated. Nodes carry
//! no parent pointers; the position of a node is only known through the
//! current stack path of a machine executing the tree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::context::ExecutionContext;
use super::error::StructuralError;

/// Shared handle to an immutable activity node
pub type ActivityRef = Arc<dyn Activity>;

/// Discriminant used by the scheduler to dispatch an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    /// Leaf: runs once per visit and is popped afterwards
    Business,
    /// Composite: owns children and drives pushes/pops
    Native,
    /// Composite that can halt the whole machine until resumed
    Breakpoint,
}

impl ActivityKind {
    /// Whether the kind may push children and pop itself.
    pub fn is_composite(self) -> bool {
        !matches!(self, ActivityKind::Business)
    }
}

/// Public description of a breakpoint, handed to waiters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    /// Unique name inside the tree
    pub name: String,
    /// Free text shown to operators
    #[serde(default)]
    pub description: String,
}

/// One node of the workflow tree
#[async_trait]
pub trait Activity: Send + Sync + fmt::Debug {
    /// Stable type identifier, used as the registry key on restore.
    fn activity_type(&self) -> &str;

    /// Node variant.
    fn kind(&self) -> ActivityKind;

    /// Ordered children; empty for leaves.
    fn children(&self) -> &[ActivityRef] {
        &[]
    }

    /// Construction options as plain data.
    fn options(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Breakpoint description, for [`ActivityKind::Breakpoint`] nodes.
    fn breakpoint(&self) -> Option<&BreakpointInfo> {
        None
    }

    /// Run one invocation against the current top frame.
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()>;
}

/// Visit `root` and all of its descendants depth-first, in child order.
pub fn walk<F>(root: &ActivityRef, visit: &mut F)
where
    F: FnMut(&ActivityRef),
{
    let mut pending = vec![root.clone()];
    while let Some(activity) = pending.pop() {
        visit(&activity);
        pending.extend(activity.children().iter().rev().cloned());
    }
}

/// Collect every breakpoint of the tree, rejecting duplicate names.
pub fn collect_breakpoints(root: &ActivityRef) -> Result<Vec<BreakpointInfo>, StructuralError> {
    scan(std::slice::from_ref(root))
}

/// Reject sibling subtrees that reuse a breakpoint name.
///
/// Composites call this when built through `try_new`, so the clash is
/// reported where the tree is assembled rather than when a machine binds it.
pub fn ensure_unique_breakpoints(children: &[ActivityRef]) -> Result<(), StructuralError> {
    scan(children).map(|_| ())
}

fn scan(roots: &[ActivityRef]) -> Result<Vec<BreakpointInfo>, StructuralError> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut duplicate = None;

    for root in roots {
        walk(root, &mut |activity| {
            if let Some(info) = activity.breakpoint() {
                if !seen.insert(info.name.clone()) && duplicate.is_none() {
                    duplicate = Some(info.name.clone());
                }
                found.push(info.clone());
            }
        });
    }

    match duplicate {
        Some(name) => Err(StructuralError::DuplicateBreakpoint(name)),
        None => Ok(found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::activities::{Breakpoint, Log, Sequence};

    #[test]
    fn test_collect_breakpoints() {
        let tree: ActivityRef = Sequence::new(vec![
            Breakpoint::new("SETUP", "Setup data"),
            Log::new("hello"),
            Breakpoint::new("DONE", ""),
        ]);
        let names: Vec<_> = collect_breakpoints(&tree)
            .unwrap()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["SETUP", "DONE"]);
    }

    #[test]
    fn test_duplicate_breakpoint_rejected() {
        let tree: ActivityRef = Sequence::new(vec![
            Breakpoint::new("GATE", ""),
            Sequence::new(vec![Breakpoint::new("GATE", "again")]),
        ]);
        assert_eq!(
            collect_breakpoints(&tree),
            Err(StructuralError::DuplicateBreakpoint("GATE".into()))
        );
    }

    #[test]
    fn test_unique_breakpoints_across_siblings() {
        let distinct = [Breakpoint::new("A", ""), Sequence::new(vec![Breakpoint::new("B", "")])];
        assert_eq!(ensure_unique_breakpoints(&distinct), Ok(()));

        let clashing = [Breakpoint::new("A", ""), Sequence::new(vec![Breakpoint::new("A", "")])];
        assert_eq!(
            ensure_unique_breakpoints(&clashing),
            Err(StructuralError::DuplicateBreakpoint("A".into()))
        );
        assert_eq!(ensure_unique_breakpoints(&[]), Ok(()));
    }
}
