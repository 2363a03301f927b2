//! Ordered composite

use async_trait::async_trait;
use std::sync::Arc;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef, ensure_unique_breakpoints};
use crate::vm::context::ExecutionContext;
use crate::vm::error::StructuralError;

/// Runs its children one after another, then pops.
#[derive(Debug)]
pub struct Sequence {
    children: Vec<ActivityRef>,
}

impl Sequence {
    /// Type id
    pub const TYPE_ID: &'static str = "Sequence";

    /// Sequence over `children`
    pub fn new(children: Vec<ActivityRef>) -> ActivityRef {
        Arc::new(Self { children })
    }

    /// Like [`Sequence::new`], failing on a breakpoint name used twice.
    pub fn try_new(children: Vec<ActivityRef>) -> Result<ActivityRef, StructuralError> {
        ensure_unique_breakpoints(&children)?;
        Ok(Self::new(children))
    }
}

#[async_trait]
impl Activity for Sequence {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Native
    }

    fn children(&self) -> &[ActivityRef] {
        &self.children
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        // The n-th invocation starts child n-1.
        let next = ctx.invocation_count().saturating_sub(1) as usize;
        if next < self.children.len() {
            ctx.push_child(next)?;
        } else {
            ctx.pop()?;
        }
        Ok(())
    }
}
