//! Unbounded and conditional loops

use async_trait::async_trait;
use std::sync::Arc;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef, ensure_unique_breakpoints};
use crate::vm::context::ExecutionContext;
use crate::vm::control::{BREAK, CONDITION};
use crate::vm::error::{StructuralError, VmResult};

/// Repeats its body until the body calls [`Loop::break_loop`].
#[derive(Debug)]
pub struct Loop {
    children: [ActivityRef; 1],
}

impl Loop {
    /// Type id
    pub const TYPE_ID: &'static str = "Loop";

    /// Loop over `body`
    pub fn new(body: ActivityRef) -> ActivityRef {
        Arc::new(Self { children: [body] })
    }

    /// Stop the nearest enclosing loop once the current iteration completes.
    pub fn break_loop(ctx: &mut ExecutionContext<'_>) -> VmResult<()> {
        let oid = ctx.ancestor_oid(Self::TYPE_ID)?;
        ctx.control().set(&oid, BREAK, true);
        Ok(())
    }
}

#[async_trait]
impl Activity for Loop {
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
        let oid = ctx.oid();
        if ctx.control().take(&oid, BREAK).unwrap_or(false) {
            tracing::debug!(oid = %oid, iterations = ctx.invocation_count() - 1, "loop break");
            ctx.pop()?;
        } else {
            ctx.push_child(0)?;
        }
        Ok(())
    }
}

/// Pre-tested loop: children are `[condition, body]`.
///
/// Odd invocations run the condition, even invocations read its outcome
/// (set with [`While::mark`]) and run the body or pop. The phase follows
/// the persisted invocation counter.
#[derive(Debug)]
pub struct While {
    children: [ActivityRef; 2],
}

impl While {
    /// Type id
    pub const TYPE_ID: &'static str = "While";

    /// Loop over `body` while `condition` marks true
    pub fn new(condition: ActivityRef, body: ActivityRef) -> ActivityRef {
        Arc::new(Self {
            children: [condition, body],
        })
    }

    /// Like [`While::new`], failing when condition and body share a breakpoint name.
    pub fn try_new(condition: ActivityRef, body: ActivityRef) -> Result<ActivityRef, StructuralError> {
        let children = [condition, body];
        ensure_unique_breakpoints(&children)?;
        Ok(Arc::new(Self { children }))
    }

    /// Report the condition outcome to the nearest enclosing `While`.
    pub fn mark(ctx: &mut ExecutionContext<'_>, value: bool) -> VmResult<()> {
        let oid = ctx.ancestor_oid(Self::TYPE_ID)?;
        ctx.control().set(&oid, CONDITION, value);
        Ok(())
    }
}

#[async_trait]
impl Activity for While {
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
        let oid = ctx.oid();
        if ctx.invocation_count() % 2 == 1 {
            ctx.control().take(&oid, CONDITION);
            ctx.push_child(0)?;
        } else if ctx.control().take(&oid, CONDITION).unwrap_or(false) {
            ctx.push_child(1)?;
        } else {
            ctx.pop()?;
        }
        Ok(())
    }
}
