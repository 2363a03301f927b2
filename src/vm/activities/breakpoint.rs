//! Named pause points
//!
//! A breakpoint halts the machine until the host resumes it, optionally
//! guarding a child that runs once afterwards.

use async_trait::async_trait;
use std::sync::Arc;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef, BreakpointInfo};
use crate::vm::context::ExecutionContext;
use crate::vm::machine::resumed_marker;
use crate::vm::value::Scope;

/// Named suspension point with an optional child.
///
/// Until resumed the breakpoint does nothing and the machine reports itself
/// paused. Once resumed it runs its child once, then pops.
#[derive(Debug)]
pub struct Breakpoint {
    info: BreakpointInfo,
    children: Vec<ActivityRef>,
}

impl Breakpoint {
    /// Type id
    pub const TYPE_ID: &'static str = "Breakpoint";

    /// Breakpoint without a child
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> ActivityRef {
        Arc::new(Self::build(name.into(), description.into(), None))
    }

    /// Breakpoint wrapping `child`, which runs after the resume
    pub fn wrap(name: impl Into<String>, description: impl Into<String>, child: ActivityRef) -> ActivityRef {
        Arc::new(Self::build(name.into(), description.into(), Some(child)))
    }

    fn build(name: String, description: String, child: Option<ActivityRef>) -> Self {
        Self {
            info: BreakpointInfo { name, description },
            children: child.into_iter().collect(),
        }
    }

    /// Breakpoint name
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

fn child_marker(oid: &str) -> String {
    format!("{oid}:child")
}

#[async_trait]
impl Activity for Breakpoint {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Breakpoint
    }

    fn children(&self) -> &[ActivityRef] {
        &self.children
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.info.name,
            "description": self.info.description,
        })
    }

    fn breakpoint(&self) -> Option<&BreakpointInfo> {
        Some(&self.info)
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let oid = ctx.oid();
        if !ctx.frame_flag(&resumed_marker(&oid)) {
            return Ok(());
        }

        let marker = child_marker(&oid);
        if self.children.is_empty() || ctx.frame_flag(&marker) {
            ctx.pop()?;
        } else {
            ctx.variables().define(&marker, true, Scope::Inherit)?;
            ctx.push_child(0)?;
        }
        Ok(())
    }
}
