//! Registry roots and variable scopes
//!
//! A workflow is the restorable root of a tree; a context seeds variables
//! for the subtree below it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef};
use crate::vm::context::ExecutionContext;
use crate::vm::value::{Scope, Value};

/// Registered root of a restorable tree.
///
/// Carries the type id the registry knows it by and the options the
/// registered constructor rebuilds the tree from.
#[derive(Debug)]
pub struct Workflow {
    type_id: String,
    options: serde_json::Value,
    children: [ActivityRef; 1],
}

impl Workflow {
    /// Root named `type_id` wrapping `body`
    pub fn new(type_id: impl Into<String>, options: serde_json::Value, body: ActivityRef) -> ActivityRef {
        Arc::new(Self {
            type_id: type_id.into(),
            options,
            children: [body],
        })
    }
}

#[async_trait]
impl Activity for Workflow {
    fn activity_type(&self) -> &str {
        &self.type_id
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Native
    }

    fn children(&self) -> &[ActivityRef] {
        &self.children
    }

    fn options(&self) -> serde_json::Value {
        self.options.clone()
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        if ctx.invocation_count() == 1 {
            ctx.push_child(0)?;
        } else {
            ctx.pop()?;
        }
        Ok(())
    }
}

/// Defines inherited variables, then runs its child with them in scope.
#[derive(Debug)]
pub struct Context {
    initial: serde_json::Map<String, serde_json::Value>,
    children: [ActivityRef; 1],
}

impl Context {
    /// Type id
    pub const TYPE_ID: &'static str = "Context";

    /// Scope `initial` (a JSON object) around `child`
    pub fn new(initial: serde_json::Map<String, serde_json::Value>, child: ActivityRef) -> ActivityRef {
        Arc::new(Self {
            initial,
            children: [child],
        })
    }
}

#[async_trait]
impl Activity for Context {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Native
    }

    fn children(&self) -> &[ActivityRef] {
        &self.children
    }

    fn options(&self) -> serde_json::Value {
        serde_json::Value::Object(self.initial.clone())
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        if ctx.invocation_count() == 1 {
            let mut variables = ctx.variables();
            for (name, value) in &self.initial {
                variables.define(name, Value::from_json(value.clone()), Scope::Inherit)?;
            }
            ctx.push_child(0)?;
        } else {
            ctx.pop()?;
        }
        Ok(())
    }
}
