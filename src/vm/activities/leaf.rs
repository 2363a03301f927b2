//! Leaf activities: host code, logging, assignment and in-task sleeps

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef};
use crate::vm::context::ExecutionContext;
use crate::vm::error::VmError;
use crate::vm::value::{Scope, Value};

/// Body of a [`Code`] activity
pub type CodeFn = Arc<dyn Fn(&mut ExecutionContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Leaf running a closure
pub struct Code {
    label: String,
    body: CodeFn,
}

impl Code {
    /// Type id
    pub const TYPE_ID: &'static str = "Code";

    /// Leaf running `body`; `label` only shows up in logs.
    pub fn new<F>(label: impl Into<String>, body: F) -> ActivityRef
    where
        F: Fn(&mut ExecutionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            label: label.into(),
            body: Arc::new(body),
        })
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Code").field("label", &self.label).finish()
    }
}

#[async_trait]
impl Activity for Code {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Business
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({ "label": self.label })
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        (self.body)(ctx)
    }
}

/// Leaf writing a tracing event
#[derive(Debug)]
pub struct Log {
    text: String,
}

impl Log {
    /// Type id
    pub const TYPE_ID: &'static str = "Log";

    /// Log `text` at info level
    pub fn new(text: impl Into<String>) -> ActivityRef {
        Arc::new(Self { text: text.into() })
    }
}

#[async_trait]
impl Activity for Log {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Business
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({ "text": self.text })
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        tracing::info!(target: "wfvm::activity", oid = %ctx.oid(), "{}", self.text);
        Ok(())
    }
}

/// Leaf assigning a constant.
///
/// Sets the variable when a binding is visible; otherwise defines it in the
/// enclosing frame with the configured scope.
#[derive(Debug)]
pub struct Assign {
    name: String,
    value: Value,
    scope: Scope,
}

impl Assign {
    /// Type id
    pub const TYPE_ID: &'static str = "Assign";

    /// Assign, defining an inherited binding if needed
    pub fn inherit(name: impl Into<String>, value: impl Into<Value>) -> ActivityRef {
        Self::with_scope(name, value, Scope::Inherit)
    }

    /// Assign with an explicit scope for a new binding
    pub fn with_scope(name: impl Into<String>, value: impl Into<Value>, scope: Scope) -> ActivityRef {
        Arc::new(Self {
            name: name.into(),
            value: value.into(),
            scope,
        })
    }
}

#[async_trait]
impl Activity for Assign {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Business
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "value": self.value.to_json(),
            "scope": self.scope,
        })
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        if ctx.variables().has(&self.name) {
            ctx.variables().set(&self.name, self.value.clone())?;
        } else {
            ctx.define_in_parent(&self.name, self.value.clone(), self.scope)?;
        }
        Ok(())
    }
}

/// Leaf waiting inside the tick, aborted by cancellation.
///
/// Unlike [`Delay`](super::Delay) the tick itself stays outstanding for the
/// whole period.
#[derive(Debug)]
pub struct Sleep {
    period: Duration,
}

impl Sleep {
    /// Type id
    pub const TYPE_ID: &'static str = "Sleep";

    /// Sleep for `period`
    pub fn new(period: Duration) -> ActivityRef {
        Arc::new(Self { period })
    }
}

#[async_trait]
impl Activity for Sleep {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Business
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({ "durationMs": self.period.as_millis() as u64 })
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let cancel = ctx.cancellation().clone();
        tokio::select! {
            _ = tokio::time::sleep(self.period) => Ok(()),
            _ = cancel.cancelled() => Err(VmError::Cancelled.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;
    use crate::vm::activities::Sequence;
    use crate::vm::error::StateError;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_assign_defines_then_sets() {
        let root = Sequence::new(vec![
            Assign::inherit("age", 40),
            Assign::inherit("age", 41),
            Code::new("check", |ctx| {
                anyhow::ensure!(ctx.variables().get_int("age")? == 41);
                Ok(())
            }),
        ]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();
        while !vm.tick(&cancel).await.unwrap() {}
        assert!(vm.is_terminated());
        assert!(!vm.is_crashed());
    }

    #[tokio::test]
    async fn test_leaf_cannot_push() {
        let root = Sequence::new(vec![Code::new("bad", |ctx| Ok(ctx.push_child(0)?))]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();
        vm.tick(&cancel).await.unwrap();
        let err = vm.tick(&cancel).await.unwrap_err();
        assert!(matches!(err, VmError::State(StateError::NotComposite(_))));
    }

    #[tokio::test]
    async fn test_sleep_honours_cancellation() {
        let root = Sequence::new(vec![Sleep::new(Duration::from_secs(60))]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();
        vm.tick(&cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert!(matches!(vm.tick(&cancel).await, Err(VmError::Cancelled)));
        assert!(!vm.is_crashed());
    }
}
