//! Two-way conditional

use async_trait::async_trait;
use std::sync::Arc;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef, ensure_unique_breakpoints};
use crate::vm::context::ExecutionContext;
use crate::vm::control::CONDITION;
use crate::vm::error::{StructuralError, VmResult};

/// Conditional: children are `[condition, then, else?]`.
///
/// The condition subtree reports its outcome with [`If::mark_true`] or
/// [`If::mark_false`]. An unmarked condition counts as false. The outcome
/// lives on the control channel, so it does not survive a restore taken
/// between the condition and the branch decision.
#[derive(Debug)]
pub struct If {
    children: Vec<ActivityRef>,
}

impl If {
    /// Type id
    pub const TYPE_ID: &'static str = "If";

    /// Branch with an optional else arm
    pub fn new(condition: ActivityRef, then: ActivityRef, otherwise: Option<ActivityRef>) -> ActivityRef {
        let mut children = vec![condition, then];
        children.extend(otherwise);
        Arc::new(Self { children })
    }

    /// Like [`If::new`], failing when the arms reuse a breakpoint name.
    pub fn try_new(
        condition: ActivityRef,
        then: ActivityRef,
        otherwise: Option<ActivityRef>,
    ) -> Result<ActivityRef, StructuralError> {
        let mut children = vec![condition, then];
        children.extend(otherwise);
        ensure_unique_breakpoints(&children)?;
        Ok(Arc::new(Self { children }))
    }

    /// Mark the nearest enclosing `If` condition as true.
    pub fn mark_true(ctx: &mut ExecutionContext<'_>) -> VmResult<()> {
        Self::mark(ctx, true)
    }

    /// Mark the nearest enclosing `If` condition as false.
    pub fn mark_false(ctx: &mut ExecutionContext<'_>) -> VmResult<()> {
        Self::mark(ctx, false)
    }

    fn mark(ctx: &mut ExecutionContext<'_>, value: bool) -> VmResult<()> {
        let oid = ctx.ancestor_oid(Self::TYPE_ID)?;
        ctx.control().set(&oid, CONDITION, value);
        Ok(())
    }
}

#[async_trait]
impl Activity for If {
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
        match ctx.invocation_count() {
            1 => {
                ctx.control().take(&oid, CONDITION);
                ctx.push_child(0)?;
            }
            2 => {
                let outcome = ctx.control().take(&oid, CONDITION).unwrap_or(false);
                tracing::debug!(oid = %oid, outcome, "condition evaluated");
                if outcome {
                    ctx.push_child(1)?;
                } else if self.children.len() > 2 {
                    ctx.push_child(2)?;
                } else {
                    ctx.pop()?;
                }
            }
            _ => ctx.pop()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;
    use crate::vm::activities::Code;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    fn branch(taken: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> ActivityRef {
        let taken = taken.clone();
        Code::new(label, move |_| {
            taken.lock().push(label);
            Ok(())
        })
    }

    async fn run(root: ActivityRef) -> u32 {
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();
        let mut steps = 0;
        while !vm.tick(&cancel).await.unwrap() {
            steps += 1;
        }
        steps
    }

    #[tokio::test]
    async fn test_true_runs_only_then_branch() {
        let taken = Arc::new(Mutex::new(Vec::new()));
        let root = If::new(
            Code::new("cond", |ctx| Ok(If::mark_true(ctx)?)),
            branch(&taken, "then"),
            Some(branch(&taken, "else")),
        );
        run(root).await;
        assert_eq!(*taken.lock(), vec!["then"]);
    }

    #[tokio::test]
    async fn test_false_without_else_pops() {
        let taken = Arc::new(Mutex::new(Vec::new()));
        let root = If::new(
            Code::new("cond", |ctx| Ok(If::mark_false(ctx)?)),
            branch(&taken, "then"),
            None,
        );
        // push condition, run it, pop
        assert_eq!(run(root).await, 3);
        assert!(taken.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unmarked_condition_takes_else() {
        let taken = Arc::new(Mutex::new(Vec::new()));
        let root = If::new(
            Code::new("cond", |_| Ok(())),
            branch(&taken, "then"),
            Some(branch(&taken, "else")),
        );
        run(root).await;
        assert_eq!(*taken.lock(), vec!["else"]);
    }

    #[tokio::test]
    async fn test_mark_outside_if_is_structural() {
        let root = Code::new("stray", |ctx| Ok(If::mark_true(ctx)?));
        let mut vm = Vm::create(root).unwrap();
        let err = vm.tick(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, crate::vm::VmError::Structural(_)));
    }

    #[test]
    fn test_try_new_rejects_arms_sharing_breakpoint() {
        use crate::vm::activities::Breakpoint;

        let err = If::try_new(
            Code::new("cond", |_| Ok(())),
            Breakpoint::new("APPROVE", ""),
            Some(Breakpoint::new("APPROVE", "else arm")),
        )
        .unwrap_err();
        assert_eq!(err, StructuralError::DuplicateBreakpoint("APPROVE".into()));

        let ok = If::try_new(Code::new("cond", |_| Ok(())), Breakpoint::new("APPROVE", ""), None);
        assert_eq!(ok.unwrap().children().len(), 2);
    }
}
