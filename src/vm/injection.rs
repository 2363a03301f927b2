//! Injection hooks run between ticks
//!
//! A hook is a callback plus an optional condition. Hooks are the sanctioned
//! way to mutate a machine from outside the tree, for example to seed input
//! data or auto-resume a breakpoint. Callback failures are logged and never
//! abort the workflow.

use tokio_util::sync::CancellationToken;

use super::error::VmResult;
use super::machine::Vm;
use super::stack::ExecutionStack;
use super::variables::Variables;

type Callback = Box<dyn FnMut(&mut InjectionContext<'_>) -> anyhow::Result<()> + Send>;
type Condition = Box<dyn Fn(&mut InjectionContext<'_>) -> bool + Send>;

/// View of the machine handed to hooks
pub struct InjectionContext<'a> {
    vm: &'a mut Vm,
    cancel: &'a CancellationToken,
}

impl<'a> InjectionContext<'a> {
    pub(crate) fn new(vm: &'a mut Vm, cancel: &'a CancellationToken) -> Self {
        Self { vm, cancel }
    }

    /// Variables visible from the top frame
    pub fn variables(&mut self) -> Variables<'_> {
        self.vm.variables()
    }

    /// Execution stack
    pub fn stack(&self) -> &ExecutionStack {
        self.vm.stack()
    }

    /// Whether the machine sits at an unresumed breakpoint
    pub fn is_paused(&self) -> bool {
        self.vm.is_paused()
    }

    /// Name of the breakpoint the machine is paused at
    pub fn paused_at(&self) -> Option<String> {
        self.vm.paused_at()
    }

    /// Request resumption of a breakpoint
    pub fn resume(&mut self, name: &str) -> VmResult<()> {
        self.vm.resume(name)
    }

    /// Cancellation signal of the current step
    pub fn cancellation(&self) -> &CancellationToken {
        self.cancel
    }
}

/// One registered hook
pub struct Injection {
    callback: Callback,
    condition: Option<Condition>,
    once: bool,
    calls: u64,
}

impl Injection {
    /// Hook running `callback` once, whenever it first gets the chance
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(&mut InjectionContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            condition: None,
            once: true,
            calls: 0,
        }
    }

    /// Only run while `condition` holds
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&mut InjectionContext<'_>) -> bool + Send + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Keep the hook after it ran
    pub fn repeating(mut self) -> Self {
        self.once = false;
        self
    }

    /// Successful invocations so far
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Whether a one-shot hook already ran
    pub fn is_completed(&self) -> bool {
        self.once && self.calls > 0
    }

    fn check(&self, ctx: &mut InjectionContext<'_>) -> bool {
        self.condition.as_ref().is_none_or(|condition| condition(ctx))
    }
}

impl std::fmt::Debug for Injection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injection")
            .field("conditional", &self.condition.is_some())
            .field("once", &self.once)
            .field("calls", &self.calls)
            .finish()
    }
}

/// Ordered collection of hooks
#[derive(Debug)]
pub struct InjectionRegistry {
    injections: Vec<Injection>,
    compaction_threshold: usize,
}

impl InjectionRegistry {
    /// Empty registry compacting above `compaction_threshold` completed hooks
    pub fn new(compaction_threshold: usize) -> Self {
        Self {
            injections: Vec::new(),
            compaction_threshold,
        }
    }

    /// Register a hook
    pub fn add(&mut self, injection: Injection) {
        self.injections.push(injection);
    }

    /// Registered hooks, completed ones included until compaction
    pub fn len(&self) -> usize {
        self.injections.len()
    }

    /// Whether no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.injections.is_empty()
    }

    /// Hooks that will not run again
    pub fn completed_count(&self) -> usize {
        self.injections.iter().filter(|i| i.is_completed()).count()
    }

    /// Run every eligible hook against `vm`. Returns how many ran.
    pub fn process(&mut self, vm: &mut Vm, cancel: &CancellationToken) -> usize {
        let mut ran = 0;
        let mut ctx = InjectionContext::new(vm, cancel);

        for (index, injection) in self.injections.iter_mut().enumerate() {
            if injection.is_completed() || !injection.check(&mut ctx) {
                continue;
            }
            ran += 1;
            match (injection.callback)(&mut ctx) {
                Ok(()) => injection.calls += 1,
                Err(err) => tracing::error!(injection = index, error = %err, "injection failed"),
            }
        }

        if self.completed_count() > self.compaction_threshold {
            let before = self.injections.len();
            self.injections.retain(|i| !i.is_completed());
            tracing::debug!(
                removed = before - self.injections.len(),
                "injection registry compacted"
            );
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::activities::{Breakpoint, Sequence};
    use crate::vm::value::Scope;

    fn machine() -> Vm {
        Vm::create(Sequence::new(vec![Breakpoint::new("GATE", "")])).unwrap()
    }

    #[test]
    fn test_once_hook_runs_once() {
        let mut vm = machine();
        let cancel = CancellationToken::new();
        let mut registry = InjectionRegistry::new(10);
        registry.add(Injection::new(|ctx| {
            ctx.variables().define("seed", 1, Scope::Inherit)?;
            Ok(())
        }));

        assert_eq!(registry.process(&mut vm, &cancel), 1);
        assert_eq!(registry.process(&mut vm, &cancel), 0);
        assert_eq!(vm.variables().get_int("seed").unwrap(), 1);
    }

    #[test]
    fn test_failed_hook_is_retried_and_does_not_abort() {
        let mut vm = machine();
        let cancel = CancellationToken::new();
        let mut registry = InjectionRegistry::new(10);
        registry.add(Injection::new(|ctx| {
            ctx.variables().get_int("missing")?;
            Ok(())
        }));

        assert_eq!(registry.process(&mut vm, &cancel), 1);
        assert_eq!(registry.completed_count(), 0);
        assert_eq!(registry.process(&mut vm, &cancel), 1);
        assert!(!vm.is_crashed());
    }

    #[test]
    fn test_condition_gates_hook() {
        let mut vm = machine();
        let cancel = CancellationToken::new();
        let mut registry = InjectionRegistry::new(10);
        registry.add(
            Injection::new(|ctx| Ok(ctx.resume("GATE")?)).when(|ctx| ctx.is_paused()),
        );

        assert_eq!(registry.process(&mut vm, &cancel), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_compaction_drops_completed_hooks() {
        let mut vm = machine();
        let cancel = CancellationToken::new();
        let mut registry = InjectionRegistry::new(2);
        for _ in 0..3 {
            registry.add(Injection::new(|_| Ok(())));
        }
        registry.add(Injection::new(|_| Ok(())).repeating());

        assert_eq!(registry.process(&mut vm, &cancel), 4);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.process(&mut vm, &cancel), 1);
    }
}
