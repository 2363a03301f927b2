//! Tick scheduler
//!
//! The machine advances the execution stack one step per `tick`: one
//! business execution, or one composite push/pop decision. Pushing only
//! appends a frame; the new frame runs on the following tick, so long
//! sequences never deepen the call stack of the host.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::VmConfig;
use super::activity::{ActivityKind, ActivityRef, BreakpointInfo, collect_breakpoints};
use super::breakpoint::BreakpointControl;
use super::clock::{Clock, SystemClock};
use super::context::{ExecutionContext, Outcome, StackRequest};
use super::control::ControlChannel;
use super::error::{StateError, VmError, VmResult};
use super::stack::ExecutionStack;
use super::value::{Scope, Value, Variable};
use super::variables::Variables;

/// Frame variable marking a breakpoint as resumed
pub(crate) fn resumed_marker(oid: &str) -> String {
    format!("{oid}:resumed")
}

/// Marks a tick as outstanding until dropped, so a tick future abandoned
/// midway does not leave the machine locked.
struct TickGuard(Arc<AtomicBool>);

impl TickGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The workflow virtual machine
pub struct Vm {
    root: ActivityRef,
    stack: ExecutionStack,
    control: ControlChannel,
    breakpoints: BreakpointControl,
    config: VmConfig,
    clock: Arc<dyn Clock>,
    pending_wake: Option<DateTime<Utc>>,
    paused: bool,
    terminated: bool,
    in_tick: Arc<AtomicBool>,
    crashed: Option<VmError>,
    ticks: u64,
}

impl Vm {
    /// Create a machine whose stack holds only the root activity.
    pub fn create(root: ActivityRef) -> VmResult<Self> {
        Self::with_config(root, VmConfig::default())
    }

    /// Create a machine with an explicit configuration.
    pub fn with_config(root: ActivityRef, config: VmConfig) -> VmResult<Self> {
        let stack = ExecutionStack::with_root(root.clone());
        Self::from_parts(root, stack, None, config)
    }

    pub(crate) fn from_parts(
        root: ActivityRef,
        stack: ExecutionStack,
        pending_wake: Option<DateTime<Utc>>,
        config: VmConfig,
    ) -> VmResult<Self> {
        let breakpoints = BreakpointControl::new(collect_breakpoints(&root)?);
        let terminated = stack.is_empty();
        Ok(Self {
            root,
            stack,
            control: ControlChannel::new(),
            breakpoints,
            config,
            clock: Arc::new(SystemClock),
            pending_wake,
            paused: false,
            terminated,
            in_tick: Arc::new(AtomicBool::new(false)),
            crashed: None,
            ticks: 0,
        })
    }

    /// Replace the clock used for countdowns.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Root activity (kept after termination)
    pub fn root(&self) -> &ActivityRef {
        &self.root
    }

    /// Configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Execution stack
    pub fn stack(&self) -> &ExecutionStack {
        &self.stack
    }

    /// Whether the stack is empty
    pub fn is_terminated(&self) -> bool {
        self.stack.is_empty()
    }

    /// Whether the machine sits at an unresumed breakpoint
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether a failure made the machine non-resumable
    pub fn is_crashed(&self) -> bool {
        self.crashed.is_some()
    }

    /// The error that crashed the machine
    pub fn crash_error(&self) -> Option<&VmError> {
        self.crashed.as_ref()
    }

    /// Number of ticks that touched the stack
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Armed wake time, if any
    pub fn pending_wake(&self) -> Option<DateTime<Utc>> {
        self.pending_wake
    }

    /// Time left until the armed wake time; zero when nothing is armed.
    pub fn tick_countdown(&self) -> Duration {
        self.pending_wake
            .and_then(|wake| (wake - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Name of the breakpoint the machine is paused at
    pub fn paused_at(&self) -> Option<String> {
        if !self.paused {
            return None;
        }
        self.stack
            .top()
            .and_then(|frame| frame.activity().breakpoint())
            .map(|info| info.name.clone())
    }

    /// Variables visible from the top frame.
    ///
    /// Between ticks this is how a host seeds input data, typically while
    /// paused at a setup breakpoint.
    pub fn variables(&mut self) -> Variables<'_> {
        Variables::new(&mut self.stack)
    }

    /// Shared breakpoint handle, usable while the machine is ticking
    pub fn breakpoints(&self) -> BreakpointControl {
        self.breakpoints.clone()
    }

    /// Request resumption of a breakpoint.
    pub fn resume(&mut self, name: &str) -> VmResult<()> {
        self.breakpoints.resume(name)?;
        self.absorb_resumes()
    }

    /// Wait until the named breakpoint is reached.
    pub fn wait(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, VmResult<BreakpointInfo>> {
        self.breakpoints.wait(name, cancel)
    }

    /// Advance the machine by one step.
    ///
    /// Returns `true` when the machine is idle: terminated, paused at a
    /// breakpoint, or waiting for an armed wake time.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> VmResult<bool> {
        if let Some(err) = &self.crashed {
            return Err(StateError::Crashed(err.to_string()).into());
        }
        let Some(_guard) = TickGuard::acquire(&self.in_tick) else {
            return Err(StateError::ReentrantTick.into());
        };

        // Dropping this future mid-step behaves like a cancellation: the
        // top frame stays on the stack and the next tick invokes it again.
        let result = self.step(cancel).await;

        if let Err(err) = &result {
            if err.is_fatal() {
                self.crash(err);
            }
        }
        result
    }

    async fn step(&mut self, cancel: &CancellationToken) -> VmResult<bool> {
        self.absorb_resumes()?;

        if self.stack.is_empty() {
            if !self.terminated {
                self.terminated = true;
                tracing::info!(ticks = self.ticks, "workflow terminated");
            }
            self.paused = false;
            return Ok(true);
        }

        if let Some(wake) = self.pending_wake {
            if self.clock.now() < wake {
                return Ok(true);
            }
            self.pending_wake = None;
        }

        self.ticks += 1;
        let depth = self.stack.depth() - 1;
        let oid = self.stack.top_oid().unwrap_or_default();
        let (activity, calls) = match self.stack.top_mut() {
            Some(frame) => {
                let calls = frame.increment();
                (frame.activity().clone(), calls)
            }
            None => return Err(StateError::EmptyStack.into()),
        };

        tracing::debug!(
            depth,
            oid = %oid,
            activity = activity.activity_type(),
            calls,
            "tick"
        );

        match activity.kind() {
            ActivityKind::Business => {
                self.invoke(&activity, cancel).await?;
                self.pop_top()?;
                Ok(false)
            }
            ActivityKind::Breakpoint => {
                let name = activity
                    .breakpoint()
                    .map(|info| info.name.clone())
                    .unwrap_or_else(|| activity.activity_type().to_string());

                if self.breakpoints.arrive(&name) {
                    tracing::info!(breakpoint = %name, oid = %oid, "breakpoint reached");
                }

                let resumed = self
                    .stack
                    .top()
                    .and_then(|frame| frame.binding(&resumed_marker(&oid)))
                    .is_some_and(|v| v.value == Value::Bool(true));

                let outcome = self.invoke(&activity, cancel).await?;

                if !resumed {
                    if outcome.request.is_some() {
                        return Err(StateError::BreakpointNotResumed(name).into());
                    }
                    self.paused = true;
                    let recheck = Duration::from_millis(self.config.breakpoint_recheck_ms);
                    if !recheck.is_zero() {
                        self.arm_wake(recheck);
                    }
                    return Ok(true);
                }

                self.paused = false;
                self.breakpoints.mark_resumed(&name);
                self.apply(outcome)
            }
            ActivityKind::Native => {
                let outcome = self.invoke(&activity, cancel).await?;
                self.apply(outcome)
            }
        }
    }

    async fn invoke(
        &mut self,
        activity: &ActivityRef,
        cancel: &CancellationToken,
    ) -> VmResult<Outcome> {
        let mut ctx = ExecutionContext::new(
            &mut self.stack,
            &mut self.control,
            &self.breakpoints,
            cancel,
            self.clock.as_ref(),
        )?;
        activity
            .execute(&mut ctx)
            .await
            .map_err(VmError::from_activity)?;
        Ok(ctx.finish())
    }

    fn apply(&mut self, outcome: Outcome) -> VmResult<bool> {
        if let Some(period) = outcome.delay {
            self.arm_wake(period);
            return Ok(true);
        }
        match outcome.request {
            Some(StackRequest::Push(index)) => self.stack.push(index)?,
            Some(StackRequest::Pop) => self.pop_top()?,
            None => {}
        }
        Ok(false)
    }

    fn arm_wake(&mut self, period: Duration) {
        let period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::MAX);
        self.pending_wake = self.clock.now().checked_add_signed(period);
    }

    fn pop_top(&mut self) -> VmResult<()> {
        let oid = self.stack.top_oid();
        let frame = self.stack.pop()?;
        if let Some(oid) = oid {
            self.control.clear_scope(&oid);
        }
        if let Some(info) = frame.activity().breakpoint() {
            self.breakpoints.leave(&info.name);
        }
        Ok(())
    }

    /// Apply resume requests made through a [`BreakpointControl`] handle
    /// without ticking, so the countdown reflects them.
    pub fn absorb_pending_resumes(&mut self) -> VmResult<()> {
        if self.crashed.is_some() {
            return Ok(());
        }
        self.absorb_resumes()
    }

    /// Move pending resume requests onto breakpoint frames currently on the
    /// stack, where they become part of the persisted state.
    fn absorb_resumes(&mut self) -> VmResult<()> {
        let top = self.stack.depth().checked_sub(1);
        for name in self.breakpoints.pending_resumes() {
            let Some(depth) = self.stack.breakpoint_depth(&name) else {
                continue;
            };
            let Some(oid) = self.stack.oid_at(depth) else {
                continue;
            };
            self.breakpoints.drop_resume(&name);

            let marker = resumed_marker(&oid);
            let Some(frame) = self.stack.frame_mut(depth) else {
                continue;
            };
            match frame.binding_mut(&marker) {
                Some(variable) if variable.value == Value::Bool(true) => {
                    tracing::debug!(breakpoint = %name, "breakpoint already resumed");
                    continue;
                }
                Some(variable) => variable.value = Value::Bool(true),
                None => frame.bind(Variable::new(marker, Scope::Local, Value::Bool(true)))?,
            }

            self.breakpoints.mark_resumed(&name);
            if Some(depth) == top {
                self.pending_wake = None;
            }
            tracing::info!(breakpoint = %name, oid = %oid, "breakpoint resumed");
        }
        Ok(())
    }

    /// Rebuild breakpoint reach state from restored frames.
    ///
    /// A breakpoint frame that already ran counts as reached, so the restored
    /// machine does not notify waiters again for the same reach. An unresumed
    /// one on top of the stack leaves the machine paused.
    pub(crate) fn resync_breakpoints(&mut self) {
        let top = self.stack.depth().checked_sub(1);
        for (depth, frame) in self.stack.frames().iter().enumerate() {
            let Some(info) = frame.activity().breakpoint() else {
                continue;
            };
            if frame.invocation_count() == 0 {
                continue;
            }
            let resumed = self
                .stack
                .oid_at(depth)
                .and_then(|oid| frame.binding(&resumed_marker(&oid)).cloned())
                .is_some_and(|v| v.value == Value::Bool(true));

            self.breakpoints.arrive(&info.name);
            if resumed {
                self.breakpoints.mark_resumed(&info.name);
            } else if Some(depth) == top {
                self.paused = true;
            }
        }
    }

    fn crash(&mut self, error: &VmError) {
        tracing::error!(error = %error, "workflow machine crashed");
        self.crashed = Some(error.clone());
        self.paused = false;
        self.breakpoints.crash(error);
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("root", &self.root.activity_type())
            .field("depth", &self.stack.depth())
            .field("paused", &self.paused)
            .field("pending_wake", &self.pending_wake)
            .field("crashed", &self.crashed.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::activities::{Breakpoint, Code, Delay, Sequence, Sleep};
    use crate::vm::clock::ManualClock;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> ActivityRef {
        let log = log.clone();
        let label = label.to_string();
        Code::new("record", move |_ctx| {
            log.lock().push(label.clone());
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_sequence_runs_children_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = Sequence::new(vec![
            recorder(&log, "a"),
            recorder(&log, "b"),
            recorder(&log, "c"),
        ]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();

        let mut ticks = 0;
        while !vm.tick(&cancel).await.unwrap() {
            ticks += 1;
        }

        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        // push + run per child, then the final pop
        assert_eq!(ticks, 7);
        assert!(vm.is_terminated());
    }

    #[tokio::test]
    async fn test_breakpoint_without_child() {
        let root = Breakpoint::new("GATE", "");
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();
        let waiter = vm.wait("GATE", &cancel);

        assert!(vm.tick(&cancel).await.unwrap());
        assert!(vm.is_paused());
        assert_eq!(vm.paused_at().as_deref(), Some("GATE"));
        assert_eq!(waiter.await.unwrap().name, "GATE");

        vm.resume("GATE").unwrap();
        assert!(!vm.tick(&cancel).await.unwrap());
        assert!(!vm.is_paused());
        assert!(vm.is_terminated());
    }

    #[tokio::test]
    async fn test_paused_tick_does_not_touch_stack() {
        let clock = ManualClock::default();
        let root = Breakpoint::new("GATE", "");
        let mut vm = Vm::create(root)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let cancel = CancellationToken::new();

        assert!(vm.tick(&cancel).await.unwrap());
        let calls = vm.stack().top().unwrap().invocation_count();
        assert!(vm.tick(&cancel).await.unwrap());
        assert_eq!(vm.stack().top().unwrap().invocation_count(), calls);

        clock.advance(chrono::Duration::seconds(2));
        assert!(vm.tick(&cancel).await.unwrap());
        assert_eq!(vm.stack().top().unwrap().invocation_count(), calls + 1);
    }

    #[tokio::test]
    async fn test_delay_is_not_a_pause() {
        let clock = ManualClock::default();
        let root = Delay::new(Duration::from_millis(500));
        let mut vm = Vm::create(root)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let cancel = CancellationToken::new();

        assert!(vm.tick(&cancel).await.unwrap());
        assert!(!vm.is_paused());
        assert!(vm.tick_countdown() > Duration::ZERO);
        assert!(vm.tick(&cancel).await.unwrap());
        assert_eq!(vm.tick_count(), 1);

        clock.advance(chrono::Duration::milliseconds(500));
        assert_eq!(vm.tick_countdown(), Duration::ZERO);
        assert!(!vm.tick(&cancel).await.unwrap());
        assert!(vm.is_terminated());
    }

    #[tokio::test]
    async fn test_business_error_crashes_machine() {
        let root = Sequence::new(vec![
            Code::new("crash", |_ctx| Err(anyhow::anyhow!("Crash"))),
            Breakpoint::new("AFTER", ""),
        ]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();
        let waiter = vm.wait("AFTER", &cancel);

        assert!(!vm.tick(&cancel).await.unwrap());
        let err = vm.tick(&cancel).await.unwrap_err();
        assert!(matches!(err, VmError::Business(_)));
        assert!(vm.is_crashed());
        assert!(matches!(waiter.await, Err(VmError::Business(_))));
        assert!(matches!(
            vm.tick(&cancel).await,
            Err(VmError::State(StateError::Crashed(_)))
        ));
        assert!(vm.resume("AFTER").is_err());
    }

    #[tokio::test]
    async fn test_cancelled_activity_keeps_frame() {
        let root = Sequence::new(vec![Code::new("cancel-aware", |ctx| {
            ctx.throw_if_cancelled()?;
            Ok(())
        })]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();

        assert!(!vm.tick(&cancel).await.unwrap());
        cancel.cancel();
        assert!(matches!(vm.tick(&cancel).await, Err(VmError::Cancelled)));
        assert!(!vm.is_crashed());
        assert_eq!(vm.stack().depth(), 2);

        let fresh = CancellationToken::new();
        assert!(!vm.tick(&fresh).await.unwrap());
        assert_eq!(vm.stack().depth(), 1);
    }

    #[tokio::test]
    async fn test_reentrant_tick_rejected() {
        let root = Sequence::new(vec![]);
        let mut vm = Vm::create(root).unwrap();
        let held = TickGuard::acquire(&vm.in_tick).unwrap();
        let err = vm.tick(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, VmError::State(StateError::ReentrantTick)));

        drop(held);
        assert!(vm.tick(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_tick_releases_machine() {
        let root = Sequence::new(vec![
            Sleep::new(Duration::from_secs(60)),
            Breakpoint::new("AFTER", ""),
        ]);
        let mut vm = Vm::create(root).unwrap();
        let cancel = CancellationToken::new();

        assert!(!vm.tick(&cancel).await.unwrap());
        let abandoned = tokio::time::timeout(Duration::from_millis(20), vm.tick(&cancel)).await;
        assert!(abandoned.is_err());

        // the sleeping leaf is still on top and runs again
        assert_eq!(vm.stack().depth(), 2);
        cancel.cancel();
        assert!(matches!(vm.tick(&cancel).await, Err(VmError::Cancelled)));
        assert!(!vm.is_crashed());
        assert_eq!(vm.stack().top().unwrap().activity().activity_type(), "Sleep");
    }
}
