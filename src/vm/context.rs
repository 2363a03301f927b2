//! Execution context handed to an activity during one invocation
//!
//! Stack requests made through the context are recorded and applied by the
//! scheduler once the activity body returns, so a push never re-enters the
//! scheduler and variable access during the body always targets the frame
//! being executed.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::activity::{ActivityKind, ActivityRef};
use super::breakpoint::BreakpointControl;
use super::clock::Clock;
use super::control::ControlChannel;
use super::error::{StateError, StructuralError, VmError, VmResult};
use super::stack::{ExecutionStack, StackFrame};
use super::value::{Scope, Value, Variable};
use super::variables::Variables;

/// Stack change requested by a composite activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StackRequest {
    Push(usize),
    Pop,
}

/// What the scheduler has to apply after the body returned
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) request: Option<StackRequest>,
    pub(crate) delay: Option<Duration>,
}

/// Per-invocation view of the machine
pub struct ExecutionContext<'a> {
    stack: &'a mut ExecutionStack,
    control: &'a mut ControlChannel,
    breakpoints: &'a BreakpointControl,
    cancel: &'a CancellationToken,
    clock: &'a dyn Clock,
    kind: ActivityKind,
    activity_type: String,
    outcome: Outcome,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        stack: &'a mut ExecutionStack,
        control: &'a mut ControlChannel,
        breakpoints: &'a BreakpointControl,
        cancel: &'a CancellationToken,
        clock: &'a dyn Clock,
    ) -> VmResult<Self> {
        let activity = stack.top().ok_or(StateError::EmptyStack)?.activity().clone();
        Ok(Self {
            stack,
            control,
            breakpoints,
            cancel,
            clock,
            kind: activity.kind(),
            activity_type: activity.activity_type().to_string(),
            outcome: Outcome::default(),
        })
    }

    pub(crate) fn finish(self) -> Outcome {
        self.outcome
    }

    /// Variables visible from the executing frame
    pub fn variables(&mut self) -> Variables<'_> {
        Variables::new(&mut *self.stack)
    }

    /// Frames, root first; the executing frame is the last one
    pub fn frames(&self) -> &[StackFrame] {
        self.stack.frames()
    }

    /// Invocation count of the executing frame, starting at 1
    pub fn invocation_count(&self) -> u64 {
        self.stack.top().map(StackFrame::invocation_count).unwrap_or(0)
    }

    /// Oid of the executing frame
    pub fn oid(&self) -> String {
        self.stack.top_oid().unwrap_or_default()
    }

    /// Oid of an activity on the current stack path
    pub fn oid_of(&self, activity: &ActivityRef) -> VmResult<String> {
        self.stack.oid_of(activity)
    }

    /// Oid of the nearest ancestor (excluding the executing frame) with the
    /// given activity type.
    pub fn ancestor_oid(&self, activity_type: &str) -> VmResult<String> {
        self.stack
            .nearest_ancestor(|activity| activity.activity_type() == activity_type)
            .and_then(|depth| self.stack.oid_at(depth))
            .ok_or_else(|| StructuralError::NotOnStack(activity_type.to_string()).into())
    }

    /// Runtime-only control flags of this machine
    pub fn control(&mut self) -> &mut ControlChannel {
        &mut *self.control
    }

    /// Breakpoints of this machine
    pub fn breakpoints(&self) -> &BreakpointControl {
        self.breakpoints
    }

    /// Cancellation signal of the current tick
    pub fn cancellation(&self) -> &CancellationToken {
        self.cancel
    }

    /// Fail with [`VmError::Cancelled`] when cancellation was requested.
    pub fn throw_if_cancelled(&self) -> VmResult<()> {
        if self.cancel.is_cancelled() {
            return Err(VmError::Cancelled);
        }
        Ok(())
    }

    /// Current time of the machine clock
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Read a boolean flag stored directly in the executing frame.
    pub fn frame_flag(&self, name: &str) -> bool {
        self.stack
            .top()
            .and_then(|frame| frame.binding(name))
            .is_some_and(|variable| variable.value == Value::Bool(true))
    }

    /// Bind a variable in the frame below the executing one.
    ///
    /// Leaves are popped right after they run, so this is how a leaf hands
    /// a new binding to its siblings.
    pub fn define_in_parent(&mut self, name: &str, value: impl Into<Value>, scope: Scope) -> VmResult<()> {
        let parent = self
            .stack
            .depth()
            .checked_sub(2)
            .ok_or(StateError::StackUnderflow)?;
        let frame = self.stack.frame_mut(parent).ok_or(StateError::StackUnderflow)?;
        frame.bind(Variable::new(name, scope, value.into()))
    }

    fn ensure_composite(&self) -> VmResult<()> {
        if !self.kind.is_composite() {
            return Err(StateError::NotComposite(self.activity_type.clone()).into());
        }
        Ok(())
    }

    fn request(&mut self, request: StackRequest) -> VmResult<()> {
        self.ensure_composite()?;
        if self.outcome.request.is_some() || self.outcome.delay.is_some() {
            return Err(StateError::StackOpAlreadyRequested(self.activity_type.clone()).into());
        }
        self.outcome.request = Some(request);
        Ok(())
    }

    /// Push child `index` of the executing activity for the next tick.
    pub fn push_child(&mut self, index: usize) -> VmResult<()> {
        self.ensure_composite()?;
        let children = self
            .stack
            .top()
            .map(|frame| frame.activity().children().len())
            .unwrap_or(0);
        if index >= children {
            return Err(StructuralError::ChildOutOfRange {
                activity: self.activity_type.clone(),
                index,
            }
            .into());
        }
        self.request(StackRequest::Push(index))
    }

    /// Remove the executing activity from the stack.
    pub fn pop(&mut self) -> VmResult<()> {
        self.request(StackRequest::Pop)
    }

    /// Stay on the stack and re-run after `period`.
    pub fn delay(&mut self, period: Duration) -> VmResult<()> {
        self.ensure_composite()?;
        if period < Duration::from_millis(1) {
            return Err(StateError::InvalidDelay.into());
        }
        if self.outcome.request.is_some() || self.outcome.delay.is_some() {
            return Err(StateError::StackOpAlreadyRequested(self.activity_type.clone()).into());
        }
        self.outcome.delay = Some(period);
        Ok(())
    }
}
