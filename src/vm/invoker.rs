//! Workflow invoker
//!
//! Owns one machine and drives it: runs injection hooks around every tick,
//! stops at pauses and countdowns, and sleeps between steps when asked to
//! run to completion.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::VmConfig;
use super::activity::{ActivityRef, BreakpointInfo};
use super::breakpoint::BreakpointControl;
use super::error::{StateError, VmError, VmResult};
use super::injection::{Injection, InjectionRegistry};
use super::machine::Vm;
use super::persistence::PersistedDocument;
use super::registry::ActivityRegistry;
use super::variables::Variables;

/// Workflow instance identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new random WorkflowId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokerStatus {
    /// Waiting for the next step
    Idle,
    /// Inside a step
    Working,
    /// A tick failed; the machine is crashed
    Aborted,
    /// The workflow terminated
    Completed,
}

impl fmt::Display for InvokerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvokerStatus::Idle => "Idle",
            InvokerStatus::Working => "Working",
            InvokerStatus::Aborted => "Aborted",
            InvokerStatus::Completed => "Completed",
        };
        f.write_str(name)
    }
}

/// Persisted invoker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokerState {
    /// Workflow instance
    pub workflow_id: WorkflowId,
    /// Status at preserve time
    pub status: InvokerStatus,
    /// Machine document
    pub vm: PersistedDocument,
}

/// Drives one machine
pub struct Invoker {
    id: WorkflowId,
    vm: Vm,
    status: InvokerStatus,
    injections: InjectionRegistry,
}

impl Invoker {
    /// Invoker for a fresh machine over `root`
    pub fn new(root: ActivityRef) -> VmResult<Self> {
        Self::with_config(root, VmConfig::default())
    }

    /// Invoker with an explicit configuration
    pub fn with_config(root: ActivityRef, config: VmConfig) -> VmResult<Self> {
        Ok(Self::from_vm(WorkflowId::new(), Vm::with_config(root, config)?))
    }

    /// Wrap an existing machine
    pub fn from_vm(id: WorkflowId, vm: Vm) -> Self {
        let status = if vm.is_terminated() {
            InvokerStatus::Completed
        } else {
            InvokerStatus::Idle
        };
        let injections = InjectionRegistry::new(vm.config().injection_compaction_threshold);
        Self {
            id,
            vm,
            status,
            injections,
        }
    }

    /// Rebuild an invoker from its persisted state.
    ///
    /// The status restarts as idle, or completed for a terminated machine.
    pub fn restore(state: &InvokerState, registry: &ActivityRegistry, config: VmConfig) -> VmResult<Self> {
        let vm = Vm::restore(&state.vm, registry, config)?;
        tracing::info!(workflow = %state.workflow_id, previous = %state.status, "invoker restored");
        Ok(Self::from_vm(state.workflow_id.clone(), vm))
    }

    /// Capture the persistable state
    pub fn preserve(&self) -> InvokerState {
        InvokerState {
            workflow_id: self.id.clone(),
            status: self.status,
            vm: self.vm.preserve(),
        }
    }

    /// Workflow instance id
    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    /// Current status
    pub fn status(&self) -> InvokerStatus {
        self.status
    }

    /// Underlying machine
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Time until the machine wants to be ticked again
    pub fn tick_countdown(&self) -> Duration {
        self.vm.tick_countdown()
    }

    /// Register an injection hook
    pub fn inject(&mut self, injection: Injection) {
        self.injections.add(injection);
    }

    /// Shared breakpoint handle, usable from other tasks while running
    pub fn breakpoints(&self) -> BreakpointControl {
        self.vm.breakpoints()
    }

    /// Request resumption of a breakpoint
    pub fn resume_breakpoint(&mut self, name: &str) -> VmResult<()> {
        self.vm.resume(name)
    }

    /// Wait until the named breakpoint is reached
    pub fn wait_for_breakpoint(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, VmResult<BreakpointInfo>> {
        self.vm.wait(name, cancel)
    }

    /// Variables of the paused machine, for seeding input data.
    pub fn execution_context(&mut self) -> VmResult<Variables<'_>> {
        if !self.vm.is_paused() {
            return Err(StateError::NotPaused.into());
        }
        Ok(self.vm.variables())
    }

    /// Tick until the machine pauses, goes idle, terminates or crashes.
    ///
    /// Does nothing while a countdown is pending.
    pub async fn step(&mut self, cancel: &CancellationToken) -> VmResult<InvokerStatus> {
        match self.status {
            InvokerStatus::Aborted | InvokerStatus::Completed => {
                return Err(StateError::InvalidStatus(self.status.to_string()).into());
            }
            // Working here means an earlier step future was dropped midway.
            InvokerStatus::Idle | InvokerStatus::Working => {}
        }
        self.status = InvokerStatus::Idle;
        self.vm.absorb_pending_resumes()?;
        if !self.vm.tick_countdown().is_zero() {
            return Ok(self.status);
        }

        self.status = InvokerStatus::Working;
        loop {
            self.injections.process(&mut self.vm, cancel);

            let idle = match self.vm.tick(cancel).await {
                Ok(idle) => idle,
                Err(VmError::Cancelled) => {
                    self.status = InvokerStatus::Idle;
                    return Err(VmError::Cancelled);
                }
                Err(err) => {
                    tracing::error!(workflow = %self.id, error = %err, "workflow aborted");
                    self.status = InvokerStatus::Aborted;
                    return Err(err);
                }
            };

            self.injections.process(&mut self.vm, cancel);

            if self.vm.is_terminated() {
                tracing::info!(workflow = %self.id, "workflow completed");
                self.status = InvokerStatus::Completed;
                break;
            }
            if idle || self.vm.is_paused() {
                self.status = InvokerStatus::Idle;
                break;
            }
        }
        Ok(self.status)
    }

    /// Step until the workflow completes, sleeping between steps.
    ///
    /// A resume request made through [`Invoker::breakpoints`] cuts the sleep
    /// short.
    pub async fn run(&mut self, cancel: &CancellationToken) -> VmResult<()> {
        let breakpoints = self.vm.breakpoints();
        let backoff = Duration::from_millis(self.vm.config().idle_backoff_ms);

        loop {
            if self.step(cancel).await? == InvokerStatus::Completed {
                return Ok(());
            }

            let countdown = self.vm.tick_countdown();
            let pause = if countdown.is_zero() { backoff } else { countdown };
            tracing::trace!(workflow = %self.id, ?pause, "invoker sleeping");

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = breakpoints.resume_requested() => {}
                _ = cancel.cancelled() => return Err(VmError::Cancelled),
            }
        }
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("vm", &self.vm)
            .finish()
    }
}
