//! Breakpoint suspension protocol
//!
//! Tracks, per breakpoint name, whether the breakpoint was reached, whether
//! a resume was requested before the machine got there, and who is waiting
//! for the next arrival. The registry is shared between the machine and
//! external callers, so it can be driven while the machine is ticking.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use super::activity::BreakpointInfo;
use super::error::{StateError, VmError, VmResult};

type WaitOutcome = Result<BreakpointInfo, VmError>;

/// One registration shared by every waiter on the same name
struct Registration {
    notify: oneshot::Sender<WaitOutcome>,
    outcome: Shared<BoxFuture<'static, WaitOutcome>>,
}

impl Registration {
    fn new(name: &str) -> Self {
        let (notify, receiver) = oneshot::channel();
        let name = name.to_string();
        let outcome = receiver
            .map(move |received| {
                received.unwrap_or_else(|_| {
                    Err(StateError::Crashed(format!("breakpoint '{name}' registry dropped")).into())
                })
            })
            .boxed()
            .shared();
        Self { notify, outcome }
    }
}

#[derive(Default)]
struct Inner {
    known: HashMap<String, BreakpointInfo>,
    registrations: HashMap<String, Registration>,
    pending_resume: HashSet<String>,
    reached: HashSet<String>,
    active: HashSet<String>,
    crashed: Option<VmError>,
}

impl Inner {
    fn check(&self, name: &str) -> VmResult<()> {
        if let Some(err) = &self.crashed {
            return Err(StateError::Crashed(err.to_string()).into());
        }
        if !self.known.contains_key(name) {
            return Err(VmError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

/// Cloneable handle to the breakpoints of one machine
#[derive(Clone)]
pub struct BreakpointControl {
    inner: Arc<Mutex<Inner>>,
    resumed: Arc<Notify>,
}

impl BreakpointControl {
    pub(crate) fn new(breakpoints: Vec<BreakpointInfo>) -> Self {
        let known = breakpoints
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                known,
                ..Inner::default()
            })),
            resumed: Arc::new(Notify::new()),
        }
    }

    /// Names of every breakpoint in the tree
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.lock().known.keys().cloned().collect();
        names.sort();
        names
    }

    /// Description of a breakpoint
    pub fn info(&self, name: &str) -> VmResult<BreakpointInfo> {
        self.inner
            .lock()
            .known
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::NotFound(name.to_string()))
    }

    /// Whether the machine currently sits at this breakpoint, unresumed.
    pub fn is_active(&self, name: &str) -> bool {
        self.inner.lock().active.contains(name)
    }

    /// Request resumption. Idempotent, and honored on the next arrival when
    /// the breakpoint was not reached yet.
    pub fn resume(&self, name: &str) -> VmResult<()> {
        let mut inner = self.inner.lock();
        inner.check(name)?;
        inner.pending_resume.insert(name.to_string());
        drop(inner);
        self.resumed.notify_one();
        tracing::info!(breakpoint = name, "breakpoint resume requested");
        Ok(())
    }

    /// Completes after the next resume request (or right away if one came
    /// in since the last call).
    pub async fn resume_requested(&self) {
        self.resumed.notified().await;
    }

    /// Wait for the breakpoint to be reached.
    ///
    /// Resolves immediately when the machine already sits at the
    /// breakpoint; otherwise on the next arrival. Rejected with the crash
    /// error if the machine crashes first, or with [`VmError::Cancelled`]
    /// if `cancel` fires.
    pub fn wait(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, VmResult<BreakpointInfo>> {
        let outcome = {
            let mut inner = self.inner.lock();
            if let Err(err) = inner.check(name) {
                let err = match (&inner.crashed, err) {
                    (Some(crash), _) => crash.clone(),
                    (None, err) => err,
                };
                return futures::future::ready(Err(err)).boxed();
            }
            if inner.active.contains(name) {
                let info = inner.known[name].clone();
                return futures::future::ready(Ok(info)).boxed();
            }
            inner
                .registrations
                .entry(name.to_string())
                .or_insert_with(|| Registration::new(name))
                .outcome
                .clone()
        };

        let cancel = cancel.clone();
        async move {
            tokio::select! {
                result = outcome => result,
                _ = cancel.cancelled() => Err(VmError::Cancelled),
            }
        }
        .boxed()
    }

    /// Number of names with outstanding waiters
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    pub(crate) fn pending_resumes(&self) -> Vec<String> {
        self.inner.lock().pending_resume.iter().cloned().collect()
    }

    pub(crate) fn drop_resume(&self, name: &str) {
        self.inner.lock().pending_resume.remove(name);
    }

    /// Record an arrival. Returns `true` for the first execution of this reach.
    pub(crate) fn arrive(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.reached.insert(name.to_string()) {
            return false;
        }
        inner.active.insert(name.to_string());
        let info = inner.known.get(name).cloned().unwrap_or_else(|| BreakpointInfo {
            name: name.to_string(),
            description: String::new(),
        });
        if let Some(registration) = inner.registrations.remove(name) {
            // Waiters that already gave up dropped their receivers.
            let _ = registration.notify.send(Ok(info));
        }
        true
    }

    pub(crate) fn mark_resumed(&self, name: &str) {
        self.inner.lock().active.remove(name);
    }

    pub(crate) fn leave(&self, name: &str) {
        let mut inner = self.inner.lock();
        inner.reached.remove(name);
        inner.active.remove(name);
    }

    /// Reject every outstanding waiter across the tree.
    pub(crate) fn crash(&self, error: &VmError) {
        let mut inner = self.inner.lock();
        inner.crashed = Some(error.clone());
        inner.pending_resume.clear();
        inner.active.clear();
        for (_, registration) in inner.registrations.drain() {
            let _ = registration.notify.send(Err(error.clone()));
        }
    }
}

impl std::fmt::Debug for BreakpointControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BreakpointControl")
            .field("breakpoints", &inner.known.len())
            .field("active", &inner.active)
            .field("crashed", &inner.crashed.is_some())
            .finish()
    }
}
