//! Durable wait on the machine clock

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::vm::activity::{Activity, ActivityKind, ActivityRef};
use crate::vm::context::ExecutionContext;

/// Countdown: arms a wake time on its first invocation and pops once it
/// elapsed. The machine stays idle in between without being paused.
#[derive(Debug)]
pub struct Delay {
    period: Duration,
}

impl Delay {
    /// Type id
    pub const TYPE_ID: &'static str = "Delay";

    /// Wait for `period`
    pub fn new(period: Duration) -> ActivityRef {
        Arc::new(Self { period })
    }

    /// Wait for `ms` milliseconds
    pub fn millis(ms: u64) -> ActivityRef {
        Self::new(Duration::from_millis(ms))
    }
}

#[async_trait]
impl Activity for Delay {
    fn activity_type(&self) -> &str {
        Self::TYPE_ID
    }

    fn kind(&self) -> ActivityKind {
        ActivityKind::Native
    }

    fn options(&self) -> serde_json::Value {
        serde_json::json!({ "durationMs": self.period.as_millis() as u64 })
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        if ctx.invocation_count() == 1 && !self.period.is_zero() {
            ctx.delay(self.period.max(Duration::from_millis(1)))?;
        } else {
            ctx.pop()?;
        }
        Ok(())
    }
}
