//! Runtime-only control flags
//!
//! Composite activities talk to their descendants (branch outcome, loop
//! break) through flags keyed by the composite's oid plus a fixed suffix.
//! The channel belongs to one machine and is never persisted.

use std::collections::HashMap;

/// Flag suffix set by the condition subtree of an `If`/`While`
pub const CONDITION: &str = "condition";

/// Flag suffix set by a loop body to request termination
pub const BREAK: &str = "break";

/// Per-machine control flag table
#[derive(Debug, Default)]
pub struct ControlChannel {
    flags: HashMap<String, bool>,
}

impl ControlChannel {
    /// Create an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    fn key(oid: &str, suffix: &str) -> String {
        format!("{oid}:{suffix}")
    }

    /// Set a flag
    pub fn set(&mut self, oid: &str, suffix: &str, value: bool) {
        self.flags.insert(Self::key(oid, suffix), value);
    }

    /// Read a flag
    pub fn get(&self, oid: &str, suffix: &str) -> Option<bool> {
        self.flags.get(&Self::key(oid, suffix)).copied()
    }

    /// Read and clear a flag
    pub fn take(&mut self, oid: &str, suffix: &str) -> Option<bool> {
        self.flags.remove(&Self::key(oid, suffix))
    }

    /// Drop every flag owned by the frame at `oid`.
    pub fn clear_scope(&mut self, oid: &str) {
        let prefix = format!("{oid}:");
        self.flags.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Number of live flags
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether no flags are set
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_scope_keeps_siblings() {
        let mut channel = ControlChannel::new();
        channel.set("0.1", BREAK, true);
        channel.set("0.10", BREAK, true);
        channel.set("0.1", CONDITION, false);

        channel.clear_scope("0.1");

        assert_eq!(channel.get("0.1", BREAK), None);
        assert_eq!(channel.get("0.10", BREAK), Some(true));
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_take_clears() {
        let mut channel = ControlChannel::new();
        channel.set("0", CONDITION, true);
        assert_eq!(channel.take("0", CONDITION), Some(true));
        assert!(channel.is_empty());
    }
}
