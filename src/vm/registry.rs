//! Activity type registry
//!
//! Maps a root type id to the constructor that rebuilds the whole tree from
//! its options. A registry instance is passed to [`Vm::restore`]; there is
//! no process-wide catalog.
//!
//! [`Vm::restore`]: super::Vm::restore

use std::collections::HashMap;
use std::sync::Arc;

use super::activity::ActivityRef;
use super::error::RegistryError;

/// Constructor rebuilding an activity tree from its root options
pub type ActivityFactory = Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<ActivityRef> + Send + Sync>;

/// Explicit catalog of restorable activity types
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    factories: HashMap<String, ActivityFactory>,
}

impl ActivityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. Registering a type id twice is an error.
    pub fn register<F>(&mut self, type_id: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<ActivityRef> + Send + Sync + 'static,
    {
        if self.factories.contains_key(type_id) {
            return Err(RegistryError::DuplicateType(type_id.to_string()));
        }
        self.factories.insert(type_id.to_string(), Arc::new(factory));
        tracing::debug!(type_id, "activity type registered");
        Ok(())
    }

    /// Whether a type id is known
    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// Registered type ids, sorted
    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Build a tree for `type_id` from `options`.
    pub fn construct(
        &self,
        type_id: &str,
        options: &serde_json::Value,
    ) -> Result<ActivityRef, RegistryError> {
        let factory = self
            .factories
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownType(type_id.to_string()))?;

        let activity = factory(options).map_err(|err| RegistryError::ConstructionFailed {
            type_id: type_id.to_string(),
            detail: format!("{err:#}"),
        })?;

        if activity.activity_type() != type_id {
            return Err(RegistryError::ConstructionFailed {
                type_id: type_id.to_string(),
                detail: format!(
                    "constructor returned an activity of type '{}'",
                    activity.activity_type()
                ),
            });
        }
        Ok(activity)
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("types", &self.type_ids())
            .finish()
    }
}
