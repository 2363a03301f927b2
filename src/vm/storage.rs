//! Local document store
//!
//! Keeps invoker documents and the machine configuration under one root
//! directory. Every write goes through a temp file, fsync and rename, so a
//! crash never leaves a half-written document behind.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::VmConfig;
use super::invoker::{InvokerState, WorkflowId};

/// Directory-backed store for persisted workflows
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory layout and write `config`.
    pub fn init(root: impl Into<PathBuf>, config: &VmConfig) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(store.workflows_dir())
            .with_context(|| format!("Failed to create directory: {:?}", store.workflows_dir()))?;
        store.write_config(config)?;
        Ok(store)
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Directory holding one document per workflow
    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join("workflows")
    }

    /// Document path of one workflow
    pub fn workflow_path(&self, id: &WorkflowId) -> PathBuf {
        self.workflows_dir().join(format!("{id}.json"))
    }

    /// Write configuration
    pub fn write_config(&self, config: &VmConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
        write_atomic(&self.config_path(), &json)
    }

    /// Load configuration, falling back to defaults when none was written.
    pub fn load_config(&self) -> Result<VmConfig> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(VmConfig::default());
        }
        let data = fs::read(&path).with_context(|| format!("Failed to read file: {:?}", path))?;
        serde_json::from_slice(&data).context("Failed to deserialize config")
    }

    /// Persist an invoker document under its workflow id.
    pub fn save(&self, state: &InvokerState) -> Result<PathBuf> {
        let path = self.workflow_path(&state.workflow_id);
        save_state(&path, state)?;
        Ok(path)
    }

    /// Load the document of one workflow
    pub fn load(&self, id: &WorkflowId) -> Result<InvokerState> {
        load_state(&self.workflow_path(id))
    }

    /// Remove the document of one workflow; missing documents are ignored.
    pub fn remove(&self, id: &WorkflowId) -> Result<()> {
        let path = self.workflow_path(id);
        match fs::remove_file(&path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("Failed to remove {:?}", path))
            }
            _ => Ok(()),
        }
    }

    /// Ids of every stored workflow, sorted
    pub fn list(&self) -> Result<Vec<WorkflowId>> {
        let dir = self.workflows_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read directory: {:?}", dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match uuid::Uuid::parse_str(stem) {
                Ok(uuid) => ids.push(WorkflowId(uuid)),
                Err(_) => tracing::warn!(path = ?path, "skipping document with unparseable name"),
            }
        }
        ids.sort_by_key(|id| id.0);
        Ok(ids)
    }
}

/// Write `state` as pretty JSON to `path`.
pub fn save_state(path: &Path, state: &InvokerState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state).context("Failed to serialize workflow document")?;
    write_atomic(path, &json)
}

/// Read an invoker document from `path`.
pub fn load_state(path: &Path) -> Result<InvokerState> {
    let data = fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("Failed to deserialize workflow document {:?}", path))
}

/// Write data atomically to a file
///
/// Creates a temporary file, writes the data, syncs, then renames
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::activities::Log;
    use crate::vm::invoker::Invoker;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_config() {
        let temp = TempDir::new().unwrap();
        let config = VmConfig {
            breakpoint_recheck_ms: 250,
            ..VmConfig::default()
        };
        let store = DocumentStore::init(temp.path(), &config).unwrap();

        assert!(store.workflows_dir().exists());
        assert_eq!(store.load_config().unwrap(), config);
    }

    #[test]
    fn test_missing_config_is_default() {
        let temp = TempDir::new().unwrap();
        let store = DocumentStore::new(temp.path());
        assert_eq!(store.load_config().unwrap(), VmConfig::default());
    }

    #[test]
    fn test_save_list_load_remove() {
        let temp = TempDir::new().unwrap();
        let store = DocumentStore::init(temp.path(), &VmConfig::default()).unwrap();
        let state = Invoker::new(Log::new("hi")).unwrap().preserve();

        let path = store.save(&state).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(store.list().unwrap(), vec![state.workflow_id.clone()]);
        assert_eq!(store.load(&state.workflow_id).unwrap(), state);

        store.remove(&state.workflow_id).unwrap();
        store.remove(&state.workflow_id).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
