//! Run state persistence
//!
//! [`RunState`] remembers, per resource, what was last applied, which outputs
//! it produced and how the last run ended for it. The engine treats it as the
//! source of truth for diffing on the next run.

use crate::error::StateError;
use crate::resource::ResourceKind;
use crate::value::{Attributes, OutputRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Schema version written by this build
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Terminal status of a node in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Applied,
    Unchanged,
    Failed,
    Blocked,
    Deleted,
}

impl NodeStatus {
    /// Whether the node ended in its desired state
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged | Self::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    /// Properties as last applied
    #[serde(default)]
    pub properties: Attributes,
    /// Outputs from the last successful apply
    #[serde(default)]
    pub outputs: Attributes,
    /// Dependencies at the time of the last run, used to order deletions
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    pub status: NodeStatus,
    /// Cause of the last failure or block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Whether the record reflects a resource in its last applied state
    pub fn is_settled(&self) -> bool {
        matches!(self.status, NodeStatus::Applied | NodeStatus::Unchanged)
    }
}

/// Process-wide record of every managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    /// Incremented on every save
    #[serde(default)]
    pub serial: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Named exports from the last run
    #[serde(default)]
    pub exports: BTreeMap<String, serde_json::Value>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            serial: 0,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
            exports: BTreeMap::new(),
        }
    }
}

impl RunState {
    pub fn record(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Output value recorded for a reference
    pub fn output(&self, r: &OutputRef) -> Option<serde_json::Value> {
        self.resources
            .get(&r.resource)
            .and_then(|rec| rec.outputs.get(&r.attribute))
            .cloned()
    }

    /// Bump the serial and timestamp ahead of a save
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

/// Read/write contract for RunState persistence
pub trait StateStore: Send + Sync {
    /// Load the state, or an empty state if none was ever saved
    fn load(&self) -> Result<RunState, StateError>;

    fn save(&self, state: &RunState) -> Result<(), StateError>;
}

/// Bring a serialized state up to the current schema version.
pub fn migrate(raw: serde_json::Value) -> Result<serde_json::Value, StateError> {
    let found = raw
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(u64::from(STATE_SCHEMA_VERSION)) as u32;

    if found > STATE_SCHEMA_VERSION {
        return Err(StateError::UnsupportedVersion {
            found,
            supported: STATE_SCHEMA_VERSION,
        });
    }

    Ok(raw)
}

/// State stored as pretty-printed JSON in a single file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<RunState, StateError> {
        if !self.path.exists() {
            log::debug!("State file {} does not exist, using empty state", self.path.display());
            return Ok(RunState::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StateError::Read {
            path: self.path.clone(),
            source,
        })?;

        let parse_err = |source| StateError::Parse {
            path: self.path.clone(),
            source,
        };
        let raw: serde_json::Value = serde_json::from_str(&content).map_err(parse_err)?;
        let mut state: RunState = serde_json::from_value(migrate(raw)?).map_err(parse_err)?;
        state.schema_version = STATE_SCHEMA_VERSION;

        log::debug!(
            "Loaded state serial {} with {} resources from {}",
            state.serial,
            state.resources.len(),
            self.path.display()
        );
        Ok(state)
    }

    fn save(&self, state: &RunState) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        log::debug!("Saved state serial {} to {}", state.serial, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(status: NodeStatus) -> ResourceRecord {
        ResourceRecord {
            kind: ResourceKind::Project,
            properties: Attributes::from([("project_id".to_string(), json!("hub"))]),
            outputs: Attributes::from([("number".to_string(), json!("1001"))]),
            dependencies: BTreeSet::new(),
            status,
            error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let state = store.load().unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.schema_version, STATE_SCHEMA_VERSION);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));

        let mut state = RunState::default();
        state.resources.insert("p".into(), record(NodeStatus::Applied));
        state.exports.insert("hub_project_id".into(), json!("hub"));
        state.touch();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(
            loaded.output(&OutputRef::new("p", "number")),
            Some(json!("1001"))
        );
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let raw = json!({
            "schema_version": STATE_SCHEMA_VERSION + 1,
            "last_updated": "2026-01-01T00:00:00Z",
        });
        fs::write(&path, raw.to_string()).unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
    }

    #[test]
    fn test_settled_statuses() {
        assert!(record(NodeStatus::Applied).is_settled());
        assert!(record(NodeStatus::Unchanged).is_settled());
        assert!(!record(NodeStatus::Failed).is_settled());
        assert!(!record(NodeStatus::Blocked).is_settled());
    }
}
