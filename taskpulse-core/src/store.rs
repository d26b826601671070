//! Persistent state store
//!
//! Durable home for the tracker configuration and for any metrics that have
//! been handed to the exporter but not yet confirmed delivered. Everything
//! lives in one versioned JSON snapshot written atomically (temp file +
//! rename) under a single path.
//!
//! Loading is tolerant: a missing or unreadable file falls back to defaults
//! so the tracker keeps functioning without persistence rather than refusing
//! to start. Older schema versions are migrated additively (new fields get
//! defaults) and re-saved at the current version before first use.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::MetricRecord;

/// Current persisted schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

fn default_version() -> u32 {
    1
}

fn default_idle_timeout_ms() -> i64 {
    60_000
}

fn default_endpoint() -> String {
    "http://localhost:4318".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Generate a fresh machine identifier: cryptographically random,
/// human-scannable hyphenated hex.
pub fn generate_machine_id() -> String {
    Uuid::new_v4().to_string()
}

/// Runtime-mutable tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Stable identity attached to every metric
    #[serde(default = "generate_machine_id")]
    pub machine_id: String,

    /// Inactivity threshold before `Active` decays to `Idle`
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: i64,

    /// Collector base URL; metrics POST to its ingestion path
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Master switch for tracking
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// UI toggle state (sidebar open/closed), added in schema v2
    #[serde(default)]
    pub sidebar_open: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            machine_id: generate_machine_id(),
            idle_timeout_ms: default_idle_timeout_ms(),
            endpoint: default_endpoint(),
            enabled: default_enabled(),
            sidebar_open: false,
        }
    }
}

/// Partial config for merge-style updates; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub machine_id: Option<String>,
    pub idle_timeout_ms: Option<i64>,
    pub endpoint: Option<String>,
    pub enabled: Option<bool>,
    pub sidebar_open: Option<bool>,
}

/// The versioned durable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// Schema version of this snapshot
    #[serde(default = "default_version")]
    pub version: u32,

    /// When the snapshot was last written
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,

    /// Tracker configuration
    #[serde(default)]
    pub config: TrackerConfig,

    /// Metrics flushed for export but not yet confirmed delivered
    #[serde(default)]
    pub pending_metrics: Vec<MetricRecord>,
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState {
            version: CURRENT_SCHEMA_VERSION,
            last_updated: Utc::now(),
            config: TrackerConfig::default(),
            pending_metrics: Vec::new(),
        }
    }
}

/// File-backed store with an in-memory cache.
///
/// Read accessors serve the cache; every mutation writes the full snapshot.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: PersistedState,
}

impl StateStore {
    /// Load the snapshot at `path`, or initialize with defaults.
    ///
    /// Any storage failure degrades to in-memory defaults (logged, not
    /// fatal); an older schema version is migrated additively and re-saved.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match Self::try_load(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::info!(path = %path.display(), "no persisted state, starting fresh");
                let state = PersistedState::default();
                let mut store = StateStore { path, state };
                if let Err(e) = store.save() {
                    tracing::warn!(error = %e, "failed to write initial state");
                }
                return store;
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(),
                    "failed to load persisted state, running with in-memory defaults");
                PersistedState::default()
            }
        };

        let mut store = StateStore { path, state };
        if store.state.version < CURRENT_SCHEMA_VERSION {
            store.migrate();
        }
        store
    }

    fn try_load(path: &Path) -> Result<Option<PersistedState>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let state: PersistedState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    /// Additive migration: serde defaults have already filled fields that
    /// the stored version predates, so migrating is stamping the new version
    /// and re-saving before the rest of the system reads the state.
    fn migrate(&mut self) {
        let from = self.state.version;
        self.state.version = CURRENT_SCHEMA_VERSION;
        tracing::info!(from, to = CURRENT_SCHEMA_VERSION, "migrated persisted state");
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to persist migrated state");
        }
    }

    /// Write the full snapshot, bumping `last_updated`.
    ///
    /// Writes to a temp file in the same directory and renames into place so
    /// a crash mid-write never corrupts the previous snapshot.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_updated = Utc::now();

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Storage(format!(
                "failed to move state into place at {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Merge a partial config into the current one, then save.
    pub fn save_config(&mut self, patch: ConfigPatch) -> Result<()> {
        let config = &mut self.state.config;
        if let Some(machine_id) = patch.machine_id {
            config.machine_id = machine_id;
        }
        if let Some(idle_timeout_ms) = patch.idle_timeout_ms {
            config.idle_timeout_ms = idle_timeout_ms;
        }
        if let Some(endpoint) = patch.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(enabled) = patch.enabled {
            config.enabled = enabled;
        }
        if let Some(sidebar_open) = patch.sidebar_open {
            config.sidebar_open = sidebar_open;
        }
        self.save()
    }

    /// Overwrite the pending list, then save. Called before every export
    /// attempt as the crash-safety checkpoint.
    pub fn save_pending_metrics(&mut self, records: &[MetricRecord]) -> Result<()> {
        self.state.pending_metrics = records.to_vec();
        self.save()
    }

    /// Empty the pending list, then save. Called only after a confirmed
    /// successful export. A no-op when nothing is pending.
    pub fn clear_pending_metrics(&mut self) -> Result<()> {
        if self.state.pending_metrics.is_empty() {
            return Ok(());
        }
        self.state.pending_metrics.clear();
        self.save()
    }

    /// Copy of the pending metrics awaiting confirmed export.
    pub fn pending_metrics(&self) -> Vec<MetricRecord> {
        self.state.pending_metrics.clone()
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> TrackerConfig {
        self.state.config.clone()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{AttrValue, MetricKind};
    use std::collections::BTreeMap;

    fn record(name: &str) -> MetricRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("machine.id".to_string(), AttrValue::Str("m".to_string()));
        MetricRecord {
            name: name.to_string(),
            kind: MetricKind::Counter,
            value: 1,
            timestamp: Utc::now(),
            attributes,
        }
    }

    #[test]
    fn test_first_run_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"));

        let config = store.config();
        assert!(config.enabled);
        assert!(!config.sidebar_open);
        assert_eq!(config.idle_timeout_ms, 60_000);
        assert_eq!(config.endpoint, "http://localhost:4318");
        // Hyphenated hex machine id.
        assert_eq!(config.machine_id.len(), 36);
        assert_eq!(config.machine_id.matches('-').count(), 4);
        assert!(store.pending_metrics().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::load(&path);
        let machine_id = store.config().machine_id;
        store
            .save_config(ConfigPatch {
                idle_timeout_ms: Some(30_000),
                sidebar_open: Some(true),
                ..Default::default()
            })
            .unwrap();
        store.save_pending_metrics(&[record("a"), record("b")]).unwrap();

        let reloaded = StateStore::load(&path);
        let config = reloaded.config();
        assert_eq!(config.machine_id, machine_id);
        assert_eq!(config.idle_timeout_ms, 30_000);
        assert!(config.sidebar_open);
        assert_eq!(reloaded.pending_metrics().len(), 2);
        assert_eq!(reloaded.pending_metrics()[0].name, "a");
    }

    #[test]
    fn test_config_patch_leaves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::load(dir.path().join("state.json"));
        let before = store.config();

        store
            .save_config(ConfigPatch {
                endpoint: Some("http://collector:4318".to_string()),
                ..Default::default()
            })
            .unwrap();

        let after = store.config();
        assert_eq!(after.endpoint, "http://collector:4318");
        assert_eq!(after.machine_id, before.machine_id);
        assert_eq!(after.enabled, before.enabled);
    }

    #[test]
    fn test_v1_migrates_additively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        // A v1 snapshot predates sidebar_open and pending_metrics.
        let v1 = r#"{
            "version": 1,
            "last_updated": "2024-01-01T00:00:00Z",
            "config": {
                "machine_id": "11111111-2222-3333-4444-555555555555",
                "idle_timeout_ms": 45000,
                "endpoint": "http://old:4318",
                "enabled": false
            }
        }"#;
        std::fs::write(&path, v1).unwrap();

        let store = StateStore::load(&path);
        let config = store.config();
        // Existing fields preserved.
        assert_eq!(config.machine_id, "11111111-2222-3333-4444-555555555555");
        assert_eq!(config.idle_timeout_ms, 45_000);
        assert!(!config.enabled);
        // New fields defaulted.
        assert!(!config.sidebar_open);
        assert!(store.pending_metrics().is_empty());

        // Re-saved at the current version.
        let raw = std::fs::read_to_string(&path).unwrap();
        let on_disk: PersistedState = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json {{{").unwrap();

        let store = StateStore::load(&path);
        assert!(store.config().enabled);
        assert!(store.pending_metrics().is_empty());
    }

    #[test]
    fn test_clear_pending_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::load(&path);
        store.save_pending_metrics(&[record("a")]).unwrap();
        store.clear_pending_metrics().unwrap();
        assert!(store.pending_metrics().is_empty());

        let reloaded = StateStore::load(&path);
        assert!(reloaded.pending_metrics().is_empty());
    }

    #[test]
    fn test_pending_metrics_round_trip_preserves_attribution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut r = record("user.active.duration_ms");
        r.kind = MetricKind::Gauge;
        r.value = 5000;
        r.attributes
            .insert("project_id".to_string(), AttrValue::Str("proj-1".into()));

        let mut store = StateStore::load(&path);
        store.save_pending_metrics(std::slice::from_ref(&r)).unwrap();

        let reloaded = StateStore::load(&path);
        let pending = reloaded.pending_metrics();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], r);
    }
}
