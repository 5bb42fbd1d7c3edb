//! Fleet state stores
//!
//! The master drone manifest is the desired-state list: which drones exist,
//! where their boards live and whether each should be running. The override
//! list records drones the monitor must leave alone until an expiry time,
//! so a manual stop is not undone by the next reconcile tick.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One manifest row, keyed by drone identifier ("bid.drid").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Address of the board hosting this drone.
    pub ip: String,
    /// Whether the monitor should keep this drone running.
    pub to_run: bool,
}

pub type Manifest = BTreeMap<String, ManifestEntry>;

/// Drone identifier to override expiry.
pub type Overrides = BTreeMap<String, DateTime<Utc>>;

pub trait ManifestStore: Send + Sync {
    fn load(&self) -> Result<Manifest>;
}

pub trait OverrideStore: Send + Sync {
    fn load(&self) -> Result<Overrides>;
    fn save(&self, overrides: &Overrides) -> Result<()>;

    /// Drop expired overrides, persisting only when something changed.
    fn prune(&self, now: DateTime<Utc>) -> Result<Overrides> {
        let mut overrides = self.load()?;
        let before = overrides.len();
        overrides.retain(|_, expiry| *expiry > now);
        if overrides.len() != before {
            debug!(expired = before - overrides.len(), "pruned expired overrides");
            self.save(&overrides)?;
        }
        Ok(overrides)
    }
}

/// Manifest loaded from a YAML file on every read, so fleet edits take
/// effect without restarting the queen.
pub struct YamlManifestStore {
    path: PathBuf,
}

impl YamlManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ManifestStore for YamlManifestStore {
    fn load(&self) -> Result<Manifest> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading manifest {}", self.path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing manifest {}", self.path.display()))
    }
}

/// Override list in a YAML file; a missing file is an empty list.
pub struct YamlOverrideStore {
    path: PathBuf,
}

impl YamlOverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OverrideStore for YamlOverrideStore {
    fn load(&self) -> Result<Overrides> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Overrides::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading overrides {}", self.path.display()))
            }
        };
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing overrides {}", self.path.display()))
    }

    fn save(&self, overrides: &Overrides) -> Result<()> {
        let text = serde_yaml::to_string(overrides)?;
        fs::write(&self.path, text)
            .with_context(|| format!("writing overrides {}", self.path.display()))
    }
}

/// In-process manifest, for tests and embedding.
#[derive(Default)]
pub struct MemoryManifestStore {
    manifest: Mutex<Manifest>,
}

impl MemoryManifestStore {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest: Mutex::new(manifest),
        }
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self) -> Result<Manifest> {
        Ok(self
            .manifest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

/// In-process override list, for tests and embedding.
#[derive(Default)]
pub struct MemoryOverrideStore {
    overrides: Mutex<Overrides>,
}

impl OverrideStore for MemoryOverrideStore {
    fn load(&self) -> Result<Overrides> {
        Ok(self
            .overrides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, overrides: &Overrides) -> Result<()> {
        *self
            .overrides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = overrides.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_manifest_yaml_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("master_drone_list.yaml");
        fs::write(
            &path,
            "1.1:\n  ip: 10.0.0.11\n  to_run: true\n1.2:\n  ip: 10.0.0.11\n  to_run: false\n",
        )
        .expect("write failed");

        let manifest = YamlManifestStore::new(&path).load().expect("load failed");
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["1.1"].ip, "10.0.0.11");
        assert!(manifest["1.1"].to_run);
        assert!(!manifest["1.2"].to_run);
    }

    #[test]
    fn test_manifest_missing_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = YamlManifestStore::new(dir.path().join("nope.yaml"));
        assert!(store.load().is_err());
    }

    #[test]
    fn test_overrides_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = YamlOverrideStore::new(dir.path().join("drone_overrides.yaml"));
        assert!(store.load().expect("load failed").is_empty());
    }

    #[test]
    fn test_overrides_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = YamlOverrideStore::new(dir.path().join("drone_overrides.yaml"));

        let mut overrides = Overrides::new();
        overrides.insert("1.1".to_string(), Utc::now() + Duration::hours(12));
        store.save(&overrides).expect("save failed");

        assert_eq!(store.load().expect("load failed"), overrides);
    }

    #[test]
    fn test_prune_drops_expired_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let store = YamlOverrideStore::new(dir.path().join("drone_overrides.yaml"));
        let now = Utc::now();

        let mut overrides = Overrides::new();
        overrides.insert("1.1".to_string(), now - Duration::hours(1));
        overrides.insert("2.1".to_string(), now + Duration::hours(1));
        store.save(&overrides).expect("save failed");

        let pruned = store.prune(now).expect("prune failed");
        assert_eq!(pruned.len(), 1);
        assert!(pruned.contains_key("2.1"));
        // the expired entry is gone from the file too
        assert_eq!(store.load().expect("load failed"), pruned);
    }

    #[test]
    fn test_prune_no_change_skips_save() {
        let store = MemoryOverrideStore::default();
        let now = Utc::now();
        let mut overrides = Overrides::new();
        overrides.insert("1.1".to_string(), now + Duration::hours(1));
        store.save(&overrides).expect("save failed");

        let pruned = store.prune(now).expect("prune failed");
        assert_eq!(pruned, overrides);
    }
}
