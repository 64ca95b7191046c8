//! External stores: where run diagnoses go, and where role backstories come
//! from.

use crate::diagnosis::RunDiagnosis;
use crate::error::{MendError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Sink for finished run diagnoses. Insert failures are reported to the
/// caller, which logs them and moves on.
pub trait DiagnosisStore: Send + Sync {
    /// Persist one diagnosis.
    ///
    /// # Errors
    ///
    /// Returns [`MendError::DiagnosisStore`] if the record was not stored.
    fn insert(&self, record: &RunDiagnosis) -> Result<()>;
}

/// Stores each diagnosis as `<handoffId>.json` in a directory.
#[derive(Debug, Clone)]
pub struct JsonDirDiagnosisStore {
    dir: PathBuf,
}

impl JsonDirDiagnosisStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location a diagnosis for `handoff_id` is written to.
    #[must_use]
    pub fn path_for(&self, handoff_id: &str) -> PathBuf {
        self.dir.join(format!("{handoff_id}.json"))
    }
}

impl DiagnosisStore for JsonDirDiagnosisStore {
    fn insert(&self, record: &RunDiagnosis) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        fs::create_dir_all(&self.dir)
            .and_then(|()| fs::write(self.path_for(&record.handoff_id), json))
            .map_err(|e| MendError::store(format!("{}: {e}", self.dir.display())))
    }
}

/// Source of human-readable role descriptions shown at startup.
pub trait AgentMetadataStore: Send + Sync {
    /// Backstory for `role`, if one is recorded.
    fn backstory(&self, role: &str) -> Option<String>;
}

impl AgentMetadataStore for HashMap<String, String> {
    fn backstory(&self, role: &str) -> Option<String> {
        self.get(role).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::RunSummary;
    use tempfile::TempDir;

    fn record(id: &str) -> RunDiagnosis {
        RunDiagnosis {
            handoff_id: id.to_string(),
            summary: RunSummary {
                total: 1,
                passed: 1,
                failed: 0,
                duration: 12,
                flakiness: 0.0,
            },
            issues: vec![],
            recommendations: vec![],
            fix_scripts: vec![],
        }
    }

    #[test]
    fn test_json_store_writes_one_file_per_run() {
        let temp = TempDir::new().unwrap();
        let store = JsonDirDiagnosisStore::new(temp.path().join("diagnoses"));

        store.insert(&record("run-a")).unwrap();
        store.insert(&record("run-b")).unwrap();

        let content = fs::read_to_string(store.path_for("run-a")).unwrap();
        let parsed: RunDiagnosis = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, record("run-a"));
        assert!(store.path_for("run-b").exists());
    }

    #[test]
    fn test_json_store_error_is_store_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let err = JsonDirDiagnosisStore::new(&blocker)
            .insert(&record("run-a"))
            .unwrap_err();
        assert!(matches!(err, MendError::DiagnosisStore { .. }));
    }

    #[test]
    fn test_map_metadata_store() {
        let mut map = HashMap::new();
        map.insert("tester".to_string(), "Finds what breaks".to_string());
        assert_eq!(map.backstory("tester").as_deref(), Some("Finds what breaks"));
        assert_eq!(map.backstory("debugger"), None);
    }
}
