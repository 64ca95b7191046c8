//! Artifact sinks for generated fix scripts.
//!
//! The fix registry never touches storage directly; it hands script bodies
//! to an [`ArtifactSink`] and records the location the sink returns.

use crate::error::{MendError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Destination for persisted artifacts.
///
/// `id` is unique per artifact (fix ids embed the failure id), so writes
/// from different runs cannot collide.
pub trait ArtifactSink: Send + Sync {
    /// Store `content` under `id` with the given file extension and return
    /// its location.
    ///
    /// # Errors
    ///
    /// Returns [`MendError::ArtifactSink`] if the content cannot be stored.
    fn write(&self, id: &str, extension: &str, content: &str) -> Result<String>;
}

/// Writes artifacts as files under a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for FsArtifactSink {
    fn write(&self, id: &str, extension: &str, content: &str) -> Result<String> {
        let to_err = |e: std::io::Error| MendError::artifact(id, e.to_string());

        // Ids come from handoff files on disk and must stay inside `dir`
        if !is_plain_name(id) || !is_plain_name(extension) {
            return Err(MendError::artifact(
                id,
                "artifact names may not contain path separators or '..'",
            ));
        }

        fs::create_dir_all(&self.dir).map_err(to_err)?;
        let path = self.dir.join(format!("{id}.{extension}"));
        fs::write(&path, content).map_err(to_err)?;

        #[cfg(unix)]
        if extension == "sh" {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path).map_err(to_err)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).map_err(to_err)?;
        }

        debug!(path = %path.display(), "Artifact written");
        Ok(path.to_string_lossy().into_owned())
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}

/// Keeps artifacts in memory. Locations look like `memory://<id>.<ext>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryArtifactSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content stored at `location`.
    #[must_use]
    pub fn get(&self, location: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(location)
            .cloned()
    }

    /// All stored locations, sorted.
    #[must_use]
    pub fn locations(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn write(&self, id: &str, extension: &str, content: &str) -> Result<String> {
        let location = format!("memory://{id}.{extension}");
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(location.clone(), content.to_string());
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fs_sink_names_file_by_id_and_extension() {
        let temp = TempDir::new().unwrap();
        let sink = FsArtifactSink::new(temp.path().join("fixes"));

        let location = sink.write("fix-abc", "js", "console.log(1);").unwrap();

        let expected = temp.path().join("fixes").join("fix-abc.js");
        assert_eq!(PathBuf::from(&location), expected);
        assert_eq!(fs::read_to_string(expected).unwrap(), "console.log(1);");
    }

    #[cfg(unix)]
    #[test]
    fn test_fs_sink_marks_shell_scripts_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let sink = FsArtifactSink::new(temp.path());
        let location = sink.write("fix-1", "sh", "#!/bin/sh\necho ok\n").unwrap();

        let mode = fs::metadata(location).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_fs_sink_reports_unwritable_dir() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let sink = FsArtifactSink::new(blocker.join("nested"));

        let err = sink.write("fix-1", "sh", "echo").unwrap_err();
        assert!(matches!(err, MendError::ArtifactSink { ref id, .. } if id == "fix-1"));
    }

    #[test]
    fn test_fs_sink_rejects_ids_escaping_the_directory() {
        let temp = TempDir::new().unwrap();
        let sink = FsArtifactSink::new(temp.path().join("fixes"));

        for id in ["fix-a/../../escaped", "fix-../x", "..", "fix-a\\b", ""] {
            let err = sink.write(id, "sh", "echo pwned").unwrap_err();
            assert!(matches!(err, MendError::ArtifactSink { .. }), "{id} was accepted");
        }
        assert!(sink.write("fix-1", "../sh", "echo").is_err());
        assert!(!temp.path().join("escaped.sh").exists());
        assert!(!temp.path().join("fixes").exists());
    }

    #[test]
    fn test_memory_sink_round_trip() {
        let sink = MemoryArtifactSink::new();
        let location = sink.write("fix-9", "sh", "echo hi").unwrap();
        assert_eq!(location, "memory://fix-9.sh");
        assert_eq!(sink.get(&location).as_deref(), Some("echo hi"));
        assert_eq!(sink.locations(), vec![location]);
    }
}
