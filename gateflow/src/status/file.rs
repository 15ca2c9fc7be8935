//! JSON file status repository.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::{GateflowError, Result};
use crate::status::{StatusMap, StatusRepository};

/// Stores the status map as a pretty-printed JSON object on disk.
///
/// Writes go through a temporary sibling and a rename so pollers never read
/// a truncated file. An unreadable or corrupt file reads as an empty map.
#[derive(Debug, Clone)]
pub struct JsonFileStatusRepository {
    path: PathBuf,
}

impl JsonFileStatusRepository {
    /// Creates a repository backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatusRepository for JsonFileStatusRepository {
    fn get(&self) -> Result<StatusMap> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StatusMap::new()),
            Err(e) => return Err(GateflowError::Status(format!("{}: {e}", self.path.display()))),
        };

        match serde_json::from_str(&text) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Status file is corrupt, using defaults");
                Ok(StatusMap::new())
            }
        }
    }

    fn set(&self, map: &StatusMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageState;
    use crate::pipeline::PipelineDefinition;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStatusRepository::new(dir.path().join("analysis_status.json"));
        assert!(repo.get().unwrap().is_empty());
    }

    #[test]
    fn test_reset_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStatusRepository::new(dir.path().join("analysis_status.json"));

        let map = repo.reset(&PipelineDefinition::Sequential).unwrap();
        let back = repo.get().unwrap();

        assert_eq!(back, map);
        assert_eq!(back.len(), 7);
        assert!(!repo.tmp_path().exists());
    }

    #[test]
    fn test_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStatusRepository::new(dir.path().join("analysis_status.json"));
        repo.reset(&PipelineDefinition::Mono).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(repo.path()).unwrap()).unwrap();
        assert_eq!(
            raw["mono_agent"],
            serde_json::json!({
                "state": "waiting",
                "attempts": 0,
                "start_time": null,
                "end_time": null
            })
        );
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis_status.json");
        fs::write(&path, "{not json").unwrap();
        let repo = JsonFileStatusRepository::new(&path);
        assert!(repo.get().unwrap().is_empty());
    }

    #[test]
    fn test_set_replaces_whole_map() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStatusRepository::new(dir.path().join("nested/status.json"));
        repo.reset(&PipelineDefinition::Sequential).unwrap();

        let mut small = PipelineDefinition::Mono.initial_status();
        small["raw_schema"].state = StageState::Done;
        repo.set(&small).unwrap();

        let back = repo.get().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back["raw_schema"].state, StageState::Done);
    }
}
