//! Persisted stage artifacts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::Result;
use crate::utils::{now_utc, Timestamp};

/// Describes one artifact write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReceipt {
    /// The artifact name (file stem).
    pub name: String,
    /// Where the artifact was written.
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the written bytes.
    pub sha256: String,
    /// Number of bytes written.
    pub bytes: usize,
    /// When the write completed.
    pub written_at: Timestamp,
}

/// A directory of JSON artifacts, one file per name.
///
/// Every write replaces the previous file wholesale. The bytes go to a
/// temporary sibling first and are renamed into place, so a reader never
/// observes a half-written artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path an artifact with this name is stored at.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Returns true if an artifact with this name exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Serializes `value` as pretty JSON and writes it under `name`.
    pub fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<ArtifactReceipt> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(name, &bytes)
    }

    fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<ArtifactReceipt> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(name);
        let tmp = self.root.join(format!(".{name}.json.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        let sha256 = hex::encode(Sha256::digest(bytes));
        debug!(artifact = %name, bytes = bytes.len(), sha256 = %sha256, "Artifact written");

        Ok(ArtifactReceipt {
            name: name.to_string(),
            path,
            sha256,
            bytes: bytes.len(),
            written_at: now_utc(),
        })
    }

    /// Reads and deserializes the artifact stored under `name`.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let bytes = fs::read(self.path_for(name))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads the artifact stored under `name` as an untyped JSON value.
    pub fn read_value(&self, name: &str) -> Result<serde_json::Value> {
        self.read(name)
    }
}
