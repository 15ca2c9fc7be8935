//! In-memory status repository.

use parking_lot::Mutex;

use crate::errors::Result;
use crate::status::{StatusMap, StatusRepository};

/// Keeps the status map in memory. Used in tests and embedded runs.
#[derive(Debug, Default)]
pub struct InMemoryStatusRepository {
    map: Mutex<StatusMap>,
}

impl InMemoryStatusRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository holding `map`.
    #[must_use]
    pub fn with_map(map: StatusMap) -> Self {
        Self {
            map: Mutex::new(map),
        }
    }
}

impl StatusRepository for InMemoryStatusRepository {
    fn get(&self) -> Result<StatusMap> {
        Ok(self.map.lock().clone())
    }

    fn set(&self, map: &StatusMap) -> Result<()> {
        *self.map.lock() = map.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineDefinition;

    #[test]
    fn test_roundtrip() {
        let repo = InMemoryStatusRepository::new();
        assert!(repo.get().unwrap().is_empty());

        let map = repo.reset(&PipelineDefinition::Mono).unwrap();
        assert_eq!(repo.get().unwrap(), map);
    }
}
