//! The status repository port.

use crate::errors::Result;
use crate::pipeline::PipelineDefinition;
use crate::status::StatusMap;

/// Storage for the full status map.
///
/// Implementations replace the whole map on every `set`; there is no partial
/// merge. A single writer per run is assumed.
#[cfg_attr(test, mockall::automock)]
pub trait StatusRepository: Send + Sync {
    /// Reads the full map. A missing store reads as an empty map.
    fn get(&self) -> Result<StatusMap>;

    /// Replaces the full map.
    fn set(&self, map: &StatusMap) -> Result<()>;

    /// Replaces the map with the initial records of `definition`.
    fn reset(&self, definition: &PipelineDefinition) -> Result<StatusMap> {
        let map = definition.initial_status();
        self.set(&map)?;
        Ok(map)
    }
}
