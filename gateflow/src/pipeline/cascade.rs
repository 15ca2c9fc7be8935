//! Forward failure cascading.

use tracing::info;

use crate::pipeline::PipelineDefinition;
use crate::status::StatusMap;
use crate::utils::Timestamp;

/// Marks every stage after `failed` as `Error`, except stages already done.
///
/// A stage that is not part of `definition` cascades over the whole
/// definition. Stages missing from `map` are inserted before being marked.
/// Returns the names of the stages that were changed.
pub fn cascade_failure(
    map: &mut StatusMap,
    failed: &str,
    definition: &PipelineDefinition,
    now: Timestamp,
) -> Vec<String> {
    let mut changed = Vec::new();
    for slot in definition.downstream_of(failed) {
        let record = map.entry(slot.name.to_string()).or_default();
        if record.cascade_error(now) {
            changed.push(slot.name.to_string());
        }
    }

    if !changed.is_empty() {
        info!(
            stage = %failed,
            pipeline = %definition,
            cascaded = ?changed,
            "Cascaded failure to downstream stages"
        );
    }
    changed
}
