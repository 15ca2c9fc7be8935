//! Deterministic script stages.

use std::path::PathBuf;

use crate::config::RunLayout;
use crate::errors::{GateflowError, Result};
use crate::pipeline::definition::{QUERY_ANALYSIS, RAW_SCHEMA};
use crate::{analyzer, metadata};

/// Runs the script stage `stage` and returns the path of its output.
///
/// Any failure is reported as [`GateflowError::Script`] naming the stage.
pub fn run_script(stage: &str, layout: &RunLayout) -> Result<PathBuf> {
    let outcome = match stage {
        RAW_SCHEMA => metadata::extract_and_save(layout),
        QUERY_ANALYSIS => analyzer::analyze_and_save(layout),
        other => return Err(GateflowError::UnknownStage(other.to_string())),
    };
    outcome.map_err(|err| match err {
        GateflowError::Script { .. } => err,
        other => GateflowError::script(stage, other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::BUSINESS_ANALYST;

    #[test]
    fn test_raw_schema_without_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_script(RAW_SCHEMA, &RunLayout::new(dir.path())).unwrap_err();
        assert!(matches!(err, GateflowError::Script { ref stage, .. } if stage == RAW_SCHEMA));
    }

    #[test]
    fn test_raw_schema_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path());
        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(layout.data_dir().join("t.csv"), "id,v\n1,2\n").unwrap();

        let path = run_script(RAW_SCHEMA, &layout).unwrap();
        assert!(path.starts_with(layout.scripts_dir()));
    }

    #[test]
    fn test_model_stage_is_not_a_script() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            run_script(BUSINESS_ANALYST, &RunLayout::new(dir.path())),
            Err(GateflowError::UnknownStage(_))
        ));
    }
}
