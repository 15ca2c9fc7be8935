//! Stage status transitions on top of a repository.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{StageRecord, StageState, MAX_ATTEMPTS};
use crate::errors::Result;
use crate::pipeline::{cascade_failure, PipelineDefinition};
use crate::status::{StatusMap, StatusRepository};
use crate::utils::now_utc;

/// Applies stage transitions as full read-modify-write cycles on a
/// [`StatusRepository`].
///
/// The internal lock serializes writers sharing this store. Writers in other
/// processes are not coordinated.
pub struct StageStatusStore {
    repository: Arc<dyn StatusRepository>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for StageStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageStatusStore").finish_non_exhaustive()
    }
}

impl StageStatusStore {
    /// Creates a store over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn StatusRepository>) -> Self {
        Self {
            repository,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying repository.
    #[must_use]
    pub fn repository(&self) -> Arc<dyn StatusRepository> {
        Arc::clone(&self.repository)
    }

    fn modify<T>(&self, f: impl FnOnce(&mut StatusMap) -> T) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut map = self.repository.get()?;
        let out = f(&mut map);
        self.repository.set(&map)?;
        Ok(out)
    }

    /// Resets every stage of `definition` to waiting.
    pub fn reset(&self, definition: &PipelineDefinition) -> Result<StatusMap> {
        let _guard = self.write_lock.lock();
        info!(pipeline = %definition, "Resetting stage status");
        self.repository.reset(definition)
    }

    /// Returns the full status map.
    pub fn snapshot(&self) -> Result<StatusMap> {
        self.repository.get()
    }

    /// Returns the record of `stage`, or a waiting record if it has none.
    pub fn get(&self, stage: &str) -> Result<StageRecord> {
        Ok(self.repository.get()?.get(stage).cloned().unwrap_or_default())
    }

    /// Moves `stage` to `state`.
    pub fn update(&self, stage: &str, state: StageState) -> Result<StageRecord> {
        let record = self.modify(|map| {
            let record = map.entry(stage.to_string()).or_default();
            record.transition(state, now_utc());
            record.clone()
        })?;
        debug!(stage = %stage, state = %state, attempt = record.attempts, "Stage status updated");
        Ok(record)
    }

    /// Counts one more attempt for `stage`; a no-op at [`MAX_ATTEMPTS`].
    pub fn increment_attempts(&self, stage: &str) -> Result<u32> {
        let attempts = self.modify(|map| {
            let record = map.entry(stage.to_string()).or_default();
            record.increment_attempts();
            record.attempts
        })?;
        debug!(stage = %stage, attempt = attempts, max = MAX_ATTEMPTS, "Attempt recorded");
        Ok(attempts)
    }

    /// Returns the number of attempts recorded for `stage`.
    pub fn get_attempts(&self, stage: &str) -> Result<u32> {
        Ok(self.get(stage)?.attempts)
    }

    /// Marks `failed` as `Error` and cascades to every later stage.
    ///
    /// Returns the names of the downstream stages that changed.
    pub fn fail_and_cascade(
        &self,
        failed: &str,
        definition: &PipelineDefinition,
    ) -> Result<Vec<String>> {
        self.modify(|map| {
            let now = now_utc();
            map.entry(failed.to_string())
                .or_default()
                .transition(StageState::Error, now);
            cascade_failure(map, failed, definition, now)
        })
    }

    /// Cascades a failure of `failed` without touching `failed` itself.
    pub fn cascade(&self, failed: &str, definition: &PipelineDefinition) -> Result<Vec<String>> {
        self.modify(|map| cascade_failure(map, failed, definition, now_utc()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GateflowError;
    use crate::pipeline::definition::*;
    use crate::status::{InMemoryStatusRepository, MockStatusRepository};

    fn store() -> StageStatusStore {
        let store = StageStatusStore::new(Arc::new(InMemoryStatusRepository::new()));
        store.reset(&PipelineDefinition::Sequential).unwrap();
        store
    }

    #[test]
    fn test_update_in_progress_counts_attempt() {
        let store = store();
        let record = store.update(SCHEMA_INTERPRETER, StageState::InProgress).unwrap();
        assert_eq!(record.attempts, 1);
        assert!(record.start_time.is_some());
        assert_eq!(store.get_attempts(SCHEMA_INTERPRETER).unwrap(), 1);
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let store = store();
        store.update(QUERY_BUILDER, StageState::InProgress).unwrap();
        let mut last = 0;
        for _ in 0..10 {
            let now = store.increment_attempts(QUERY_BUILDER).unwrap();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, MAX_ATTEMPTS);
    }

    #[test]
    fn test_done_timestamps_fixed() {
        let store = store();
        store.update(RAW_SCHEMA, StageState::InProgress).unwrap();
        let first = store.update(RAW_SCHEMA, StageState::Done).unwrap();
        let second = store.update(RAW_SCHEMA, StageState::Done).unwrap();
        assert_eq!(first.start_time, second.start_time);
        assert_eq!(first.end_time, second.end_time);
        assert!(first.end_time.is_some());
    }

    #[test]
    fn test_unknown_stage_gets_default_record() {
        let store = store();
        assert_eq!(store.get_attempts("ad_hoc").unwrap(), 0);
        store.update("ad_hoc", StageState::InProgress).unwrap();
        assert_eq!(store.get_attempts("ad_hoc").unwrap(), 1);
    }

    #[test]
    fn test_fail_and_cascade() {
        let store = store();
        store.update(RAW_SCHEMA, StageState::InProgress).unwrap();
        store.update(RAW_SCHEMA, StageState::Done).unwrap();
        store.update(SCHEMA_INTERPRETER, StageState::InProgress).unwrap();

        let cascaded = store
            .fail_and_cascade(SCHEMA_INTERPRETER, &PipelineDefinition::Sequential)
            .unwrap();

        assert_eq!(cascaded.len(), 5);
        let map = store.snapshot().unwrap();
        assert_eq!(map[RAW_SCHEMA].state, StageState::Done);
        assert_eq!(map[SCHEMA_INTERPRETER].state, StageState::Error);
        assert_eq!(map[CONFIDENTIALITY_TESTER].state, StageState::Error);
    }

    #[test]
    fn test_repository_failure_propagates() {
        let mut repo = MockStatusRepository::new();
        repo.expect_get()
            .returning(|| Err(GateflowError::Status("disk gone".to_string())));
        let store = StageStatusStore::new(Arc::new(repo));

        let err = store.update(RAW_SCHEMA, StageState::InProgress).unwrap_err();
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_write_failure_propagates() {
        let mut repo = MockStatusRepository::new();
        repo.expect_get().returning(|| Ok(StatusMap::new()));
        repo.expect_set()
            .times(1)
            .returning(|_| Err(GateflowError::Status("read-only".to_string())));
        let store = StageStatusStore::new(Arc::new(repo));

        assert!(store.increment_attempts(QUERY_BUILDER).is_err());
    }
}
