//! The bounded retry decision shared by every gate.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::MAX_ATTEMPTS;
use crate::errors::Result;
use crate::pipeline::PipelineDefinition;
use crate::status::StageStatusStore;

/// Outcome of a failed gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDecision {
    /// The caller should invoke the model again.
    Retry {
        /// Attempts recorded after this failure, capped at [`MAX_ATTEMPTS`].
        attempt: u32,
    },
    /// The attempt budget is spent; the stage is `Error` and downstream
    /// stages were cascaded.
    Exhausted {
        /// Attempts recorded for the stage.
        attempts: u32,
        /// Downstream stages marked `Error`.
        cascaded: Vec<String>,
    },
}

impl RetryDecision {
    /// Returns true for a terminal decision.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Decides between retrying and failing `stage` for good.
///
/// The recorded attempts are checked before anything is incremented: a stage
/// already at [`MAX_ATTEMPTS`] fails terminally, otherwise one more attempt
/// is recorded.
pub fn decide_retry(
    store: &StageStatusStore,
    stage: &str,
    definition: &PipelineDefinition,
) -> Result<RetryDecision> {
    let attempts = store.get_attempts(stage)?;
    if attempts >= MAX_ATTEMPTS {
        let cascaded = store.fail_and_cascade(stage, definition)?;
        warn!(stage = %stage, attempt = attempts, "Attempt budget exhausted, stage failed");
        return Ok(RetryDecision::Exhausted { attempts, cascaded });
    }

    let attempt = store.increment_attempts(stage)?.min(MAX_ATTEMPTS);
    info!(stage = %stage, attempt, max = MAX_ATTEMPTS, "Stage will be retried");
    Ok(RetryDecision::Retry { attempt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageState;
    use crate::pipeline::definition::*;
    use crate::status::InMemoryStatusRepository;
    use std::sync::Arc;

    fn store_with_attempts(stage: &str, attempts: u32) -> StageStatusStore {
        let store = StageStatusStore::new(Arc::new(InMemoryStatusRepository::new()));
        store.reset(&PipelineDefinition::Sequential).unwrap();
        store.update(stage, StageState::InProgress).unwrap();
        for _ in 1..attempts {
            store.increment_attempts(stage).unwrap();
        }
        store
    }

    #[test]
    fn test_retry_below_cap() {
        let store = store_with_attempts(BUSINESS_ANALYST, 3);
        let decision = decide_retry(&store, BUSINESS_ANALYST, &PipelineDefinition::Sequential).unwrap();

        assert_eq!(decision, RetryDecision::Retry { attempt: 4 });
        let record = store.get(BUSINESS_ANALYST).unwrap();
        assert_eq!(record.attempts, 4);
        assert_eq!(record.state, StageState::InProgress);
    }

    #[test]
    fn test_exhausted_at_cap() {
        let store = store_with_attempts(BUSINESS_ANALYST, 4);
        let decision = decide_retry(&store, BUSINESS_ANALYST, &PipelineDefinition::Sequential).unwrap();

        assert!(decision.is_exhausted());
        let map = store.snapshot().unwrap();
        assert_eq!(map[BUSINESS_ANALYST].state, StageState::Error);
        assert_eq!(map[BUSINESS_ANALYST].attempts, 4);
        assert_eq!(map[QUERY_BUILDER].state, StageState::Error);
        assert_eq!(map[CONFIDENTIALITY_TESTER].state, StageState::Error);
        assert_eq!(map[SCHEMA_INTERPRETER].state, StageState::Waiting);
    }

    #[test]
    fn test_full_budget_sequence() {
        let store = store_with_attempts(QUERY_BUILDER, 1);
        let def = PipelineDefinition::Sequential;
        let mut decisions = Vec::new();
        for _ in 0..4 {
            decisions.push(decide_retry(&store, QUERY_BUILDER, &def).unwrap());
        }
        assert_eq!(decisions[0], RetryDecision::Retry { attempt: 2 });
        assert_eq!(decisions[2], RetryDecision::Retry { attempt: 4 });
        assert!(decisions[3].is_exhausted());
    }
}
