//! Stage state and the persisted stage record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::Timestamp;

/// Maximum number of attempts a model stage gets (1 initial + 3 retries).
pub const MAX_ATTEMPTS: u32 = 4;

/// The lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Stage has not started.
    #[default]
    Waiting,
    /// Stage is running or awaiting a retry.
    InProgress,
    /// Stage completed successfully.
    Done,
    /// Stage failed terminally, or an upstream stage did.
    Error,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl StageState {
    /// Returns true if the state will not change again during this run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// The persisted record of one stage, keyed by stage name in the status map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Current state.
    pub state: StageState,
    /// Number of attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// When the stage last entered `InProgress`.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    /// When the stage finished.
    #[serde(default)]
    pub end_time: Option<Timestamp>,
}

impl Default for StageRecord {
    fn default() -> Self {
        Self::waiting()
    }
}

impl StageRecord {
    /// Creates the initial record every stage starts a run with.
    #[must_use]
    pub fn waiting() -> Self {
        Self {
            state: StageState::Waiting,
            attempts: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// Applies a state transition.
    ///
    /// Entering `InProgress` from any other state counts an attempt, stamps
    /// `start_time` and clears `end_time`. Entering `Done` from any other
    /// state stamps `end_time`. Repeating the current state never moves a
    /// timestamp that is already set.
    pub fn transition(&mut self, state: StageState, now: Timestamp) {
        match state {
            StageState::InProgress => {
                if self.state != StageState::InProgress {
                    self.attempts = (self.attempts + 1).min(MAX_ATTEMPTS);
                    self.start_time = Some(now);
                    self.end_time = None;
                } else if self.start_time.is_none() {
                    self.start_time = Some(now);
                }
            }
            StageState::Done => {
                if self.state != StageState::Done {
                    self.end_time = Some(now);
                }
            }
            StageState::Waiting | StageState::Error => {}
        }
        self.state = state;
    }

    /// Counts one more attempt unless the cap is reached.
    ///
    /// Returns true if the counter moved.
    pub fn increment_attempts(&mut self) -> bool {
        if self.attempts >= MAX_ATTEMPTS {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Marks the record as failed because an upstream stage failed.
    ///
    /// Returns false (and leaves the record untouched) for `Done` stages.
    pub fn cascade_error(&mut self, now: Timestamp) -> bool {
        if self.state == StageState::Done {
            return false;
        }
        self.state = StageState::Error;
        self.end_time = self.start_time.map(|_| now);
        true
    }

    /// Attempts clamped for display.
    #[must_use]
    pub fn display_attempts(&self) -> u32 {
        self.attempts.min(MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_stage_state_display() {
        assert_eq!(StageState::Waiting.to_string(), "waiting");
        assert_eq!(StageState::InProgress.to_string(), "in_progress");
        assert_eq!(StageState::Done.to_string(), "done");
        assert_eq!(StageState::Error.to_string(), "error");
    }

    #[test]
    fn test_stage_state_serialize() {
        let json = serde_json::to_string(&StageState::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);

        let state: StageState = serde_json::from_str(r#""error""#).unwrap();
        assert_eq!(state, StageState::Error);
    }

    #[test]
    fn test_entering_in_progress_counts_attempt() {
        let mut record = StageRecord::waiting();
        let now = Utc::now();
        record.transition(StageState::InProgress, now);

        assert_eq!(record.attempts, 1);
        assert_eq!(record.start_time, Some(now));
        assert!(record.end_time.is_none());

        // Re-entering the same state is not a new attempt.
        record.transition(StageState::InProgress, now + Duration::seconds(5));
        assert_eq!(record.attempts, 1);
        assert_eq!(record.start_time, Some(now));
    }

    #[test]
    fn test_done_end_time_set_once() {
        let mut record = StageRecord::waiting();
        let start = Utc::now();
        record.transition(StageState::InProgress, start);
        let done_at = start + Duration::seconds(3);
        record.transition(StageState::Done, done_at);
        record.transition(StageState::Done, done_at + Duration::seconds(10));

        assert_eq!(record.start_time, Some(start));
        assert_eq!(record.end_time, Some(done_at));
    }

    #[test]
    fn test_increment_attempts_caps() {
        let mut record = StageRecord::waiting();
        for _ in 0..10 {
            record.increment_attempts();
        }
        assert_eq!(record.attempts, MAX_ATTEMPTS);
        assert!(!record.increment_attempts());
    }

    #[test]
    fn test_cascade_error_skips_done() {
        let now = Utc::now();
        let mut done = StageRecord::waiting();
        done.transition(StageState::InProgress, now);
        done.transition(StageState::Done, now);
        assert!(!done.cascade_error(now));
        assert_eq!(done.state, StageState::Done);

        let mut waiting = StageRecord::waiting();
        assert!(waiting.cascade_error(now));
        assert_eq!(waiting.state, StageState::Error);
        assert!(waiting.end_time.is_none());

        let mut running = StageRecord::waiting();
        running.transition(StageState::InProgress, now);
        assert!(running.cascade_error(now));
        assert_eq!(running.end_time, Some(now));
    }
}
