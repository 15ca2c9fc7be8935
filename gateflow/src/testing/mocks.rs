//! Scripted generative models.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::pipeline::GenerativeModel;

/// One canned model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Raw output text.
    Text(String),
    /// A transport failure.
    Failure(String),
}

/// One recorded model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Stage asked.
    pub stage: String,
    /// Attempt number passed by the runner.
    pub attempt: u32,
    /// Feedback passed by the runner.
    pub feedback: Option<String>,
}

/// A model that replays queued replies per stage and records every call.
///
/// A stage with no queued reply left gets the fallback reply, if any, or a
/// transport failure.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    fallback: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    /// Creates a model with no replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a text reply for `stage`.
    #[must_use]
    pub fn reply(self, stage: &str, text: impl Into<String>) -> Self {
        self.push(stage, ScriptedReply::Text(text.into()));
        self
    }

    /// Queues a transport failure for `stage`.
    #[must_use]
    pub fn fail(self, stage: &str, error: impl Into<String>) -> Self {
        self.push(stage, ScriptedReply::Failure(error.into()));
        self
    }

    /// Answers `stage` with `text` whenever its queue is empty.
    #[must_use]
    pub fn always(self, stage: &str, text: impl Into<String>) -> Self {
        self.fallback.lock().insert(stage.to_string(), text.into());
        self
    }

    fn push(&self, stage: &str, reply: ScriptedReply) {
        self.replies
            .lock()
            .entry(stage.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls made for `stage`.
    #[must_use]
    pub fn calls_for(&self, stage: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage == stage)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(
        &self,
        stage: &str,
        attempt: u32,
        feedback: Option<&str>,
    ) -> anyhow::Result<String> {
        self.calls.lock().push(RecordedCall {
            stage: stage.to_string(),
            attempt,
            feedback: feedback.map(str::to_string),
        });

        let queued = self
            .replies
            .lock()
            .get_mut(stage)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Failure(error)) => Err(anyhow::anyhow!(error)),
            None => self
                .fallback
                .lock()
                .get(stage)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply for stage '{stage}'")),
        }
    }
}
