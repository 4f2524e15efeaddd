//! crates/tutor_core/src/testing.rs
//!
//! Hand-written collaborator doubles. Always compiled, since the integration
//! tests and the api crate's router tests use them alongside `memory`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::domain::SessionCompletion;
use crate::ports::{
    PortError, PortResult, ProgressSink, Prompt, PromptKind, ReasoningService, RetrievalQuery,
    RetrievalService, RetrievedPassage,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reasoning double: queued responses per prompt kind, then a per-kind default.
/// A kind with nothing scripted fails, which drives callers onto their fallback.
#[derive(Default)]
pub struct ScriptedReasoning {
    queued: Mutex<HashMap<PromptKind, VecDeque<PortResult<String>>>>,
    defaults: Mutex<HashMap<PromptKind, String>>,
    seen: Mutex<Vec<Prompt>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: PromptKind, text: &str) -> &Self {
        lock(&self.queued).entry(kind).or_default().push_back(Ok(text.to_string()));
        self
    }

    pub fn push_error(&self, kind: PromptKind, message: &str) -> &Self {
        lock(&self.queued)
            .entry(kind)
            .or_default()
            .push_back(Err(PortError::Unexpected(message.to_string())));
        self
    }

    /// Answer every otherwise-unscripted prompt of `kind` with `text`.
    pub fn set_default(&self, kind: PromptKind, text: &str) -> &Self {
        lock(&self.defaults).insert(kind, text.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        lock(&self.seen).clone()
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        lock(&self.seen).iter().filter(|p| p.kind == kind).count()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn generate(&self, prompt: &Prompt) -> PortResult<String> {
        lock(&self.seen).push(prompt.clone());
        if let Some(next) = lock(&self.queued).get_mut(&prompt.kind).and_then(VecDeque::pop_front) {
            return next;
        }
        lock(&self.defaults)
            .get(&prompt.kind)
            .cloned()
            .ok_or_else(|| PortError::Unexpected(format!("nothing scripted for {}", prompt.kind.as_str())))
    }
}

/// Retrieval double returning a fixed passage list, whatever the tenant asked for.
#[derive(Default)]
pub struct StaticRetrieval {
    passages: Vec<RetrievedPassage>,
    fail: bool,
    queries: Mutex<Vec<RetrievalQuery>>,
}

impl StaticRetrieval {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self { passages, ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn queries(&self) -> Vec<RetrievalQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl RetrievalService for StaticRetrieval {
    async fn query(&self, query: &RetrievalQuery) -> PortResult<Vec<RetrievedPassage>> {
        lock(&self.queries).push(query.clone());
        if self.fail {
            return Err(PortError::Unexpected("retrieval index offline".into()));
        }
        Ok(self.passages.iter().take(query.top_k).cloned().collect())
    }
}

#[derive(Default)]
pub struct RecordingProgressSink {
    completions: Mutex<Vec<SessionCompletion>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> Vec<SessionCompletion> {
        lock(&self.completions).clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgressSink {
    async fn record_session_completion(&self, completion: &SessionCompletion) -> PortResult<()> {
        lock(&self.completions).push(completion.clone());
        Ok(())
    }
}
