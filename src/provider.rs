//! Host integration seams.
//!
//! The pipeline itself never talks to a model service or a settings screen;
//! hosts plug those in through these traits. Futures here are `?Send` because
//! materialized element trees are single-threaded by construction.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;

use crate::error::{PipelineError, PipelineResult};

/// A raw model response, before file extraction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompletionResponse {
    pub content: String,
}

/// Produces UI-generation responses for a prompt.
#[async_trait(?Send)]
pub trait CompletionProvider {
    async fn complete(&self, prompt: &str) -> PipelineResult<CompletionResponse>;
}

/// Receives user-facing notifications from the host.
#[async_trait(?Send)]
pub trait AlertSink {
    async fn alert(&self, title: &str, message: &str);
}

/// Key/value persistence for host configuration.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

/// In-memory settings, for hosts without persistence and for tests.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: HashMap<String, String>,
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}

/// Serves pre-recorded responses in order. Used to exercise the pipeline
/// without a live model service.
#[derive(Debug, Default)]
pub struct CannedCompletionProvider {
    responses: RefCell<VecDeque<String>>,
}

impl CannedCompletionProvider {
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        CannedCompletionProvider {
            responses: RefCell::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait(?Send)]
impl CompletionProvider for CannedCompletionProvider {
    async fn complete(&self, _prompt: &str) -> PipelineResult<CompletionResponse> {
        self.responses
            .borrow_mut()
            .pop_front()
            .map(|content| CompletionResponse { content })
            .ok_or_else(|| PipelineError::Engine("no canned response left".to_string()))
    }
}
