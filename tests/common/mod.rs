//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use memoria::config::MemoryConfig;
use memoria::error::{AppError, Result};
use memoria::llm::prompts::{
    EVENT_SUMMARY_TASK, EVENT_TAG_TASK, EXTRACT_TASK, ORGANIZE_TASK, RESUMMARIZE_TASK,
};
use memoria::llm::{LlmClient, LlmRequest, LlmService};
use memoria::observability::AppMetrics;
use memoria::services::{MemoryService, ProfilePipeline, ProfileCache, TiktokenCounter};
use memoria::storage::Repositories;

/// LLM double that answers by task marker. Extraction replies are consumed
/// in order; the last one repeats.
pub struct ScriptedLlm {
    extract: Mutex<VecDeque<String>>,
    organize: String,
    resummarize: String,
    event_tip: String,
    tags: String,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self {
            extract: Mutex::new(VecDeque::from([r#"{"facts": []}"#.to_string()])),
            organize: String::new(),
            resummarize: String::new(),
            event_tip: "The user shared something about themselves".into(),
            tags: "- topic::personal".into(),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl ScriptedLlm {
    pub fn extracting(replies: &[&str]) -> Self {
        Self {
            extract: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn organize_with(mut self, reply: &str) -> Self {
        self.organize = reply.into();
        self
    }

    pub fn resummarize_with(mut self, reply: &str) -> Self {
        self.resummarize = reply.into();
        self
    }

    pub fn calls(&self, task: &'static str) -> usize {
        self.calls.lock().get(task).copied().unwrap_or(0)
    }

    fn count(&self, task: &'static str) {
        *self.calls.lock().entry(task).or_default() += 1;
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, _request: &LlmRequest) -> Result<String> {
        let task = [EXTRACT_TASK, ORGANIZE_TASK, RESUMMARIZE_TASK, EVENT_SUMMARY_TASK, EVENT_TAG_TASK]
            .into_iter()
            .find(|t| prompt.starts_with(t))
            .ok_or_else(|| AppError::Llm(format!("unexpected prompt: {}", prompt)))?;
        self.count(task);

        let reply = match task {
            EXTRACT_TASK => {
                let mut queue = self.extract.lock();
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                }
            }
            ORGANIZE_TASK => self.organize.clone(),
            RESUMMARIZE_TASK => self.resummarize.clone(),
            EVENT_SUMMARY_TASK => self.event_tip.clone(),
            _ => self.tags.clone(),
        };
        Ok(reply)
    }
}

pub fn fact(topic: &str, sub_topic: &str, content: &str) -> String {
    serde_json::json!({"facts": [{"topic": topic, "sub_topic": sub_topic, "content": content}]}).to_string()
}

pub struct Harness {
    pub service: Arc<MemoryService>,
    pub pipeline: Arc<ProfilePipeline>,
    pub repos: Repositories,
    pub llm: Arc<ScriptedLlm>,
}

pub fn harness(llm: ScriptedLlm, memory: MemoryConfig) -> Harness {
    let repos = Repositories::in_memory();
    let llm = Arc::new(llm);
    let tokens = Arc::new(TiktokenCounter::new().unwrap());
    let metrics = Arc::new(AppMetrics::default());
    let pipeline = Arc::new(ProfilePipeline::new(
        repos.clone(),
        LlmService::new(llm.clone(), Duration::from_secs(5)),
        tokens.clone(),
        Arc::new(ProfileCache::new(Duration::from_secs(memory.cache_user_profiles_ttl))),
        memory.clone(),
        metrics.clone(),
    ));
    let service = Arc::new(MemoryService::with_pipeline(
        repos.clone(),
        pipeline.clone(),
        tokens,
        memory,
        metrics,
    ));
    Harness {
        service,
        pipeline,
        repos,
        llm,
    }
}
