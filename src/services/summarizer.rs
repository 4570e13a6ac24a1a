//! 超长条目重写
//!
//! Shortens added/updated content that exceeds `max_pre_profile_token_size`.

use futures_util::future::join_all;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::llm::{LlmRequest, LlmService, prompts};
use crate::models::{ChangeSet, Language, ProfileAttributes, ProfileConfig};
use crate::services::tokenizer::TokenCounter;

#[derive(Clone, Copy)]
enum Target {
    Add(usize),
    Update(usize),
}

pub struct Resummarizer {
    llm: LlmService,
    tokens: Arc<dyn TokenCounter>,
}

impl Resummarizer {
    pub fn new(llm: LlmService, tokens: Arc<dyn TokenCounter>) -> Self {
        Self { llm, tokens }
    }

    /// Rewrites oversized items in place and returns how many were
    /// shortened. Items whose summary failed keep their content and the
    /// call reports a `Resummarize` error after applying the rest.
    pub async fn resummarize(&self, changes: &mut ChangeSet, config: &ProfileConfig) -> Result<usize> {
        let limit = config.max_pre_profile_token_size;

        let mut targets: Vec<(Target, ProfileAttributes, String)> = Vec::new();
        for (i, add) in changes.add.iter().enumerate() {
            if self.tokens.count_tokens(&add.content) > limit {
                targets.push((Target::Add(i), add.attributes.clone(), add.content.clone()));
            }
        }
        for (i, update) in changes.update.iter().enumerate() {
            if self.tokens.count_tokens(&update.content) > limit {
                targets.push((Target::Update(i), update.attributes.clone(), update.content.clone()));
            }
        }
        if targets.is_empty() {
            return Ok(0);
        }
        tracing::info!("Re-summarizing {} oversized profile entries", targets.len());

        let results = join_all(
            targets
                .iter()
                .map(|(_, attrs, content)| self.summarize_one(attrs, content, limit, config.language)),
        )
        .await;

        let mut failures = Vec::new();
        let mut shortened = 0;
        for ((target, attrs, _), result) in targets.into_iter().zip(results) {
            match result {
                Ok(summary) => {
                    shortened += 1;
                    match target {
                        Target::Add(i) => changes.add[i].content = summary,
                        Target::Update(i) => changes.update[i].content = summary,
                    }
                }
                Err(e) => failures.push(format!("{}/{}: {}", attrs.topic, attrs.sub_topic, e)),
            }
        }

        if failures.is_empty() {
            Ok(shortened)
        } else {
            Err(AppError::Resummarize(failures.join("; ")))
        }
    }

    async fn summarize_one(
        &self,
        attrs: &ProfileAttributes,
        content: &str,
        limit: usize,
        language: Language,
    ) -> Result<String> {
        let prompt = prompts::resummarize(&attrs.topic, &attrs.sub_topic, content, limit, language);
        let request = LlmRequest::with_system(prompt.system)
            .max_tokens(u32::try_from(limit.saturating_mul(2)).unwrap_or(u32::MAX));
        let reply = self.llm.complete(&prompt.user, &request).await?;

        let summary = reply.trim();
        if summary.is_empty() {
            return Err(AppError::Resummarize("empty summary".into()));
        }
        if self.tokens.count_tokens(summary) > limit {
            return Ok(self.tokens.truncate(summary, limit));
        }
        Ok(summary.to_string())
    }
}
