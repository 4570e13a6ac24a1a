//! 事实抽取
//!
//! Turns a flushed batch of conversation into candidate profile facts and
//! snapshots the current profile for the merge step.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::llm::{LlmRequest, LlmService, prompts};
use crate::models::{ProfileAttributes, ProfileConfig, ProfileEntry, ProfileRepository};

/// Candidate facts plus the snapshot they will be merged into
#[derive(Debug, Clone, Default)]
pub struct ExtractedFacts {
    pub fact_contents: Vec<String>,
    pub fact_attributes: Vec<ProfileAttributes>,
    pub profiles: Vec<ProfileEntry>,
    pub total_profiles: usize,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        project_id: &str,
        user_id: &str,
        conversation: &str,
        config: &ProfileConfig,
    ) -> Result<ExtractedFacts>;
}

#[derive(Debug, Deserialize)]
struct RawFact {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    sub_topic: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawFacts {
    #[serde(default)]
    facts: Vec<RawFact>,
}

/// Strip markdown fences and surrounding chatter from a JSON reply.
fn json_body(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parse an extraction reply into parallel content / attribute lists.
pub fn parse_facts(reply: &str) -> Result<(Vec<String>, Vec<ProfileAttributes>)> {
    let parsed: RawFacts = serde_json::from_str(json_body(reply))
        .map_err(|e| AppError::Extraction(format!("unparseable fact list: {}", e)))?;

    Ok(parsed
        .facts
        .into_iter()
        .map(|f| {
            (
                f.content.trim().to_string(),
                ProfileAttributes::new(&f.topic, &f.sub_topic),
            )
        })
        .unzip())
}

pub struct LlmExtractor {
    llm: LlmService,
    profiles: Arc<dyn ProfileRepository>,
}

impl LlmExtractor {
    pub fn new(llm: LlmService, profiles: Arc<dyn ProfileRepository>) -> Self {
        Self { llm, profiles }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        project_id: &str,
        user_id: &str,
        conversation: &str,
        config: &ProfileConfig,
    ) -> Result<ExtractedFacts> {
        let profiles = self.profiles.list_profiles(project_id, user_id).await?;

        let prompt = prompts::extract(config, &profiles, conversation);
        let reply = self
            .llm
            .complete(&prompt.user, &LlmRequest::with_system(prompt.system).json())
            .await
            .map_err(|e| AppError::Extraction(e.to_string()))?;

        let (fact_contents, fact_attributes) = parse_facts(&reply)?;
        tracing::debug!(
            "Extracted {} candidate facts for {}/{}",
            fact_contents.len(),
            project_id,
            user_id
        );

        Ok(ExtractedFacts {
            fact_contents,
            fact_attributes,
            total_profiles: profiles.len(),
            profiles,
        })
    }
}

pub fn create_extractor(llm: LlmService, profiles: Arc<dyn ProfileRepository>) -> Arc<dyn Extractor> {
    Arc::new(LlmExtractor::new(llm, profiles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::storage::InMemoryStore;
    use std::time::Duration;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"facts\": [{\"topic\": \"Interest\", \"sub_topic\": \"Running Habit\", \"content\": \" runs 5k \"}]}\n```";
        let (contents, attrs) = parse_facts(reply).unwrap();
        assert_eq!(contents, vec!["runs 5k"]);
        assert_eq!(attrs[0], ProfileAttributes::new("interest", "running_habit"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_facts("I could not find anything"), Err(AppError::Extraction(_))));
        assert!(matches!(parse_facts("{\"facts\": 3}"), Err(AppError::Extraction(_))));
        let (contents, _) = parse_facts("{\"facts\": []}").unwrap();
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn test_llm_failure_is_extraction_error() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_, _| Err(AppError::Llm("quota exceeded".into())));
        let llm = LlmService::new(Arc::new(mock), Duration::from_secs(1));
        let extractor = LlmExtractor::new(llm, Arc::new(InMemoryStore::new()));

        let err = extractor
            .extract("p1", "u1", "user: hi", &ProfileConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_snapshot_included() {
        let store = Arc::new(InMemoryStore::new());
        let existing = ProfileEntry::new("u1", "p1", "Gus", &ProfileAttributes::new("basic_info", "name"));
        store.insert_profile(&existing).await.unwrap();

        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{"facts": [{"topic": "work", "sub_topic": "title", "content": "engineer"}]}"#.into())
        });
        let llm = LlmService::new(Arc::new(mock), Duration::from_secs(1));
        let extractor = LlmExtractor::new(llm, store);

        let facts = extractor
            .extract("p1", "u1", "user: I'm an engineer", &ProfileConfig::default())
            .await
            .unwrap();
        assert_eq!(facts.total_profiles, 1);
        assert_eq!(facts.profiles[0].id, existing.id);
        assert_eq!(facts.fact_contents, vec!["engineer"]);
    }
}
