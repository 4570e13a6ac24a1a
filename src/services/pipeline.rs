//! 画像合成管线
//!
//! Runs one flushed batch through extract → merge → organize →
//! re-summarize → commit → event, holding the user's lock throughout.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::MemoryConfig;
use crate::error::{AppError, Result};
use crate::llm::LlmService;
use crate::models::{Blob, ChangeSet, CommitSummary, ProfileConfig, UserEvent};
use crate::observability::AppMetrics;
use crate::services::event_pipeline::EventPipeline;
use crate::services::extractor::{Extractor, create_extractor};
use crate::services::merge::{MergeEngine, MergeInput};
use crate::services::organizer::Organizer;
use crate::services::profile_cache::ProfileCache;
use crate::services::summarizer::Resummarizer;
use crate::services::tokenizer::TokenCounter;
use crate::storage::Repositories;

type UserKey = (String, String);

/// What a successful batch did
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub summary: CommitSummary,
    pub changes: ChangeSet,
    pub event: Option<UserEvent>,
}

/// Held while a user's profile is being changed. Dropping it releases the
/// lock and forgets the lock entry once nobody else is waiting on it.
pub struct UserGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<UserKey, Arc<Mutex<()>>>,
    key: UserKey,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct ProfilePipeline {
    repos: Repositories,
    extractor: Arc<dyn Extractor>,
    merge: MergeEngine,
    organizer: Organizer,
    resummarizer: Resummarizer,
    events: EventPipeline,
    cache: Arc<ProfileCache>,
    memory: MemoryConfig,
    metrics: Arc<AppMetrics>,
    locks: DashMap<UserKey, Arc<Mutex<()>>>,
}

impl ProfilePipeline {
    pub fn new(
        repos: Repositories,
        llm: LlmService,
        tokens: Arc<dyn TokenCounter>,
        cache: Arc<ProfileCache>,
        memory: MemoryConfig,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        let extractor = create_extractor(llm.clone(), repos.profiles.clone());
        Self::with_extractor(repos, extractor, llm, tokens, cache, memory, metrics)
    }

    /// Same as [`ProfilePipeline::new`] with a caller-supplied extractor.
    pub fn with_extractor(
        repos: Repositories,
        extractor: Arc<dyn Extractor>,
        llm: LlmService,
        tokens: Arc<dyn TokenCounter>,
        cache: Arc<ProfileCache>,
        memory: MemoryConfig,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            events: EventPipeline::new(llm.clone(), repos.events.clone()),
            organizer: Organizer::new(llm.clone()),
            resummarizer: Resummarizer::new(llm, tokens),
            merge: MergeEngine::default(),
            extractor,
            repos,
            cache,
            memory,
            metrics,
            locks: DashMap::new(),
        }
    }

    /// Exclusive access to one user's profile for the guard's lifetime.
    pub async fn lock_user(&self, project_id: &str, user_id: &str) -> UserGuard<'_> {
        let key = (project_id.to_string(), user_id.to_string());
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        UserGuard {
            guard: Some(lock.lock_owned().await),
            locks: &self.locks,
            key,
        }
    }

    /// Effective profile config for a project
    pub async fn profile_config(&self, project_id: &str) -> ProfileConfig {
        let yaml = match self.repos.projects.get_profile_config(project_id).await {
            Ok(yaml) => yaml,
            Err(e) => {
                tracing::warn!("Could not load profile config for {}: {}", project_id, e);
                None
            }
        };
        ProfileConfig::resolve(&self.memory, yaml.as_deref())
    }

    pub fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn memory_config(&self) -> &MemoryConfig {
        &self.memory
    }

    /// Process a flushed batch. On failure nothing has been committed and
    /// the blobs are left in storage.
    pub async fn process_batch(
        &self,
        project_id: &str,
        user_id: &str,
        blob_ids: &[String],
        blobs: &[Blob],
    ) -> Result<BatchOutcome> {
        let guard = self.lock_user(project_id, user_id).await;
        let result = self.run(project_id, user_id, blob_ids, blobs).await;
        drop(guard);

        match &result {
            Ok(outcome) => self.metrics.record_batch(&outcome.summary),
            Err(e) => {
                self.metrics.record_batch_failure();
                tracing::error!(
                    "Batch of {} blobs failed for {}/{}: {}",
                    blob_ids.len(),
                    project_id,
                    user_id,
                    e
                );
            }
        }
        result
    }

    async fn run(
        &self,
        project_id: &str,
        user_id: &str,
        blob_ids: &[String],
        blobs: &[Blob],
    ) -> Result<BatchOutcome> {
        tracing::info!(
            "Processing batch of {} blobs for {}/{}",
            blobs.len(),
            project_id,
            user_id
        );
        let config = self.profile_config(project_id).await;
        let conversation = blobs
            .iter()
            .filter(|b| b.blob_type().is_profiled())
            .map(|b| b.data.render())
            .collect::<Vec<_>>()
            .join("\n\n");

        let facts = self
            .extractor
            .extract(project_id, user_id, &conversation, &config)
            .await?;

        let merged = self.merge.merge(MergeInput {
            fact_contents: &facts.fact_contents,
            fact_attributes: &facts.fact_attributes,
            profiles: &facts.profiles,
            config: &config,
            total_profiles: facts.total_profiles,
        })?;

        let mut changes = match self.organizer.organize(&merged, &facts.profiles, &config).await {
            Ok(organized) => organized,
            Err(e) => {
                self.metrics.record_stage_failure();
                tracing::warn!("Organize failed for {}/{}, committing unorganized: {}", project_id, user_id, e);
                merged
            }
        };

        match self.resummarizer.resummarize(&mut changes, &config).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Re-summarized {} entries for {}/{}", n, project_id, user_id),
            Err(e) => {
                self.metrics.record_stage_failure();
                tracing::warn!("Re-summarize failed for {}/{}: {}", project_id, user_id, e);
            }
        }

        let summary = if changes.is_empty() && changes.touched.is_empty() {
            CommitSummary::default()
        } else {
            let summary = self
                .repos
                .profiles
                .commit_change_set(project_id, user_id, &changes)
                .await
                .map_err(|e| match e {
                    AppError::Commit(_) => e,
                    other => AppError::Commit(other.to_string()),
                })?;
            self.cache.invalidate(project_id, user_id).await;
            summary
        };
        tracing::info!(
            "Committed for {}/{}: {} added, {} updated, {} deleted, {} touched",
            project_id,
            user_id,
            summary.added.len(),
            summary.updated,
            summary.deleted,
            summary.touched
        );

        let event = self
            .events
            .record(project_id, user_id, &conversation, &changes, &config)
            .await;
        if event.is_some() {
            self.metrics.record_event();
        }

        if !self.memory.persistent_chat_blobs && !blob_ids.is_empty() {
            if let Err(e) = self.repos.blobs.delete_blobs(project_id, user_id, blob_ids).await {
                tracing::warn!("Failed to delete processed blobs for {}/{}: {}", project_id, user_id, e);
            }
        }

        Ok(BatchOutcome {
            summary,
            changes,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmRequest};
    use crate::models::{ChatMessage, ProfileAttributes, ProfileEntry, ProfileRepository};
    use crate::services::extractor::ExtractedFacts;
    use crate::services::tokenizer::TiktokenCounter;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Failing;

    #[async_trait]
    impl Extractor for Failing {
        async fn extract(
            &self,
            _project_id: &str,
            _user_id: &str,
            _conversation: &str,
            _config: &ProfileConfig,
        ) -> Result<ExtractedFacts> {
            Err(AppError::Extraction("unparseable fact list".into()))
        }
    }

    /// Extractor that reads the real snapshot and returns fixed facts.
    struct Snapshotting {
        profiles: Arc<dyn ProfileRepository>,
        facts: Vec<(&'static str, &'static str, &'static str)>,
    }

    #[async_trait]
    impl Extractor for Snapshotting {
        async fn extract(
            &self,
            project_id: &str,
            user_id: &str,
            _conversation: &str,
            _config: &ProfileConfig,
        ) -> Result<ExtractedFacts> {
            let profiles = self.profiles.list_profiles(project_id, user_id).await?;
            Ok(ExtractedFacts {
                fact_contents: self.facts.iter().map(|(_, _, c)| c.to_string()).collect(),
                fact_attributes: self
                    .facts
                    .iter()
                    .map(|(t, s, _)| ProfileAttributes::new(t, s))
                    .collect(),
                total_profiles: profiles.len(),
                profiles,
            })
        }
    }

    struct Quiet;

    #[async_trait]
    impl LlmClient for Quiet {
        async fn complete(&self, _prompt: &str, _request: &LlmRequest) -> Result<String> {
            Ok("Mentioned a running habit".into())
        }
    }

    fn pipeline(repos: Repositories, extractor: Arc<dyn Extractor>) -> ProfilePipeline {
        ProfilePipeline::with_extractor(
            repos,
            extractor,
            LlmService::new(Arc::new(Quiet), Duration::from_secs(1)),
            Arc::new(TiktokenCounter::new().unwrap()),
            Arc::new(ProfileCache::new(Duration::from_secs(60))),
            MemoryConfig::default(),
            Arc::new(AppMetrics::default()),
        )
    }

    async fn stored_blob(repos: &Repositories, text: &str) -> Blob {
        let blob = Blob::chat("u1", "p1", vec![ChatMessage::user(text)]);
        repos.blobs.insert_blob(&blob).await.unwrap();
        blob
    }

    #[tokio::test]
    async fn test_batch_commits_and_records_event() {
        let repos = Repositories::in_memory();
        let extractor = Arc::new(Snapshotting {
            profiles: repos.profiles.clone(),
            facts: vec![("interest", "exercise", "runs 5k every morning")],
        });
        let pipeline = pipeline(repos.clone(), extractor);
        let blob = stored_blob(&repos, "I run 5k every morning").await;

        let outcome = pipeline
            .process_batch("p1", "u1", &[blob.id.clone()], &[blob.clone()])
            .await
            .unwrap();

        assert_eq!(outcome.summary.added.len(), 1);
        assert!(outcome.event.is_some());
        assert_eq!(repos.profiles.list_profiles("p1", "u1").await.unwrap().len(), 1);
        assert_eq!(repos.events.list_events("p1", "u1", 10).await.unwrap().len(), 1);
        assert!(repos.blobs.get_blob("p1", "u1", &blob.id).await.unwrap().is_none());
        assert!(pipeline.locks.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_fact_only_bumps_hits() {
        let repos = Repositories::in_memory();
        let existing = ProfileEntry::new(
            "u1",
            "p1",
            "runs 5k every morning",
            &ProfileAttributes::new("interest", "exercise"),
        );
        repos.profiles.insert_profile(&existing).await.unwrap();
        let extractor = Arc::new(Snapshotting {
            profiles: repos.profiles.clone(),
            facts: vec![("interest", "exercise", "runs 5k every morning")],
        });

        let outcome = pipeline(repos.clone(), extractor)
            .process_batch("p1", "u1", &[], &[])
            .await
            .unwrap();

        assert!(outcome.event.is_none());
        assert_eq!(outcome.summary.touched, 1);
        let profiles = repos.profiles.list_profiles("p1", "u1").await.unwrap();
        assert_eq!(profiles[0].update_hits, 2);
        assert!(repos.events.list_events("p1", "u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_failure_retains_blobs() {
        let repos = Repositories::in_memory();
        let pipeline = pipeline(repos.clone(), Arc::new(Failing));
        let blob = stored_blob(&repos, "hello").await;

        let err = pipeline
            .process_batch("p1", "u1", &[blob.id.clone()], &[blob.clone()])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Extraction(_)));
        assert!(repos.blobs.get_blob("p1", "u1", &blob.id).await.unwrap().is_some());
        assert!(repos.profiles.list_profiles("p1", "u1").await.unwrap().is_empty());
        assert_eq!(
            pipeline.metrics.batches_failed_total.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_empty_extraction_is_a_no_op() {
        let repos = Repositories::in_memory();
        let extractor = Arc::new(Snapshotting {
            profiles: repos.profiles.clone(),
            facts: vec![],
        });
        let outcome = pipeline(repos.clone(), extractor)
            .process_batch("p1", "u1", &[], &[])
            .await
            .unwrap();
        assert!(outcome.changes.is_empty());
        assert!(outcome.event.is_none());
    }
}
