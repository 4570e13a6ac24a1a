//! 记忆服务
//!
//! Facade used by the HTTP layer: blob intake and buffering, flushing,
//! manual profile edits, events, context assembly and project config.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::MemoryConfig;
use crate::error::{AppError, Result};
use crate::llm::LlmService;
use crate::models::{
    Blob, BlobData, BlobType, ProfileAttributes, ProfileConfig, ProfileEntry, ProfileUpdate,
    UserEvent,
};
use crate::observability::AppMetrics;
use crate::services::blob_buffer::{BlobBuffer, BufferKey};
use crate::services::context::{ContextAssembler, ContextRequest, ProfileQuery};
use crate::services::pipeline::{BatchOutcome, ProfilePipeline};
use crate::services::profile_cache::ProfileCache;
use crate::services::scheduler::PipelineScheduler;
use crate::services::tokenizer::TokenCounter;
use crate::storage::Repositories;

pub struct MemoryService {
    repos: Repositories,
    pipeline: Arc<ProfilePipeline>,
    scheduler: PipelineScheduler,
    buffer: Arc<BlobBuffer>,
    assembler: ContextAssembler,
    cache: Arc<ProfileCache>,
    tokens: Arc<dyn TokenCounter>,
    memory: MemoryConfig,
    metrics: Arc<AppMetrics>,
}

impl MemoryService {
    pub fn new(
        repos: Repositories,
        llm: LlmService,
        tokens: Arc<dyn TokenCounter>,
        memory: MemoryConfig,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        let cache = Arc::new(ProfileCache::new(Duration::from_secs(memory.cache_user_profiles_ttl)));
        let pipeline = Arc::new(ProfilePipeline::new(
            repos.clone(),
            llm,
            tokens.clone(),
            cache.clone(),
            memory.clone(),
            metrics.clone(),
        ));
        Self::with_pipeline(repos, pipeline, tokens, memory, metrics)
    }

    /// Build around an existing pipeline, sharing its read cache.
    pub fn with_pipeline(
        repos: Repositories,
        pipeline: Arc<ProfilePipeline>,
        tokens: Arc<dyn TokenCounter>,
        memory: MemoryConfig,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        let cache = pipeline.cache().clone();
        let buffer = Arc::new(BlobBuffer::new(
            memory.max_chat_blob_buffer_token_size,
            Duration::from_secs(memory.buffer_flush_interval),
        ));
        Self {
            scheduler: PipelineScheduler::new(
                pipeline.clone(),
                buffer.clone(),
                Duration::from_secs(memory.worker_idle_timeout),
            ),
            buffer,
            assembler: ContextAssembler::new(
                repos.profiles.clone(),
                repos.events.clone(),
                cache.clone(),
                tokens.clone(),
                memory.max_context_events,
            ),
            repos,
            pipeline,
            cache,
            tokens,
            memory,
            metrics,
        }
    }

    pub fn scheduler(&self) -> &PipelineScheduler {
        &self.scheduler
    }

    // ---- blobs ----

    /// Store a blob and, for chat, add it to the user's buffer. Returns the
    /// blob id; any processing it triggers happens in the background.
    pub async fn insert_blob(
        &self,
        project_id: &str,
        user_id: &str,
        data: BlobData,
        fields: Option<serde_json::Value>,
    ) -> Result<String> {
        data.validate()?;
        let mut blob = Blob::new(user_id, project_id, data);
        blob.fields = fields;
        self.repos.blobs.insert_blob(&blob).await?;
        self.metrics.record_blob_inserted();

        let id = blob.id.clone();
        if blob.blob_type().is_profiled() {
            let tokens = self.tokens.count_tokens(&blob.data.render());
            if let Some(batch) = self.buffer.push(blob, tokens) {
                self.scheduler.submit(batch);
            }
        }
        Ok(id)
    }

    pub async fn get_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<Blob> {
        self.repos
            .blobs
            .get_blob(project_id, user_id, blob_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("blob {}", blob_id)))
    }

    pub async fn delete_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<()> {
        if !self.repos.blobs.delete_blob(project_id, user_id, blob_id).await? {
            return Err(AppError::NotFound(format!("blob {}", blob_id)));
        }
        Ok(())
    }

    pub async fn list_blobs(
        &self,
        project_id: &str,
        user_id: &str,
        blob_type: BlobType,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        self.repos
            .blobs
            .list_blob_ids(project_id, user_id, blob_type, page, page_size)
            .await
    }

    // ---- buffering ----

    /// Flush one buffer. With `sync` the batch outcome is awaited; otherwise
    /// the batch is queued and `None` is returned. A failed batch goes back
    /// to the buffer, so flushing again redrives it.
    pub async fn flush(
        &self,
        project_id: &str,
        user_id: &str,
        blob_type: BlobType,
        sync: bool,
    ) -> Result<Option<BatchOutcome>> {
        if !blob_type.is_profiled() {
            return Ok(None);
        }
        let Some(batch) = self.buffer.take(&BufferKey::new(project_id, user_id, blob_type)) else {
            return Ok(None);
        };
        tracing::info!(
            "Flushing {} buffered blobs for {}/{}",
            batch.blob_ids.len(),
            project_id,
            user_id
        );
        if sync {
            self.scheduler.submit_and_wait(batch).await.map(Some)
        } else {
            self.scheduler.submit(batch);
            Ok(None)
        }
    }

    /// Queue every buffer whose flush interval has elapsed.
    pub fn flush_due(&self, now: Instant) -> usize {
        let mut flushed = 0;
        for key in self.buffer.due_keys(now) {
            if let Some(batch) = self.buffer.take(&key) {
                self.scheduler.submit(batch);
                flushed += 1;
            }
        }
        flushed
    }

    /// Periodic flush of due buffers plus cache and buffer housekeeping.
    pub fn spawn_flush_ticker(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.memory.flush_check_interval.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now = Instant::now();
                let flushed = self.flush_due(now);
                if flushed > 0 {
                    tracing::info!("Interval flush queued {} batches", flushed);
                }
                self.buffer.prune_idle(now);
                let purged = self.cache.purge_expired().await;
                if purged > 0 {
                    tracing::debug!("Purged {} expired profile cache entries", purged);
                }
            }
        })
    }

    // ---- profiles ----

    fn validated(content: &str, topic: &str, sub_topic: &str) -> Result<ProfileAttributes> {
        let attributes = ProfileAttributes::new(topic, sub_topic);
        if content.trim().is_empty() || !attributes.is_complete() {
            return Err(AppError::Validation(
                "content, topic and sub_topic are required".into(),
            ));
        }
        Ok(attributes)
    }

    pub async fn add_profile(
        &self,
        project_id: &str,
        user_id: &str,
        content: &str,
        topic: &str,
        sub_topic: &str,
    ) -> Result<ProfileEntry> {
        let attributes = Self::validated(content, topic, sub_topic)?;
        let entry = ProfileEntry::new(user_id, project_id, content.trim(), &attributes);

        let _guard = self.pipeline.lock_user(project_id, user_id).await;
        self.repos.profiles.insert_profile(&entry).await?;
        self.cache.invalidate(project_id, user_id).await;
        tracing::info!("Added profile {} for {}/{}", entry.id, project_id, user_id);
        Ok(entry)
    }

    pub async fn update_profile(
        &self,
        project_id: &str,
        user_id: &str,
        profile_id: &str,
        content: &str,
        topic: &str,
        sub_topic: &str,
    ) -> Result<ProfileEntry> {
        let attributes = Self::validated(content, topic, sub_topic)?;
        let update = ProfileUpdate {
            profile_id: profile_id.to_string(),
            content: content.trim().to_string(),
            attributes,
        };

        let _guard = self.pipeline.lock_user(project_id, user_id).await;
        let entry = self
            .repos
            .profiles
            .update_profile(project_id, user_id, &update)
            .await?;
        self.cache.invalidate(project_id, user_id).await;
        Ok(entry)
    }

    pub async fn delete_profile(&self, project_id: &str, user_id: &str, profile_id: &str) -> Result<()> {
        let _guard = self.pipeline.lock_user(project_id, user_id).await;
        let deleted = self
            .repos
            .profiles
            .delete_profiles(project_id, user_id, &[profile_id.to_string()])
            .await?;
        if deleted == 0 {
            return Err(AppError::NotFound(format!("profile {}", profile_id)));
        }
        self.cache.invalidate(project_id, user_id).await;
        Ok(())
    }

    pub async fn get_profiles(
        &self,
        project_id: &str,
        user_id: &str,
        query: &ProfileQuery,
    ) -> Result<Vec<ProfileEntry>> {
        let config = self.pipeline.profile_config(project_id).await;
        self.assembler
            .get_profiles(project_id, user_id, query, &config.llm_tab_separator)
            .await
    }

    // ---- events ----

    pub async fn list_events(&self, project_id: &str, user_id: &str, topk: usize) -> Result<Vec<UserEvent>> {
        self.repos.events.list_events(project_id, user_id, topk).await
    }

    pub async fn delete_event(&self, project_id: &str, user_id: &str, event_id: &str) -> Result<()> {
        if !self.repos.events.delete_event(project_id, user_id, event_id).await? {
            return Err(AppError::NotFound(format!("event {}", event_id)));
        }
        Ok(())
    }

    // ---- context ----

    pub async fn context(&self, project_id: &str, user_id: &str, request: &ContextRequest) -> Result<String> {
        self.metrics.record_context_request();
        let config = self.pipeline.profile_config(project_id).await;
        self.assembler
            .assemble(project_id, user_id, request, &config.llm_tab_separator)
            .await
    }

    // ---- project config ----

    pub async fn get_profile_config(&self, project_id: &str) -> Result<Option<String>> {
        self.repos.projects.get_profile_config(project_id).await
    }

    /// Validate and store a project's YAML profile config.
    pub async fn update_profile_config(&self, project_id: &str, yaml: &str) -> Result<ProfileConfig> {
        let config = ProfileConfig::parse_project_yaml(&self.memory, yaml)?;
        self.repos.projects.update_profile_config(project_id, yaml).await?;
        tracing::info!("Updated profile config for project {}", project_id);
        Ok(config)
    }
}
