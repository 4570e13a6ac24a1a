//! 批次调度
//!
//! One worker task per active (project, user). Batches for a user run in
//! the order they were submitted; different users run in parallel.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AppError, Result};
use crate::services::blob_buffer::{BlobBuffer, FlushBatch};
use crate::services::pipeline::{BatchOutcome, ProfilePipeline};

type UserKey = (String, String);
type Workers = Arc<DashMap<UserKey, mpsc::UnboundedSender<BatchJob>>>;

struct BatchJob {
    batch: FlushBatch,
    reply: Option<oneshot::Sender<Result<BatchOutcome>>>,
}

#[derive(Clone)]
pub struct PipelineScheduler {
    pipeline: Arc<ProfilePipeline>,
    buffer: Arc<BlobBuffer>,
    workers: Workers,
    idle_timeout: Duration,
}

impl PipelineScheduler {
    /// Failed batches are put back into `buffer` so the next flush for the
    /// same user retries them.
    pub fn new(pipeline: Arc<ProfilePipeline>, buffer: Arc<BlobBuffer>, idle_timeout: Duration) -> Self {
        Self {
            pipeline,
            buffer,
            workers: Arc::new(DashMap::new()),
            idle_timeout,
        }
    }

    /// Queue a batch and return immediately. The outcome is only logged.
    pub fn submit(&self, batch: FlushBatch) {
        self.dispatch(BatchJob { batch, reply: None });
    }

    /// Queue a batch behind any pending work for the same user and wait
    /// for its outcome.
    pub async fn submit_and_wait(&self, batch: FlushBatch) -> Result<BatchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(BatchJob {
            batch,
            reply: Some(tx),
        });
        rx.await
            .map_err(|_| AppError::Internal("pipeline worker dropped the batch".into()))?
    }

    /// Users with a live worker
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    fn dispatch(&self, job: BatchJob) {
        let key = (job.batch.project_id.clone(), job.batch.user_id.clone());
        match self.workers.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Err(mpsc::error::SendError(job)) = occupied.get().send(job) {
                    // worker exited between idle check and removal
                    let tx = self.spawn_worker(key, job);
                    occupied.insert(tx);
                }
            }
            Entry::Vacant(vacant) => {
                let tx = self.spawn_worker(key, job);
                vacant.insert(tx);
            }
        }
    }

    fn spawn_worker(&self, key: UserKey, first: BatchJob) -> mpsc::UnboundedSender<BatchJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchJob>();
        // the receiver is still alive here
        let _ = tx.send(first);

        let own_tx = tx.clone();
        let pipeline = self.pipeline.clone();
        let buffer = self.buffer.clone();
        let workers = self.workers.clone();
        let idle = self.idle_timeout;

        tokio::spawn(async move {
            tracing::debug!("Pipeline worker started for {}/{}", key.0, key.1);
            loop {
                match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(job)) => run_job(&pipeline, &buffer, job).await,
                    Ok(None) => break,
                    Err(_) => {
                        let retired = workers
                            .remove_if(&key, |_, tx| tx.same_channel(&own_tx) && rx.is_empty())
                            .is_some();
                        if retired {
                            break;
                        }
                    }
                }
            }
            // anything that raced in before removal still gets processed
            rx.close();
            while let Some(job) = rx.recv().await {
                run_job(&pipeline, &buffer, job).await;
            }
            tracing::debug!("Pipeline worker retired for {}/{}", key.0, key.1);
        });

        tx
    }
}

async fn run_job(pipeline: &ProfilePipeline, buffer: &BlobBuffer, job: BatchJob) {
    let BatchJob { batch, reply } = job;
    let result = pipeline
        .process_batch(&batch.project_id, &batch.user_id, &batch.blob_ids, &batch.blobs)
        .await;
    if let Err(e) = &result {
        tracing::warn!(
            "Returning {} blobs to the buffer of {}/{}: {}",
            batch.blob_ids.len(),
            batch.project_id,
            batch.user_id,
            e
        );
        buffer.restore(batch);
    }
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::error::Result;
    use crate::llm::{LlmClient, LlmRequest, LlmService};
    use crate::models::{Blob, BlobType, ChatMessage, ProfileAttributes, ProfileConfig, ProfileRepository};
    use crate::observability::AppMetrics;
    use crate::services::blob_buffer::BufferKey;
    use crate::services::extractor::{ExtractedFacts, Extractor};
    use crate::services::profile_cache::ProfileCache;
    use crate::services::tokenizer::TiktokenCounter;
    use crate::storage::Repositories;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records the conversations it sees and yields one fact per batch.
    /// Fails the next batch while `fail_next` is set.
    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
        fail_next: Arc<AtomicBool>,
        profiles: Arc<dyn ProfileRepository>,
    }

    #[async_trait]
    impl Extractor for Recording {
        async fn extract(
            &self,
            project_id: &str,
            user_id: &str,
            conversation: &str,
            _config: &ProfileConfig,
        ) -> Result<ExtractedFacts> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.seen.lock().push(conversation.to_string());
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(AppError::Extraction("model unavailable".into()));
            }
            let profiles = self.profiles.list_profiles(project_id, user_id).await?;
            Ok(ExtractedFacts {
                fact_contents: vec![conversation.to_string()],
                fact_attributes: vec![ProfileAttributes::new("interest", "notes")],
                total_profiles: profiles.len(),
                profiles,
            })
        }
    }

    struct Silent;

    #[async_trait]
    impl LlmClient for Silent {
        async fn complete(&self, _prompt: &str, _request: &LlmRequest) -> Result<String> {
            Ok(String::new())
        }
    }

    struct Fixture {
        scheduler: PipelineScheduler,
        buffer: Arc<BlobBuffer>,
        seen: Arc<Mutex<Vec<String>>>,
        fail_next: Arc<AtomicBool>,
        repos: Repositories,
    }

    fn fixture(idle: Duration) -> Fixture {
        let repos = Repositories::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let fail_next = Arc::new(AtomicBool::new(false));
        let extractor = Arc::new(Recording {
            seen: seen.clone(),
            fail_next: fail_next.clone(),
            profiles: repos.profiles.clone(),
        });
        let pipeline = ProfilePipeline::with_extractor(
            repos.clone(),
            extractor,
            LlmService::new(Arc::new(Silent), Duration::from_secs(1)),
            Arc::new(TiktokenCounter::new().unwrap()),
            Arc::new(ProfileCache::new(Duration::from_secs(60))),
            MemoryConfig::default(),
            Arc::new(AppMetrics::default()),
        );
        let buffer = Arc::new(BlobBuffer::new(1024, Duration::from_secs(3600)));
        Fixture {
            scheduler: PipelineScheduler::new(Arc::new(pipeline), buffer.clone(), idle),
            buffer,
            seen,
            fail_next,
            repos,
        }
    }

    fn batch(user: &str, text: &str) -> FlushBatch {
        let blob = Blob::chat(user, "p1", vec![ChatMessage::user(text)]);
        FlushBatch {
            project_id: "p1".into(),
            user_id: user.into(),
            blob_type: BlobType::Chat,
            blob_ids: vec![blob.id.clone()],
            blobs: vec![blob],
            token_estimate: 1,
        }
    }

    #[tokio::test]
    async fn test_batches_run_in_submission_order() {
        let f = fixture(Duration::from_secs(5));
        for i in 0..4 {
            f.scheduler.submit(batch("u1", &format!("message {}", i)));
        }
        f.scheduler.submit_and_wait(batch("u1", "message 4")).await.unwrap();

        let seen = f.seen.lock().clone();
        assert_eq!(seen.len(), 5);
        for (i, conversation) in seen.iter().enumerate() {
            assert!(conversation.ends_with(&format!("message {}", i)), "{}", conversation);
        }
    }

    #[tokio::test]
    async fn test_submit_and_wait_returns_outcome() {
        let f = fixture(Duration::from_secs(5));
        let outcome = f.scheduler.submit_and_wait(batch("u1", "likes tea")).await.unwrap();
        assert_eq!(outcome.summary.added.len(), 1);
        assert_eq!(f.repos.profiles.list_profiles("p1", "u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_returns_to_buffer() {
        let f = fixture(Duration::from_secs(5));
        let key = BufferKey::new("p1", "u1", BlobType::Chat);
        f.fail_next.store(true, Ordering::SeqCst);

        let failed = batch("u1", "likes tea");
        let ids = failed.blob_ids.clone();
        let err = f.scheduler.submit_and_wait(failed).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
        assert_eq!(f.buffer.pending(&key), (1, 1));

        let retry = f.buffer.take(&key).unwrap();
        assert_eq!(retry.blob_ids, ids);
        f.scheduler.submit_and_wait(retry).await.unwrap();
        assert_eq!(f.repos.profiles.list_profiles("p1", "u1").await.unwrap().len(), 1);
        assert_eq!(f.buffer.pending(&key), (0, 0));
    }

    #[tokio::test]
    async fn test_background_failure_is_kept_for_next_flush() {
        let f = fixture(Duration::from_secs(5));
        let key = BufferKey::new("p1", "u1", BlobType::Chat);
        f.fail_next.store(true, Ordering::SeqCst);

        f.scheduler.submit(batch("u1", "likes tea"));
        // queued behind the failing batch, so it runs after the restore
        f.scheduler.submit_and_wait(batch("u1", "likes jazz")).await.unwrap();
        assert_eq!(f.buffer.pending(&key).0, 1);
    }

    #[tokio::test]
    async fn test_idle_workers_retire() {
        let f = fixture(Duration::from_millis(20));
        f.scheduler.submit_and_wait(batch("u1", "a")).await.unwrap();
        f.scheduler.submit_and_wait(batch("u2", "b")).await.unwrap();
        assert_eq!(f.scheduler.active_workers(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.scheduler.active_workers(), 0);

        f.scheduler.submit_and_wait(batch("u1", "c")).await.unwrap();
        assert_eq!(f.seen.lock().len(), 3);
    }
}
