//! Blob 缓冲区
//!
//! Per (project, user, blob type) accumulation of inserted blobs. A flush
//! takes the whole pending list under the state lock, so a blob pushed
//! while a batch is in flight lands in the next batch exactly once.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::mem;
use std::time::{Duration, Instant};

use crate::models::{Blob, BlobType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub project_id: String,
    pub user_id: String,
    pub blob_type: BlobType,
}

impl BufferKey {
    pub fn new(project_id: &str, user_id: &str, blob_type: BlobType) -> Self {
        Self {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            blob_type,
        }
    }
}

#[derive(Debug)]
struct BufferState {
    blobs: Vec<Blob>,
    token_estimate: usize,
    last_flush: Instant,
}

impl BufferState {
    fn new() -> Self {
        Self {
            blobs: Vec::new(),
            token_estimate: 0,
            last_flush: Instant::now(),
        }
    }

    fn drain(&mut self, key: &BufferKey) -> Option<FlushBatch> {
        self.last_flush = Instant::now();
        if self.blobs.is_empty() {
            return None;
        }
        let blobs = mem::take(&mut self.blobs);
        let token_estimate = mem::take(&mut self.token_estimate);
        Some(FlushBatch {
            project_id: key.project_id.clone(),
            user_id: key.user_id.clone(),
            blob_type: key.blob_type,
            blob_ids: blobs.iter().map(|b| b.id.clone()).collect(),
            blobs,
            token_estimate,
        })
    }
}

/// Blobs handed to the pipeline by one flush
#[derive(Debug, Clone)]
pub struct FlushBatch {
    pub project_id: String,
    pub user_id: String,
    pub blob_type: BlobType,
    pub blob_ids: Vec<String>,
    pub blobs: Vec<Blob>,
    pub token_estimate: usize,
}

pub struct BlobBuffer {
    max_tokens: usize,
    flush_interval: Duration,
    buffers: DashMap<BufferKey, Mutex<BufferState>>,
}

impl BlobBuffer {
    pub fn new(max_tokens: usize, flush_interval: Duration) -> Self {
        Self {
            max_tokens,
            flush_interval,
            buffers: DashMap::new(),
        }
    }

    /// Append a blob. Returns a batch when the buffer crossed its token
    /// threshold.
    pub fn push(&self, blob: Blob, tokens: usize) -> Option<FlushBatch> {
        let key = BufferKey::new(&blob.project_id, &blob.user_id, blob.blob_type());
        let entry = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(BufferState::new()));
        let mut state = entry.lock();
        state.blobs.push(blob);
        state.token_estimate += tokens;

        if state.token_estimate > self.max_tokens {
            tracing::info!(
                "Buffer for {}/{} reached {} tokens, flushing",
                key.project_id,
                key.user_id,
                state.token_estimate
            );
            return state.drain(&key);
        }
        None
    }

    /// Take everything pending for `key`.
    pub fn take(&self, key: &BufferKey) -> Option<FlushBatch> {
        let entry = self.buffers.get(key)?;
        let mut state = entry.lock();
        state.drain(key)
    }

    /// Put a failed batch back ahead of anything buffered since, so the
    /// next flush for its key retries it.
    pub fn restore(&self, batch: FlushBatch) {
        let key = BufferKey::new(&batch.project_id, &batch.user_id, batch.blob_type);
        let entry = self
            .buffers
            .entry(key)
            .or_insert_with(|| Mutex::new(BufferState::new()));
        let mut state = entry.lock();
        let newer = mem::replace(&mut state.blobs, batch.blobs);
        state.blobs.extend(newer);
        state.token_estimate += batch.token_estimate;
    }

    /// Non-empty buffers whose flush interval has elapsed at `now`.
    pub fn due_keys(&self, now: Instant) -> Vec<BufferKey> {
        self.buffers
            .iter()
            .filter(|entry| {
                let state = entry.value().lock();
                !state.blobs.is_empty()
                    && now.saturating_duration_since(state.last_flush) >= self.flush_interval
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Buffered (blob count, token estimate) for `key`.
    pub fn pending(&self, key: &BufferKey) -> (usize, usize) {
        self.buffers
            .get(key)
            .map(|entry| {
                let state = entry.lock();
                (state.blobs.len(), state.token_estimate)
            })
            .unwrap_or((0, 0))
    }

    /// Drop empty buffers that have been idle for a full interval.
    pub fn prune_idle(&self, now: Instant) {
        self.buffers.retain(|_, state| {
            let state = state.get_mut();
            !state.blobs.is_empty() || now.saturating_duration_since(state.last_flush) < self.flush_interval
        });
    }
}
