//! 服务模块
//!
//! The blob → profile/event pipeline and the context assembler.

pub mod blob_buffer;
pub mod context;
pub mod event_pipeline;
pub mod extractor;
pub mod memory_service;
pub mod merge;
pub mod organizer;
pub mod pipeline;
pub mod profile_cache;
pub mod scheduler;
pub mod summarizer;
pub mod tokenizer;

pub use blob_buffer::{BlobBuffer, BufferKey, FlushBatch};
pub use context::{ContextAssembler, ContextRequest, ProfileQuery, parse_topic_limits};
pub use event_pipeline::EventPipeline;
pub use extractor::{ExtractedFacts, Extractor, LlmExtractor, create_extractor};
pub use memory_service::MemoryService;
pub use merge::{ContentComparator, MergeEngine, MergeInput, NormalizedContainment};
pub use organizer::Organizer;
pub use pipeline::{BatchOutcome, ProfilePipeline, UserGuard};
pub use profile_cache::ProfileCache;
pub use scheduler::PipelineScheduler;
pub use summarizer::Resummarizer;
pub use tokenizer::{TiktokenCounter, TokenCounter, create_token_counter};

use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::llm::LlmService;
use crate::observability::AppMetrics;
use crate::storage::Repositories;

/// Wire the memory service with the production tokenizer.
pub fn create_memory_service(
    repos: Repositories,
    llm: LlmService,
    memory: MemoryConfig,
    metrics: Arc<AppMetrics>,
) -> Result<Arc<MemoryService>> {
    let tokens = create_token_counter()?;
    Ok(Arc::new(MemoryService::new(repos, llm, tokens, memory, metrics)))
}
