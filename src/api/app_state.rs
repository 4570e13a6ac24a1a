use crate::observability::AppMetrics;
use crate::services::MemoryService;
use std::sync::Arc;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Blob intake, profiles, events and context
    pub memory_service: Arc<MemoryService>,
    /// Process-wide counters
    pub metrics: Arc<AppMetrics>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("memory_service", &"Arc<MemoryService>")
            .field("metrics", &"Arc<AppMetrics>")
            .finish()
    }
}

impl AppState {
    pub fn new(memory_service: Arc<MemoryService>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            memory_service,
            metrics,
        }
    }
}
