use std::sync::Arc;

use crate::services::jobs::JobRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(jobs: JobRegistry) -> Self {
        Self {
            jobs: Arc::new(jobs),
        }
    }
}
