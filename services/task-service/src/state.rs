use std::sync::Arc;

use crate::db::TaskStore;
use crate::render::Templates;
use crate::storage::BlobStore;

/// Handles shared by every request, built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<dyn TaskStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub templates: Arc<Templates>,
}

impl AppState {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, minijinja::Error> {
        Ok(Self {
            tasks,
            blobs,
            templates: Arc::new(Templates::new()?),
        })
    }
}
