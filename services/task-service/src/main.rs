mod app;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod render;
mod service;
mod state;
mod storage;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use taskboard_common::{bind_listener, init_tracing, shutdown_signal};

use crate::config::{AppConfig, StorageBackend};
use crate::db::{initialize_schema, PgTaskStore, TaskStore};
use crate::error::StartupError;
use crate::state::AppState;
use crate::storage::{AzureBlobStore, BlobStore, S3BlobStore};

#[tokio::main]
async fn main() {
    let _guards = init_tracing("task-service");

    if let Err(err) = run().await {
        tracing::error!(error = %err, "task-service failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;

    let blobs: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Azure => Arc::new(AzureBlobStore::new(&config.storage)?),
        StorageBackend::S3 => Arc::new(S3BlobStore::new(&config.storage).await),
    };
    let tasks: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(config.database.clone()));
    // Startup continues even if the schema could not be provisioned.
    initialize_schema(tasks.as_ref()).await;

    let state = AppState::new(tasks, blobs)?;
    let app = app::build_router(state, config.max_upload_bytes);
    let listener = bind_listener(config.port)
        .await
        .map_err(StartupError::Bind)?;

    tracing::info!(
        port = config.port,
        storage_backend = ?config.storage.backend,
        container = config.storage.container.as_str(),
        blob_endpoint = config.storage.blob_endpoint.as_str(),
        "task-service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)
}
