//! In-memory stand-ins for the task and blob stores.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use crate::error::{BlobError, StoreError};
use crate::models::{Task, TaskStatus};
use crate::storage::{public_blob_url, BlobStore};

#[derive(Default)]
struct TaskTable {
    next_id: i32,
    rows: Vec<Task>,
}

/// Mimics the `tasks` table: serial ids, NOT NULL title, zero-row updates succeed.
#[derive(Default)]
pub struct MemoryTaskStore {
    table: Mutex<TaskTable>,
    unavailable: bool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails as if the database refused connections.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.table().rows.clone()
    }

    fn table(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Connect("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl crate::db::TaskStore for MemoryTaskStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.check_available()?;
        let mut rows = self.tasks();
        rows.sort_by_key(|task| task.id);
        Ok(rows)
    }

    async fn insert(
        &self,
        title: Option<&str>,
        attachment_url: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let title = title.ok_or_else(|| {
            StoreError::statement(
                "insert task",
                "null value in column \"title\" violates not-null constraint",
            )
        })?;
        let mut table = self.table();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.push(Task {
            id,
            title: title.to_string(),
            status: TaskStatus::Pending,
            attachment_url: attachment_url.map(str::to_string),
        });
        Ok(())
    }

    async fn mark_completed(&self, id: i32) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut table = self.table();
        let mut affected = 0;
        for task in table.rows.iter_mut().filter(|task| task.id == id) {
            task.status = TaskStatus::Completed;
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, id: i32) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut table = self.table();
        let before = table.rows.len();
        table.rows.retain(|task| task.id != id);
        Ok((before - table.rows.len()) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub struct MemoryBlobStore {
    blob_endpoint: String,
    container: String,
    blobs: Mutex<Vec<StoredBlob>>,
    reject_uploads: bool,
}

impl MemoryBlobStore {
    pub fn new(blob_endpoint: &str, container: &str) -> Self {
        Self {
            blob_endpoint: blob_endpoint.to_string(),
            container: container.to_string(),
            blobs: Mutex::new(Vec::new()),
            reject_uploads: false,
        }
    }

    /// Uploads fail as if the account quota were exhausted.
    pub fn rejecting(blob_endpoint: &str, container: &str) -> Self {
        Self {
            reject_uploads: true,
            ..Self::new(blob_endpoint, container)
        }
    }

    pub fn blobs(&self) -> Vec<StoredBlob> {
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn public_url(&self, blob_name: &str) -> String {
        public_blob_url(&self.blob_endpoint, &self.container, blob_name)
    }

    async fn put_blob(
        &self,
        blob_name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        if self.reject_uploads {
            return Err(BlobError::Upload {
                blob_name: blob_name.to_string(),
                detail: "quota exceeded".to_string(),
            });
        }
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(StoredBlob {
                name: blob_name.to_string(),
                bytes,
                content_type: content_type.map(str::to_string),
            });
        Ok(())
    }
}
