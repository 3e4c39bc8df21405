use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt::Display;

use crate::models::{NewTaskForm, Task};
use crate::state::AppState;
use crate::storage::upload_attachment;

/// Plain-text failure returned to the client, carrying the raw error text.
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub message: String,
}

impl ServiceError {
    pub fn internal(context: &str, err: impl Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{context}: {err}"),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "Not Found".to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub async fn list_tasks(state: &AppState) -> Result<Vec<Task>, ServiceError> {
    state.tasks.list().await.map_err(|err| {
        tracing::error!(error = %err, "list tasks failed");
        ServiceError::internal("Failed to load tasks", err)
    })
}

/// Uploads the attachment first; a failed upload means no row is written.
pub async fn add_task(state: &AppState, form: NewTaskForm) -> Result<(), ServiceError> {
    let attachment_url = match form.attachment {
        Some(attachment) => {
            let url = upload_attachment(state.blobs.as_ref(), attachment)
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, "attachment upload failed");
                    ServiceError::internal("Failed to upload attachment", err)
                })?;
            Some(url)
        }
        None => None,
    };

    state
        .tasks
        .insert(form.title.as_deref(), attachment_url.as_deref())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "insert task failed");
            ServiceError::internal("Failed to add task", err)
        })?;

    tracing::info!(
        title = form.title.as_deref().unwrap_or_default(),
        has_attachment = attachment_url.is_some(),
        "task added"
    );
    Ok(())
}

pub async fn complete_task(state: &AppState, task_id: i32) -> Result<(), ServiceError> {
    let affected = state.tasks.mark_completed(task_id).await.map_err(|err| {
        tracing::error!(task_id, error = %err, "complete task failed");
        ServiceError::internal("Failed to mark task complete", err)
    })?;
    tracing::debug!(task_id, affected, "task completed");
    Ok(())
}

/// Removes the row only. The attachment blob, if any, stays in the container.
pub async fn delete_task(state: &AppState, task_id: i32) -> Result<(), ServiceError> {
    let affected = state.tasks.delete(task_id).await.map_err(|err| {
        tracing::error!(task_id, error = %err, "delete task failed");
        ServiceError::internal("Failed to delete task", err)
    })?;
    tracing::debug!(task_id, affected, "task deleted");
    Ok(())
}
