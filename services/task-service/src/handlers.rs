use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header::CONTENT_TYPE,
    response::{Html, IntoResponse, Redirect},
    Form,
};
use std::collections::HashMap;

use crate::models::{Attachment, NewTaskForm};
use crate::service::{self, ServiceError};
use crate::state::AppState;

const ADD_FAILED: &str = "Failed to add task";

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, ServiceError> {
    let tasks = service::list_tasks(&state).await?;
    let page = state
        .templates
        .render_index(&tasks)
        .map_err(|err| ServiceError::internal("Failed to load tasks", err))?;
    Ok(Html(page))
}

pub async fn add_form(State(state): State<AppState>) -> Result<Html<String>, ServiceError> {
    let page = state
        .templates
        .render_add_form()
        .map_err(|err| ServiceError::internal("Failed to render form", err))?;
    Ok(Html(page))
}

pub async fn add_task(
    State(state): State<AppState>,
    form: NewTaskForm,
) -> Result<impl IntoResponse, ServiceError> {
    service::add_task(&state, form).await?;
    Ok(Redirect::to("/"))
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let task_id = parse_task_id(&raw_id).ok_or_else(ServiceError::not_found)?;
    service::complete_task(&state, task_id).await?;
    Ok(Redirect::to("/"))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let task_id = parse_task_id(&raw_id).ok_or_else(ServiceError::not_found)?;
    service::delete_task(&state, task_id).await?;
    Ok(Redirect::to("/"))
}

/// Only plain decimal digits match, as with an integer route converter.
fn parse_task_id(raw: &str) -> Option<i32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[async_trait]
impl<S> FromRequest<S> for NewTaskForm
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|err| ServiceError::internal(ADD_FAILED, err))?;
            return read_multipart(multipart).await;
        }

        let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
            .await
            .map_err(|err| ServiceError::internal(ADD_FAILED, err))?;
        Ok(NewTaskForm {
            title: fields.get("title").cloned(),
            attachment: None,
        })
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<NewTaskForm, ServiceError> {
    let mut form = NewTaskForm::default();
    let reject = |err: axum::extract::multipart::MultipartError| ServiceError::internal(ADD_FAILED, err);

    while let Some(field) = multipart.next_field().await.map_err(reject)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" if form.title.is_none() => {
                form.title = Some(field.text().await.map_err(reject)?);
            }
            "attachment" if form.attachment.is_none() => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(reject)?;
                // An empty file input still sends a part, just without a filename.
                if !filename.is_empty() {
                    form.attachment = Some(Attachment {
                        filename,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::parse_task_id;

    #[test]
    fn task_ids_must_be_plain_integers() {
        assert_eq!(parse_task_id("7"), Some(7));
        assert_eq!(parse_task_id("007"), Some(7));
        assert_eq!(parse_task_id(""), None);
        assert_eq!(parse_task_id("-1"), None);
        assert_eq!(parse_task_id("+1"), None);
        assert_eq!(parse_task_id("1.5"), None);
        assert_eq!(parse_task_id("abc"), None);
        assert_eq!(parse_task_id("99999999999"), None);
    }
}
