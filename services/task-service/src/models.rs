use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i32,
    pub title: String,
    pub status: TaskStatus,
    pub attachment_url: Option<String>,
}

/// Status column value. The column is free text, so unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Completed => "Completed",
            TaskStatus::Other(value) => value.as_str(),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Pending" => TaskStatus::Pending,
            "Completed" => TaskStatus::Completed,
            _ => TaskStatus::Other(value),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A file part received with the add form.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Decoded add-task form. `title` stays optional: a missing title is left to the store to reject.
#[derive(Debug, Default)]
pub struct NewTaskForm {
    pub title: Option<String>,
    pub attachment: Option<Attachment>,
}
