use std::io;
use thiserror::Error;

/// Failures from the relational store. Detail strings carry the raw driver text.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connect(String),
    #[error("{operation} failed: {detail}")]
    Statement {
        operation: &'static str,
        detail: String,
    },
    #[error("commit failed: {0}")]
    Commit(String),
}

impl StoreError {
    pub fn statement(operation: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Statement {
            operation,
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("create container {container} failed: {detail}")]
    Container { container: String, detail: String },
    #[error("upload {blob_name} failed: {detail}")]
    Upload { blob_name: String, detail: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingVar(&'static str),
    #[error("storage connection string is missing {0}")]
    MissingConnectionKey(&'static str),
    #[error("malformed storage connection string segment: {0}")]
    MalformedSegment(String),
    #[error("storage account key is not valid base64")]
    InvalidAccountKey,
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("template setup failed: {0}")]
    Templates(#[from] minijinja::Error),
    #[error("bind listener failed: {0}")]
    Bind(#[source] io::Error),
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}
