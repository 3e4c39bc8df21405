use std::env;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CONTAINER: &str = "taskattachments";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

const DEFAULT_PROTOCOL: &str = "https";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
const DEFAULT_REGION: &str = "us-east-1";

const STORAGE_CONNECTION_VARS: [&str; 2] =
    ["AZURE_STORAGE_CONNECTION_STRING", "STORAGE_CONNECTION_STRING"];
const DATABASE_URL_VARS: [&str; 2] = ["AZURE_POSTGRESQL_CONNECTIONSTRING", "DATABASE_URL"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
}

/// Either a full connection string or discrete parameters with placeholder defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    Url(String),
    Params {
        host: String,
        dbname: String,
        user: String,
        password: String,
        port: u16,
        sslmode: String,
    },
}

/// Wire protocol spoken to the blob endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Azure Blob REST with SharedKey auth.
    Azure,
    /// S3-compatible endpoint; needs an explicit `BlobEndpoint`.
    S3,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(StorageBackend::Azure),
            "s3" => Ok(StorageBackend::S3),
            _ => Err(ConfigError::UnknownBackend(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub account_name: String,
    pub account_key: String,
    pub blob_endpoint: String,
    pub region: String,
    pub container: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PORT")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let database = DatabaseConfig::from_lookup(&lookup);

        let connection_string = first_of(&lookup, &STORAGE_CONNECTION_VARS)
            .ok_or(ConfigError::MissingVar(STORAGE_CONNECTION_VARS[0]))?;
        let backend = match lookup("STORAGE_BACKEND") {
            Some(value) => StorageBackend::parse(&value)?,
            None => StorageBackend::Azure,
        };
        let container =
            lookup("STORAGE_CONTAINER").unwrap_or_else(|| DEFAULT_CONTAINER.to_string());
        let storage =
            StorageConfig::from_connection_string(&connection_string, container, backend)?;

        Ok(Self {
            port,
            max_upload_bytes,
            database,
            storage,
        })
    }
}

impl DatabaseConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = first_of(lookup, &DATABASE_URL_VARS) {
            return DatabaseConfig::Url(url);
        }
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        DatabaseConfig::Params {
            host: var("DB_HOST", "taskmanager.postgres.database.azure.com"),
            dbname: var("DB_NAME", "postgres"),
            user: var("DB_USER", "your_pg_user"),
            password: var("DB_PASS", "your_password"),
            port: lookup("DB_PORT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(5432),
            sslmode: var("DB_SSLMODE", "require"),
        }
    }
}

/// First variable that is set, in order of preference.
fn first_of<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter().find_map(|key| lookup(key))
}

impl StorageConfig {
    /// Parses `Key=Value;` pairs. Keys match case-insensitively; values may contain `=`.
    pub fn from_connection_string(
        raw: &str,
        container: String,
        backend: StorageBackend,
    ) -> Result<Self, ConfigError> {
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut protocol = None;
        let mut suffix = None;
        let mut region = None;

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedSegment(segment.to_string()))?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "accountname" => account_name = Some(value),
                "accountkey" => account_key = Some(value),
                "blobendpoint" => blob_endpoint = Some(value),
                "defaultendpointsprotocol" => protocol = Some(value),
                "endpointsuffix" => suffix = Some(value),
                "region" => region = Some(value),
                other => tracing::debug!(key = other, "ignoring storage connection key"),
            }
        }

        let account_name = account_name.ok_or(ConfigError::MissingConnectionKey("AccountName"))?;
        let account_key = account_key.ok_or(ConfigError::MissingConnectionKey("AccountKey"))?;
        let blob_endpoint = match (blob_endpoint, backend) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, StorageBackend::S3) => {
                return Err(ConfigError::MissingConnectionKey("BlobEndpoint"));
            }
            (None, StorageBackend::Azure) => format!(
                "{}://{}.blob.{}",
                protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL),
                account_name,
                suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX),
            ),
        };

        Ok(Self {
            backend,
            account_name,
            account_key,
            blob_endpoint,
            region: region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            container,
        })
    }
}
