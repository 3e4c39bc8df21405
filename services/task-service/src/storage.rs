use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{BlobError, ConfigError};
use crate::models::Attachment;

const AZURE_API_VERSION: &str = "2021-08-06";
const DEFAULT_BLOB_CONTENT_TYPE: &str = "application/octet-stream";

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Public, unsigned URL a blob is reachable at once written.
    fn public_url(&self, blob_name: &str) -> String;

    async fn put_blob(
        &self,
        blob_name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError>;
}

/// Writes the attachment under a fresh unique name and returns its public URL.
pub async fn upload_attachment(
    store: &dyn BlobStore,
    attachment: Attachment,
) -> Result<String, BlobError> {
    let blob_name = blob_name_for(&attachment.filename);
    let size = attachment.bytes.len();
    store
        .put_blob(&blob_name, attachment.bytes, attachment.content_type.as_deref())
        .await?;
    tracing::info!(blob_name = blob_name.as_str(), size, "attachment uploaded");
    Ok(store.public_url(&blob_name))
}

/// The filename is appended as-is. It is not sanitized, so separators pass through.
pub fn blob_name_for(filename: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), filename)
}

pub fn public_blob_url(blob_endpoint: &str, container: &str, blob_name: &str) -> String {
    format!(
        "{}/{}/{}",
        blob_endpoint.trim_end_matches('/'),
        container,
        blob_name
    )
}

/// Blob container backed by an S3-compatible endpoint, addressed path-style.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    container: String,
    blob_endpoint: String,
}

impl S3BlobStore {
    pub async fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.account_name.clone(),
            config.account_key.clone(),
            None,
            None,
            "taskboard",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(config.blob_endpoint.clone())
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(s3_config),
            container: config.container.clone(),
            blob_endpoint: config.blob_endpoint.clone(),
        }
    }

    async fn ensure_container(&self) -> Result<(), BlobError> {
        let exists = self
            .client
            .head_bucket()
            .bucket(self.container.as_str())
            .send()
            .await
            .is_ok();
        if !exists {
            self.client
                .create_bucket()
                .bucket(self.container.as_str())
                .send()
                .await
                .map_err(|err| BlobError::Container {
                    container: self.container.clone(),
                    detail: DisplayErrorContext(&err).to_string(),
                })?;
            tracing::info!(container = self.container.as_str(), "blob container created");
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn public_url(&self, blob_name: &str) -> String {
        public_blob_url(&self.blob_endpoint, &self.container, blob_name)
    }

    async fn put_blob(
        &self,
        blob_name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        self.ensure_container().await?;
        self.client
            .put_object()
            .bucket(self.container.as_str())
            .key(blob_name)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| BlobError::Upload {
                blob_name: blob_name.to_string(),
                detail: DisplayErrorContext(&err).to_string(),
            })?;
        Ok(())
    }
}

/// Blob container reached over the Azure Blob REST API, signed with the account's SharedKey.
pub struct AzureBlobStore {
    http: reqwest::Client,
    account_name: String,
    account_key: Vec<u8>,
    container: String,
    blob_endpoint: String,
}

impl AzureBlobStore {
    pub fn new(config: &StorageConfig) -> Result<Self, ConfigError> {
        let account_key = STANDARD
            .decode(config.account_key.trim())
            .map_err(|_| ConfigError::InvalidAccountKey)?;
        Ok(Self {
            http: reqwest::Client::new(),
            account_name: config.account_name.clone(),
            account_key,
            container: config.container.clone(),
            blob_endpoint: config.blob_endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Creates the container; one that already exists (409) is fine.
    async fn ensure_container(&self) -> Result<(), BlobError> {
        let container_error = |detail: String| BlobError::Container {
            container: self.container.clone(),
            detail,
        };
        let url = format!("{}/{}?restype=container", self.blob_endpoint, self.container);
        let response = self
            .send_signed(Method::PUT, &url, Vec::new(), None, Vec::new())
            .await
            .map_err(container_error)?;
        match response.status() {
            StatusCode::CREATED => {
                tracing::info!(container = self.container.as_str(), "blob container created");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            _ => Err(container_error(failure_detail(response).await)),
        }
    }

    async fn send_signed(
        &self,
        method: Method,
        url: &str,
        mut ms_headers: Vec<(&'static str, String)>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, String> {
        let url = Url::parse(url).map_err(|err| format!("invalid blob url {url}: {err}"))?;
        ms_headers.push((
            "x-ms-date",
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        ));
        ms_headers.push(("x-ms-version", AZURE_API_VERSION.to_string()));
        ms_headers.sort_by(|a, b| a.0.cmp(b.0));

        let to_sign = string_to_sign(
            method.as_str(),
            body.len(),
            content_type.unwrap_or(""),
            &ms_headers,
            &canonical_resource(&self.account_name, &url),
        );
        let signature = sign(&self.account_key, &to_sign)?;

        let mut request = self.http.request(method, url).header(
            AUTHORIZATION,
            format!("SharedKey {}:{}", self.account_name, signature),
        );
        for (name, value) in &ms_headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        request.body(body).send().await.map_err(|err| err.to_string())
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn public_url(&self, blob_name: &str) -> String {
        public_blob_url(&self.blob_endpoint, &self.container, blob_name)
    }

    async fn put_blob(
        &self,
        blob_name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        self.ensure_container().await?;
        let upload_error = |detail: String| BlobError::Upload {
            blob_name: blob_name.to_string(),
            detail,
        };
        let url = format!(
            "{}/{}/{}",
            self.blob_endpoint,
            self.container,
            encode_blob_path(blob_name)
        );
        let response = self
            .send_signed(
                Method::PUT,
                &url,
                vec![("x-ms-blob-type", "BlockBlob".to_string())],
                Some(content_type.unwrap_or(DEFAULT_BLOB_CONTENT_TYPE)),
                bytes,
            )
            .await
            .map_err(upload_error)?;
        if !response.status().is_success() {
            return Err(upload_error(failure_detail(response).await));
        }
        Ok(())
    }
}

/// Percent-encodes each path segment; `/` in a blob name stays a separator.
fn encode_blob_path(blob_name: &str) -> String {
    blob_name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_resource(account_name: &str, url: &Url) -> String {
    let mut resource = format!("/{}{}", account_name, url.path());
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.to_lowercase(), value.into_owned()))
        .collect();
    params.sort();
    for (name, value) in params {
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&value);
    }
    resource
}

/// SharedKey string-to-sign: twelve standard header lines, the sorted `x-ms-*`
/// headers, then the canonical resource. A zero content length is left empty.
fn string_to_sign(
    verb: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(&str, String)],
    resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let mut out = [
        verb,
        "",
        "",
        length.as_str(),
        "",
        content_type,
        "",
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n");
    out.push('\n');
    for (name, value) in ms_headers {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push_str(resource);
    out
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String, String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|err| err.to_string())?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

async fn failure_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}
