//! Object storage for staged artifacts.
//!
//! The packager writes through the [`ObjectStore`] trait. Two
//! implementations ship with the crate:
//!
//! - [`InMemoryObjectStore`] for development and tests
//! - [`GcsObjectStore`], the Cloud Storage JSON API over `reqwest`

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AgentEngineError, AgentEngineResult};
use crate::validation::{self, GCS_PREFIX};

/// Default Cloud Storage endpoint.
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Where artifacts for one deployment are written: `gs://{bucket}/{prefix}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLocation {
    /// Bucket name, without the scheme.
    pub bucket: String,
    /// Object prefix, without leading or trailing slashes.
    pub prefix: String,
}

impl StagingLocation {
    /// Parse `gs://bucket[/path]` and append `dir_name` to the path.
    pub fn new(staging_bucket: &str, dir_name: &str) -> AgentEngineResult<Self> {
        validation::validate_staging_bucket(staging_bucket)?;
        let rest = staging_bucket[GCS_PREFIX.len()..].trim_matches('/');
        let (bucket, path) = match rest.split_once('/') {
            Some((bucket, path)) => (bucket, path.trim_matches('/')),
            None => (rest, ""),
        };
        let prefix = [path, dir_name.trim_matches('/')]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }

    /// Object name of `file` under the prefix.
    pub fn object(&self, file: &str) -> String {
        if self.prefix.is_empty() {
            file.to_string()
        } else {
            format!("{}/{file}", self.prefix)
        }
    }

    /// `gs://` URI of `file` under the prefix.
    pub fn uri(&self, file: &str) -> String {
        format!("{GCS_PREFIX}{}/{}", self.bucket, self.object(file))
    }
}

/// Blob storage used to stage artifacts.
///
/// Implementations must be `Send + Sync`; the packager holds them behind an
/// `Arc` and may call them from any task.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` if it does not exist.
    async fn ensure_bucket(&self, bucket: &str) -> AgentEngineResult<()>;

    /// Write `data` to `bucket/object`, overwriting any existing blob.
    async fn upload(&self, bucket: &str, object: &str, data: Vec<u8>) -> AgentEngineResult<()>;

    /// Read `bucket/object`.
    ///
    /// Returns [`AgentEngineError::NotFound`] when the blob does not exist.
    async fn download(&self, bucket: &str, object: &str) -> AgentEngineResult<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-memory object store keyed by `gs://` URI.
///
/// Thread-safe via `tokio::sync::RwLock`. Contents are lost with the value.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    buckets: Arc<RwLock<BTreeSet<String>>>,
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blob stored at `uri`.
    pub async fn get(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(uri).cloned()
    }

    /// Every stored URI, sorted.
    pub async fn uris(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Whether `bucket` has been created.
    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains(bucket)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> AgentEngineResult<()> {
        let created = self.buckets.write().await.insert(bucket.to_string());
        debug!(bucket = %bucket, created, "Bucket ensured");
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, data: Vec<u8>) -> AgentEngineResult<()> {
        let uri = format!("{GCS_PREFIX}{bucket}/{object}");
        debug!(uri = %uri, bytes = data.len(), "Object stored");
        self.objects.write().await.insert(uri, data);
        Ok(())
    }

    async fn download(&self, bucket: &str, object: &str) -> AgentEngineResult<Vec<u8>> {
        let uri = format!("{GCS_PREFIX}{bucket}/{object}");
        self.objects
            .read()
            .await
            .get(&uri)
            .cloned()
            .ok_or_else(|| AgentEngineError::NotFound(uri))
    }
}

// ---------------------------------------------------------------------------
// Cloud Storage
// ---------------------------------------------------------------------------

/// Cloud Storage JSON API client.
#[derive(Debug, Clone)]
pub struct GcsObjectStore {
    client: reqwest::Client,
    endpoint: String,
    project: String,
    location: String,
    access_token: Option<String>,
}

impl GcsObjectStore {
    /// Store that creates buckets in `project` / `location`.
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: GCS_ENDPOINT.to_string(),
            project: project.into(),
            location: location.into(),
            access_token,
        }
    }

    /// Point the store at another endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> AgentEngineResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| AgentEngineError::config(format!("invalid storage endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AgentEngineError::config("storage endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> AgentEngineResult<reqwest::Response> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                AgentEngineError::Timeout(format!("storage request timed out: {e}"))
            } else if e.is_connect() {
                AgentEngineError::Transport(format!("storage connection failed: {e}"))
            } else {
                AgentEngineError::Transport(format!("storage request failed: {e}"))
            }
        })
    }
}

async fn check(response: reqwest::Response, what: &str) -> AgentEngineResult<reqwest::Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(AgentEngineError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AgentEngineError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> AgentEngineResult<()> {
        let url = self.url(&["storage", "v1", "b", bucket])?;
        let response = self.send(self.client.get(url)).await?;
        match check(response, bucket).await {
            Ok(_) => return Ok(()),
            Err(AgentEngineError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!("Creating bucket {} in {}", bucket, self.location);
        let url = self.url(&["storage", "v1", "b"])?;
        let request = self
            .client
            .post(url)
            .query(&[("project", self.project.as_str())])
            .json(&serde_json::json!({ "name": bucket, "location": self.location }));
        check(self.send(request).await?, bucket).await?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, data: Vec<u8>) -> AgentEngineResult<()> {
        let url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        debug!("Uploading {} bytes to gs://{}/{}", data.len(), bucket, object);
        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", object)])
            .header("Content-Type", "application/octet-stream")
            .body(data);
        check(self.send(request).await?, object).await?;
        Ok(())
    }

    async fn download(&self, bucket: &str, object: &str) -> AgentEngineResult<Vec<u8>> {
        let url = self.url(&["storage", "v1", "b", bucket, "o", object])?;
        let request = self.client.get(url).query(&[("alt", "media")]);
        let response = check(self.send(request).await?, object).await?;
        let bytes = response.bytes().await.map_err(|e| {
            AgentEngineError::Transport(format!("failed to read object {object}: {e}"))
        })?;
        Ok(bytes.to_vec())
    }
}
