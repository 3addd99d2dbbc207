//! Transport layer for the Agent Engine REST surface.
//!
//! Provides the [`Transport`] trait the client talks through, and
//! [`RestTransport`], the `reqwest` implementation of the `v1beta1` REST
//! binding.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::API_VERSION;
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::types::{
    FieldMask, ListReasoningEnginesResponse, Operation, QueryRequest, ReasoningEngine,
};

/// Raw response body chunks of a streaming call.
pub type ByteStream = BoxStream<'static, AgentEngineResult<Vec<u8>>>;

/// Transport abstraction for the Agent Engine service.
///
/// Implementations carry requests to the service and hand back the decoded
/// resources. They must be safe for concurrent calls: one transport is shared
/// by a client and every handle it returns.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `POST {parent}/reasoningEngines`.
    async fn create_reasoning_engine(
        &self,
        parent: &str,
        engine: &ReasoningEngine,
    ) -> AgentEngineResult<Operation>;

    /// `GET {name}`.
    async fn get_reasoning_engine(&self, name: &str) -> AgentEngineResult<ReasoningEngine>;

    /// `GET {parent}/reasoningEngines`, one page.
    async fn list_reasoning_engines(
        &self,
        parent: &str,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> AgentEngineResult<ListReasoningEnginesResponse>;

    /// `PATCH {engine.name}?updateMask=...`.
    async fn update_reasoning_engine(
        &self,
        engine: &ReasoningEngine,
        update_mask: &FieldMask,
    ) -> AgentEngineResult<Operation>;

    /// `DELETE {name}?force=...`.
    async fn delete_reasoning_engine(&self, name: &str, force: bool)
        -> AgentEngineResult<Operation>;

    /// `GET {operation name}`.
    async fn get_operation(&self, name: &str) -> AgentEngineResult<Operation>;

    /// `POST {name}:query`. Returns the whole response body.
    async fn query(&self, name: &str, request: &QueryRequest) -> AgentEngineResult<Value>;

    /// `POST {name}:streamQuery`, with `alt=sse` when `sse` is set.
    async fn stream_query(
        &self,
        name: &str,
        request: &QueryRequest,
        sse: bool,
    ) -> AgentEngineResult<ByteStream>;

    /// Bidirectional stream fed by `input`.
    ///
    /// The default implementation reports the operation as unsupported.
    async fn bidi_stream_query(
        &self,
        name: &str,
        class_method: &str,
        input: mpsc::Receiver<Value>,
    ) -> AgentEngineResult<BoxStream<'static, AgentEngineResult<Value>>> {
        let _ = (class_method, input);
        Err(AgentEngineError::UnsupportedOperation(format!(
            "bidirectional streaming is not available on this transport ({name})"
        )))
    }

    /// Base URL of the A2A endpoints of `name`.
    fn a2a_base_url(&self, name: &str) -> String;

    /// Bearer token for services reached outside the transport.
    fn access_token(&self) -> Option<String> {
        None
    }

    /// Release any held resources. The default implementation is a no-op.
    async fn close(&self) -> AgentEngineResult<()> {
        Ok(())
    }
}

/// Configuration for [`RestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request timeout. Defaults to 60 seconds.
    pub timeout: Duration,
    /// Additional HTTP headers to include on every request.
    pub headers: HashMap<String, String>,
    /// Bearer token sent with every request.
    pub access_token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            headers: HashMap::new(),
            access_token: None,
        }
    }
}

/// REST transport using `reqwest`.
///
/// # Example
///
/// ```no_run
/// use agent_engines::transport::RestTransport;
///
/// let transport = RestTransport::new(
///     "https://us-central1-aiplatform.googleapis.com",
///     Default::default(),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RestTransport {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl RestTransport {
    /// Create a transport targeting `endpoint` (scheme and host, no version).
    pub fn new(endpoint: impl Into<String>, config: TransportConfig) -> Self {
        let mut default_headers = HeaderMap::new();
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                default_headers.insert(name, val);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self::with_client(endpoint, client, config.access_token)
    }

    /// Create a transport with an existing `reqwest::Client`.
    pub fn with_client(
        endpoint: impl Into<String>,
        client: reqwest::Client,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    /// Returns the endpoint this transport sends requests to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{API_VERSION}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> AgentEngineResult<reqwest::Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                AgentEngineError::Timeout(format!("request timed out: {e}"))
            } else if e.is_connect() {
                AgentEngineError::Transport(format!("connection failed: {e}"))
            } else {
                AgentEngineError::Transport(format!("HTTP request failed: {e}"))
            }
        })?;

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

    async fn json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> AgentEngineResult<T> {
        let response = self.send(request, what).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentEngineError::Transport(format!("failed to read response body: {e}")))?;
        if bytes.is_empty() {
            return serde_json::from_slice(b"{}").map_err(|e| {
                AgentEngineError::InvalidJson(format!("failed to parse response for {what}: {e}"))
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            AgentEngineError::InvalidJson(format!("failed to parse response for {what}: {e}"))
        })
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AgentEngineResult<T> {
        let url = self.url(path);
        debug!("POST {}", url);
        self.json(self.client.post(&url).json(body), path).await
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn create_reasoning_engine(
        &self,
        parent: &str,
        engine: &ReasoningEngine,
    ) -> AgentEngineResult<Operation> {
        self.post_json(&format!("{parent}/reasoningEngines"), engine)
            .await
    }

    async fn get_reasoning_engine(&self, name: &str) -> AgentEngineResult<ReasoningEngine> {
        let url = self.url(name);
        debug!("GET {}", url);
        self.json(self.client.get(&url), name).await
    }

    async fn list_reasoning_engines(
        &self,
        parent: &str,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> AgentEngineResult<ListReasoningEnginesResponse> {
        let url = self.url(&format!("{parent}/reasoningEngines"));
        debug!("GET {}", url);
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(filter) = filter {
            query.push(("filter", filter));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.json(self.client.get(&url).query(&query), parent).await
    }

    async fn update_reasoning_engine(
        &self,
        engine: &ReasoningEngine,
        update_mask: &FieldMask,
    ) -> AgentEngineResult<Operation> {
        let url = self.url(&engine.name);
        debug!("PATCH {} updateMask={}", url, update_mask.to_query());
        let request = self
            .client
            .patch(&url)
            .query(&[("updateMask", update_mask.to_query())])
            .json(engine);
        self.json(request, &engine.name).await
    }

    async fn delete_reasoning_engine(
        &self,
        name: &str,
        force: bool,
    ) -> AgentEngineResult<Operation> {
        let url = self.url(name);
        debug!("DELETE {} force={}", url, force);
        let request = self
            .client
            .delete(&url)
            .query(&[("force", if force { "true" } else { "false" })]);
        self.json(request, name).await
    }

    async fn get_operation(&self, name: &str) -> AgentEngineResult<Operation> {
        let url = self.url(name);
        debug!("GET {}", url);
        self.json(self.client.get(&url), name).await
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> AgentEngineResult<Value> {
        self.post_json(&format!("{name}:query"), request).await
    }

    async fn stream_query(
        &self,
        name: &str,
        request: &QueryRequest,
        sse: bool,
    ) -> AgentEngineResult<ByteStream> {
        let url = self.url(&format!("{name}:streamQuery"));
        debug!("POST {} sse={}", url, sse);
        let mut builder = self.client.post(&url).json(request);
        if sse {
            builder = builder
                .query(&[("alt", "sse")])
                .header("Accept", "text/event-stream");
        }
        let response = self.send(builder, name).await?;
        let chunks = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| AgentEngineError::Transport(format!("error reading stream: {e}")))
        });
        Ok(chunks.boxed())
    }

    fn a2a_base_url(&self, name: &str) -> String {
        format!("{}/a2a", self.url(name))
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }
}
