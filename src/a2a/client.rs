//! HTTP+JSON client for the A2A endpoints of a deployed agent.
//!
//! The deployed agent serves the REST binding of A2A under its resource URL.
//! The client is built from the card published with the agent's
//! `a2a_extension` methods and authenticates with the transport's bearer
//! token.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AgentEngineError, AgentEngineResult};

use super::types::{AgentCard, SendMessageParams, SendMessageResponse, Task, HTTP_JSON_TRANSPORT};

/// REST client for one deployed agent's A2A surface.
#[derive(Debug, Clone)]
pub struct A2aRestClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    card: AgentCard,
}

impl A2aRestClient {
    /// Build a client for `card`, served at `base_url`.
    ///
    /// # Errors
    ///
    /// [`AgentEngineError::Validation`] when the card prefers a transport
    /// other than HTTP+JSON or declares streaming.
    pub fn from_card(
        card: AgentCard,
        base_url: impl Into<String>,
        access_token: Option<String>,
    ) -> AgentEngineResult<Self> {
        Self::with_client(reqwest::Client::new(), card, base_url, access_token)
    }

    /// Like [`from_card`](Self::from_card) with an existing `reqwest::Client`.
    pub fn with_client(
        client: reqwest::Client,
        card: AgentCard,
        base_url: impl Into<String>,
        access_token: Option<String>,
    ) -> AgentEngineResult<Self> {
        let transport = card.preferred_transport.as_deref().unwrap_or("JSONRPC");
        if !transport.eq_ignore_ascii_case(HTTP_JSON_TRANSPORT) {
            return Err(AgentEngineError::validation(format!(
                "agent card '{}' prefers transport {transport}; only {HTTP_JSON_TRANSPORT} is supported",
                card.name
            )));
        }
        if card.capabilities.streaming == Some(true) {
            return Err(AgentEngineError::validation(format!(
                "agent card '{}' declares streaming, which is not supported",
                card.name
            )));
        }
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            card,
        })
    }

    /// The card this client was built from.
    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /v1/message:send`.
    pub async fn send_message(
        &self,
        params: &SendMessageParams,
    ) -> AgentEngineResult<SendMessageResponse> {
        self.post("/v1/message:send", params).await
    }

    /// `GET /v1/tasks/{id}`.
    pub async fn get_task(&self, id: &str, history_length: Option<u32>) -> AgentEngineResult<Task> {
        let mut path = format!("/v1/tasks/{id}");
        if let Some(n) = history_length {
            path.push_str(&format!("?historyLength={n}"));
        }
        self.get(&path).await
    }

    /// `POST /v1/tasks/{id}:cancel`.
    pub async fn cancel_task(&self, id: &str) -> AgentEngineResult<Task> {
        self.post(&format!("/v1/tasks/{id}:cancel"), &serde_json::json!({}))
            .await
    }

    /// `GET /v1/card`, the authenticated extended card.
    pub async fn authenticated_card(&self) -> AgentEngineResult<AgentCard> {
        self.get("/v1/card").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> AgentEngineResult<T> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!("A2A GET {}", url);
        let request = self.authorize(self.client.get(&url));
        decode(request.send().await.map_err(map_send_error)?).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AgentEngineResult<T> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!("A2A POST {}", url);
        let request = self.authorize(self.client.post(&url).json(body));
        decode(request.send().await.map_err(map_send_error)?).await
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn map_send_error(e: reqwest::Error) -> AgentEngineError {
    if e.is_timeout() {
        AgentEngineError::Timeout(format!("A2A request timed out: {e}"))
    } else if e.is_connect() {
        AgentEngineError::Transport(format!("A2A connection failed: {e}"))
    } else {
        AgentEngineError::Transport(format!("A2A request failed: {e}"))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> AgentEngineResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AgentEngineError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AgentEngineError::Transport(format!("failed to read A2A response: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AgentEngineError::InvalidJson(format!("failed to parse A2A response: {e}")))
}
