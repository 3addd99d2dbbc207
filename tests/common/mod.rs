//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_engines::agent::{Callable, Parameter, TypeAnnotation};
use agent_engines::error::{AgentEngineError, AgentEngineResult};
use agent_engines::storage::{InMemoryObjectStore, ObjectStore};
use agent_engines::transport::{ByteStream, Transport};
use agent_engines::types::{
    FieldMask, ListReasoningEnginesResponse, Operation, QueryRequest, ReasoningEngine,
    ReasoningEngineSpec, Status,
};
use agent_engines::{AgentBuilder, AgentEngines, ClientBuilder};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

pub const PROJECT: &str = "test-project";
pub const LOCATION: &str = "us-central1";
pub const BUCKET: &str = "gs://test-bucket";

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

/// Everything the mock transport saw, plus the knobs tests turn.
#[derive(Default)]
pub struct MockState {
    pub engines: BTreeMap<String, ReasoningEngine>,
    pub operations: BTreeMap<String, Operation>,
    pub creates: Vec<ReasoningEngine>,
    pub updates: Vec<(ReasoningEngine, FieldMask)>,
    pub deletes: Vec<(String, bool)>,
    pub queries: Vec<(String, QueryRequest)>,
    pub stream_calls: Vec<(String, QueryRequest, bool)>,
    pub operation_polls: usize,
    /// Replaces the class methods the service echoes back.
    pub echoed_class_methods: Option<Vec<Value>>,
    /// Makes every create/update operation finish with this error.
    pub operation_error: Option<Status>,
    /// Body served by `stream_query`.
    pub stream_body: Vec<u8>,
    /// Send the body as one chunk, then hold the stream open.
    pub stream_never_ends: bool,
    /// Resources per list page.
    pub page_size: usize,
    /// Base URL `a2a_base_url` builds on.
    pub a2a_endpoint: String,
    next_id: u32,
}

/// In-memory stand-in for the Agent Engine service.
///
/// Operations finish on their first poll. Updates apply only the fields
/// named by the mask.
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                page_size: 2,
                a2a_endpoint: "http://127.0.0.1:9".to_string(),
                stream_body: b"{\"chunk\": 1}\n{\"chunk\": 2}\n".to_vec(),
                ..Default::default()
            }),
        })
    }

    /// Run `f` with the state locked.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Seed a resource directly.
    pub fn insert_engine(&self, engine: ReasoningEngine) {
        self.with_state(|s| {
            s.engines.insert(engine.name.clone(), engine);
        });
    }

    fn finish_later(state: &mut MockState, name: String, response: Value) -> Operation {
        let finished = Operation {
            name: name.clone(),
            done: true,
            response: Some(response),
            error: state.operation_error.clone(),
            ..Default::default()
        };
        state.operations.insert(name.clone(), finished);
        Operation {
            name,
            done: false,
            ..Default::default()
        }
    }
}

fn apply_mask(stored: &mut ReasoningEngine, request: &ReasoningEngine, mask: &FieldMask) {
    let empty = ReasoningEngineSpec::default();
    let incoming = request.spec.as_ref().unwrap_or(&empty);
    for path in mask.paths() {
        match path.as_str() {
            "display_name" => stored.display_name = request.display_name.clone(),
            "description" => stored.description = request.description.clone(),
            "encryption_spec" => stored.encryption_spec = request.encryption_spec.clone(),
            p if p.starts_with("spec.") => {
                let spec = stored.spec.get_or_insert_with(Default::default);
                match p {
                    "spec.class_methods" => spec.class_methods = incoming.class_methods.clone(),
                    "spec.agent_framework" => spec.agent_framework = incoming.agent_framework,
                    "spec.service_account" => {
                        spec.service_account = incoming.service_account.clone()
                    }
                    p if p.starts_with("spec.package_spec") => {
                        spec.package_spec = incoming.package_spec.clone()
                    }
                    p if p.starts_with("spec.deployment_spec") => {
                        spec.deployment_spec = incoming.deployment_spec.clone()
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_reasoning_engine(
        &self,
        parent: &str,
        engine: &ReasoningEngine,
    ) -> AgentEngineResult<Operation> {
        self.with_state(|s| {
            s.creates.push(engine.clone());
            s.next_id += 1;
            let name = format!("{parent}/reasoningEngines/{}", s.next_id);
            let mut stored = engine.clone();
            stored.name = name.clone();
            if let Some(methods) = s.echoed_class_methods.clone() {
                stored.spec.get_or_insert_with(Default::default).class_methods = methods;
            }
            let response = serde_json::to_value(&stored).unwrap();
            if s.operation_error.is_none() {
                s.engines.insert(name.clone(), stored);
            }
            let op_name = format!("{name}/operations/create-{}", s.next_id);
            Ok(Self::finish_later(s, op_name, response))
        })
    }

    async fn get_reasoning_engine(&self, name: &str) -> AgentEngineResult<ReasoningEngine> {
        self.with_state(|s| {
            s.engines
                .get(name)
                .cloned()
                .ok_or_else(|| AgentEngineError::NotFound(name.to_string()))
        })
    }

    async fn list_reasoning_engines(
        &self,
        _parent: &str,
        _filter: Option<&str>,
        page_token: Option<&str>,
    ) -> AgentEngineResult<ListReasoningEnginesResponse> {
        self.with_state(|s| {
            let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let all: Vec<_> = s.engines.values().cloned().collect();
            let end = (start + s.page_size).min(all.len());
            Ok(ListReasoningEnginesResponse {
                reasoning_engines: all[start..end].to_vec(),
                next_page_token: (end < all.len()).then(|| end.to_string()),
            })
        })
    }

    async fn update_reasoning_engine(
        &self,
        engine: &ReasoningEngine,
        update_mask: &FieldMask,
    ) -> AgentEngineResult<Operation> {
        self.with_state(|s| {
            s.updates.push((engine.clone(), update_mask.clone()));
            let echoed = s.echoed_class_methods.clone();
            let stored = s
                .engines
                .get_mut(&engine.name)
                .ok_or_else(|| AgentEngineError::NotFound(engine.name.clone()))?;
            apply_mask(stored, engine, update_mask);
            if let (Some(methods), true) = (echoed, update_mask.contains("spec.class_methods")) {
                stored.spec.get_or_insert_with(Default::default).class_methods = methods;
            }
            let response = serde_json::to_value(&*stored).unwrap();
            let op_name = format!("{}/operations/update-{}", engine.name, s.updates.len());
            Ok(Self::finish_later(s, op_name, response))
        })
    }

    async fn delete_reasoning_engine(
        &self,
        name: &str,
        force: bool,
    ) -> AgentEngineResult<Operation> {
        self.with_state(|s| {
            s.deletes.push((name.to_string(), force));
            s.engines
                .remove(name)
                .ok_or_else(|| AgentEngineError::NotFound(name.to_string()))?;
            Ok(Operation {
                name: format!("{name}/operations/delete"),
                done: true,
                ..Default::default()
            })
        })
    }

    async fn get_operation(&self, name: &str) -> AgentEngineResult<Operation> {
        self.with_state(|s| {
            s.operation_polls += 1;
            s.operations
                .get(name)
                .cloned()
                .ok_or_else(|| AgentEngineError::NotFound(name.to_string()))
        })
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> AgentEngineResult<Value> {
        self.with_state(|s| {
            s.queries.push((name.to_string(), request.clone()));
            Ok(json!({"output": {"method": request.class_method, "echo": request.input}}))
        })
    }

    async fn stream_query(
        &self,
        name: &str,
        request: &QueryRequest,
        sse: bool,
    ) -> AgentEngineResult<ByteStream> {
        let (body, never_ends) = self.with_state(|s| {
            s.stream_calls
                .push((name.to_string(), request.clone(), sse));
            (s.stream_body.clone(), s.stream_never_ends)
        });
        if never_ends {
            let first = b"{\"chunk\": 1}\n".to_vec();
            return Ok(stream::once(async move { Ok(first) })
                .chain(stream::pending())
                .boxed());
        }
        let (head, tail) = body.split_at(body.len() / 2);
        let chunks: Vec<AgentEngineResult<Vec<u8>>> = vec![Ok(head.to_vec()), Ok(tail.to_vec())];
        Ok(stream::iter(chunks).boxed())
    }

    fn a2a_base_url(&self, name: &str) -> String {
        let endpoint = self.with_state(|s| s.a2a_endpoint.clone());
        format!("{endpoint}/{name}/a2a")
    }

    fn access_token(&self) -> Option<String> {
        Some("test-token".to_string())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Client over the mock transport and an in-memory bucket.
pub fn test_client(transport: Arc<MockTransport>, store: Arc<dyn ObjectStore>) -> AgentEngines {
    ClientBuilder::new(PROJECT, LOCATION)
        .with_staging_bucket(BUCKET)
        .with_poll_interval(Duration::from_millis(1))
        .with_transport(transport)
        .with_object_store(store)
        .build()
        .unwrap()
}

/// Mock transport, in-memory store and a client over both.
pub fn test_setup() -> (Arc<MockTransport>, Arc<InMemoryObjectStore>, AgentEngines) {
    let transport = MockTransport::new();
    let store = Arc::new(InMemoryObjectStore::new());
    let client = test_client(transport.clone(), store.clone());
    (transport, store, client)
}

/// Full resource name for `id` under the test project.
pub fn engine_name(id: u32) -> String {
    format!("projects/{PROJECT}/locations/{LOCATION}/reasoningEngines/{id}")
}

pub fn text_method() -> Callable {
    Callable::method(vec![Parameter::new("input", Some(TypeAnnotation::Str))])
}

/// An agent publishing `query` only.
pub fn query_agent() -> AgentBuilder {
    AgentBuilder::new("QueryAgent", b"query-agent-blob".to_vec()).with_method("query", text_method())
}

/// An agent publishing one method per probed name.
pub fn full_agent() -> AgentBuilder {
    AgentBuilder::new("FullAgent", b"full-agent-blob".to_vec())
        .with_method("query", text_method())
        .with_method("async_query", text_method())
        .with_method("stream_query", text_method())
        .with_method("async_stream_query", text_method())
}

// ---------------------------------------------------------------------------
// HTTP test server
// ---------------------------------------------------------------------------

/// Start `app` on a random port. Returns the base URL and a handle to shut it down.
pub async fn start_test_server(app: axum::Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Brief wait for the server to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (base_url, handle)
}

/// A request as the test server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub uri: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: String,
}

/// Shared log of recorded requests.
pub type RequestLog = Arc<Mutex<Vec<RecordedRequest>>>;

pub fn record(
    log: &RequestLog,
    method: &axum::http::Method,
    uri: &axum::http::Uri,
    headers: &axum::http::HeaderMap,
    body: &str,
) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    log.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        authorization: header("authorization"),
        accept: header("accept"),
        body: body.to_string(),
    });
}
