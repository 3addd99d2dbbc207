//! Client methods synthesized from the class methods a deployed agent
//! publishes.
//!
//! Each schema entry becomes a [`BoundMethod`] whose variant is the entry's
//! api mode. The method name is captured when the method is bound; calling it
//! sends `{class_method, input, include_all_fields}` through the handle's
//! transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::a2a::{A2aRestClient, AgentCard, SendMessageParams};
use crate::blocking::BlockingRuntime;
use crate::engines::EngineInner;
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::stream::{lazy_stream_query, Framing, ValueStream};
use crate::transport::Transport;
use crate::types::{query_output, ApiMode, QueryRequest};
use crate::validation::is_valid_method_name;

/// The A2A operations an `a2a_extension` method may be named after.
pub const A2A_METHODS: [&str; 4] = [
    "on_message_send",
    "on_get_task",
    "on_cancel_task",
    "handle_authenticated_agent_card",
];

/// Doc string for methods whose schema carries no description.
pub fn default_method_doc(method_name: &str, mode: ApiMode) -> String {
    format!(
        "Runs the Agent Engine to serve the user request.\n\n\
         This will be based on the `.{method_name}(...)` of the object that was passed in \
         when creating the Agent Engine. The method will invoke the `{default}` API client \
         of the object.\n\n\
         Args:\n    input: The keyword arguments of the `.{method_name}(...)` method.\n\n\
         Returns:\n    {return_type}: The response from serving the user request.",
        default = mode.default_method_name(),
        return_type = mode.return_type(),
    )
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MethodCore {
    name: String,
    doc: String,
    handle: Weak<EngineInner>,
}

impl MethodCore {
    fn target(&self) -> AgentEngineResult<(Arc<dyn Transport>, String)> {
        let inner = self.handle.upgrade().ok_or_else(|| {
            AgentEngineError::Other(format!(
                "`{}` is bound to an agent engine handle that no longer exists",
                self.name
            ))
        })?;
        Ok(inner.target())
    }

    fn request(&self, input: Value) -> QueryRequest {
        QueryRequest::new(self.name.clone(), normalize_input(input))
    }

    async fn query(&self, input: Value) -> AgentEngineResult<Value> {
        let (transport, resource) = self.target()?;
        debug!("Calling {} on {}", self.name, resource);
        let response = transport.query(&resource, &self.request(input)).await?;
        Ok(query_output(response))
    }
}

fn normalize_input(input: Value) -> Value {
    match input {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

/// Runtime for the blocking shapes.
///
/// # Errors
///
/// [`AgentEngineError::Config`] on a current-thread async runtime, where
/// blocking on the transport would stall the executor.
fn blocking_runtime(method: &str) -> AgentEngineResult<BlockingRuntime> {
    BlockingRuntime::for_current_thread(|| {
        format!(
            "`{method}` blocks the calling thread and cannot be called from inside a \
             current-thread async runtime; register it with an async api mode instead"
        )
    })
}

// ---------------------------------------------------------------------------
// Dispatch shapes
// ---------------------------------------------------------------------------

/// Blocking request/response (`api_mode = ""`).
#[derive(Debug, Clone)]
pub struct UnaryMethod(MethodCore);

impl UnaryMethod {
    /// Send `input` and block until the `output` of the response arrives.
    pub fn call_blocking(&self, input: Value) -> AgentEngineResult<Value> {
        let runtime = blocking_runtime(&self.0.name)?;
        runtime.block_on(self.0.query(input))
    }
}

/// Awaitable request/response (`api_mode = "async"`).
#[derive(Debug, Clone)]
pub struct AsyncMethod(MethodCore);

impl AsyncMethod {
    /// Send `input` and return the `output` of the response.
    pub async fn call(&self, input: Value) -> AgentEngineResult<Value> {
        self.0.query(input).await
    }
}

/// Blocking server stream (`api_mode = "stream"`).
#[derive(Debug, Clone)]
pub struct StreamMethod(MethodCore);

impl StreamMethod {
    /// Start the call. Nothing is sent until the iterator is first advanced.
    pub fn call_blocking(&self, input: Value) -> AgentEngineResult<BlockingStream> {
        let runtime = blocking_runtime(&self.0.name)?;
        let (transport, resource) = self.0.target()?;
        let stream = lazy_stream_query(
            transport,
            resource,
            self.0.request(input),
            Framing::JsonLines,
        );
        Ok(BlockingStream { runtime, stream })
    }
}

/// Iterator over a server stream, driven by a blocking runtime.
///
/// Finite and not restartable.
pub struct BlockingStream {
    runtime: BlockingRuntime,
    stream: ValueStream,
}

impl std::fmt::Debug for BlockingStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingStream").finish_non_exhaustive()
    }
}

impl Iterator for BlockingStream {
    type Item = AgentEngineResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        use futures::StreamExt;
        let stream = &mut self.stream;
        self.runtime.block_on(stream.next())
    }
}

/// Async server stream (`api_mode = "async_stream"`).
#[derive(Debug, Clone)]
pub struct AsyncStreamMethod(MethodCore);

impl AsyncStreamMethod {
    /// Start the call. Nothing is sent until the stream is first polled.
    pub fn call(&self, input: Value) -> AgentEngineResult<ValueStream> {
        let (transport, resource) = self.0.target()?;
        Ok(lazy_stream_query(
            transport,
            resource,
            self.0.request(input),
            Framing::Sse,
        ))
    }
}

/// Bidirectional stream (`api_mode = "bidi_stream"`).
///
/// Requests are read from the input queue by the transport; responses are
/// handed back as the transport produces them.
#[derive(Debug, Clone)]
pub struct BidiStreamMethod(MethodCore);

impl BidiStreamMethod {
    /// Open the stream, feeding it from `input`.
    pub async fn call(&self, input: mpsc::Receiver<Value>) -> AgentEngineResult<ValueStream> {
        let (transport, resource) = self.0.target()?;
        transport
            .bidi_stream_query(&resource, &self.0.name, input)
            .await
    }
}

/// Agent-to-Agent extension (`api_mode = "a2a_extension"`).
#[derive(Debug, Clone)]
pub struct A2aMethod {
    core: MethodCore,
    card: AgentCard,
}

impl A2aMethod {
    /// The card published with the method.
    pub fn agent_card(&self) -> &AgentCard {
        &self.card
    }

    /// Dispatch `input` to the A2A operation this method is named after.
    ///
    /// `on_message_send` returns a JSON array of responses; the other
    /// operations return a single object.
    pub async fn call(&self, input: Value) -> AgentEngineResult<Value> {
        let (transport, resource) = self.core.target()?;
        let client = A2aRestClient::from_card(
            self.card.clone(),
            transport.a2a_base_url(&resource),
            transport.access_token(),
        )?;
        let input = normalize_input(input);
        match self.core.name.as_str() {
            "on_message_send" => {
                let params: SendMessageParams = serde_json::from_value(input).map_err(|e| {
                    AgentEngineError::validation(format!("invalid on_message_send input: {e}"))
                })?;
                let response = client.send_message(&params).await?;
                Ok(Value::Array(vec![serde_json::to_value(response)?]))
            }
            "on_get_task" => {
                let id = task_id(&input, &self.core.name)?;
                let history = input
                    .get("historyLength")
                    .or_else(|| input.get("history_length"))
                    .and_then(Value::as_u64)
                    .map(|n| n as u32);
                Ok(serde_json::to_value(client.get_task(&id, history).await?)?)
            }
            "on_cancel_task" => {
                let id = task_id(&input, &self.core.name)?;
                Ok(serde_json::to_value(client.cancel_task(&id).await?)?)
            }
            "handle_authenticated_agent_card" => {
                Ok(serde_json::to_value(client.authenticated_card().await?)?)
            }
            other => Err(AgentEngineError::UnsupportedOperation(format!(
                "`{other}` is not an A2A operation; expected one of {}",
                A2A_METHODS.join(", ")
            ))),
        }
    }
}

fn task_id(input: &Value, method: &str) -> AgentEngineResult<String> {
    input
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AgentEngineError::validation(format!("`{method}` requires a task `id`")))
}

// ---------------------------------------------------------------------------
// Bound methods
// ---------------------------------------------------------------------------

/// A method bound to an agent engine handle.
#[derive(Debug, Clone)]
pub enum BoundMethod {
    /// `""`
    Unary(UnaryMethod),
    /// `async`
    Async(AsyncMethod),
    /// `stream`
    Stream(StreamMethod),
    /// `async_stream`
    AsyncStream(AsyncStreamMethod),
    /// `bidi_stream`
    BidiStream(BidiStreamMethod),
    /// `a2a_extension`
    A2a(A2aMethod),
}

impl BoundMethod {
    fn core(&self) -> &MethodCore {
        match self {
            BoundMethod::Unary(m) => &m.0,
            BoundMethod::Async(m) => &m.0,
            BoundMethod::Stream(m) => &m.0,
            BoundMethod::AsyncStream(m) => &m.0,
            BoundMethod::BidiStream(m) => &m.0,
            BoundMethod::A2a(m) => &m.core,
        }
    }

    /// Method name.
    pub fn name(&self) -> &str {
        &self.core().name
    }

    /// Doc string.
    pub fn doc(&self) -> &str {
        &self.core().doc
    }

    /// Dispatch shape.
    pub fn api_mode(&self) -> ApiMode {
        match self {
            BoundMethod::Unary(_) => ApiMode::Unary,
            BoundMethod::Async(_) => ApiMode::Async,
            BoundMethod::Stream(_) => ApiMode::Stream,
            BoundMethod::AsyncStream(_) => ApiMode::AsyncStream,
            BoundMethod::BidiStream(_) => ApiMode::BidiStream,
            BoundMethod::A2a(_) => ApiMode::A2aExtension,
        }
    }

    /// The unary shape, if this is one.
    pub fn as_unary(&self) -> Option<&UnaryMethod> {
        match self {
            BoundMethod::Unary(m) => Some(m),
            _ => None,
        }
    }

    /// The async shape, if this is one.
    pub fn as_async(&self) -> Option<&AsyncMethod> {
        match self {
            BoundMethod::Async(m) => Some(m),
            _ => None,
        }
    }

    /// The stream shape, if this is one.
    pub fn as_stream(&self) -> Option<&StreamMethod> {
        match self {
            BoundMethod::Stream(m) => Some(m),
            _ => None,
        }
    }

    /// The async stream shape, if this is one.
    pub fn as_async_stream(&self) -> Option<&AsyncStreamMethod> {
        match self {
            BoundMethod::AsyncStream(m) => Some(m),
            _ => None,
        }
    }

    /// The bidi stream shape, if this is one.
    pub fn as_bidi_stream(&self) -> Option<&BidiStreamMethod> {
        match self {
            BoundMethod::BidiStream(m) => Some(m),
            _ => None,
        }
    }

    /// The A2A shape, if this is one.
    pub fn as_a2a(&self) -> Option<&A2aMethod> {
        match self {
            BoundMethod::A2a(m) => Some(m),
            _ => None,
        }
    }
}

/// Methods bound on a handle, by name.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: BTreeMap<String, BoundMethod>,
}

impl MethodTable {
    /// Bind every valid entry of `class_methods` to `handle`.
    ///
    /// Entries without a `name` or `api_mode`, with an unknown mode, or with
    /// a name that is not an identifier are logged and skipped.
    pub(crate) fn bind(class_methods: &[Value], handle: &Weak<EngineInner>) -> Self {
        let mut methods = BTreeMap::new();
        for entry in class_methods {
            let Some(method) = synthesize(entry, handle) else {
                continue;
            };
            if methods.contains_key(method.name()) {
                warn!(
                    "Method `{}` is already bound; skipping the duplicate entry {}",
                    method.name(),
                    entry
                );
                continue;
            }
            methods.insert(method.name().to_string(), method);
        }
        Self { methods }
    }

    /// Replace the table with the methods of `class_methods`, dropping names
    /// the new schemas no longer publish.
    pub(crate) fn rebind(&mut self, class_methods: &[Value], handle: &Weak<EngineInner>) {
        let next = Self::bind(class_methods, handle);
        self.methods.retain(|name, _| {
            let keep = next.methods.contains_key(name);
            if !keep {
                debug!("Removing method `{}` no longer published by the agent", name);
            }
            keep
        });
        self.methods.extend(next.methods);
    }

    /// Method by name.
    pub fn get(&self, name: &str) -> Option<&BoundMethod> {
        self.methods.get(name)
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    /// Number of bound methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn synthesize(entry: &Value, handle: &Weak<EngineInner>) -> Option<BoundMethod> {
    let Some(mode) = entry.get("api_mode").and_then(Value::as_str) else {
        warn!(
            "Failed to register API methods: `api_mode` is missing in the class method schema {}",
            entry
        );
        return None;
    };
    let Some(name) = entry.get("name").and_then(Value::as_str) else {
        warn!(
            "Failed to register API methods: `name` is missing in the class method schema {}",
            entry
        );
        return None;
    };
    let Some(mode) = ApiMode::from_wire(mode) else {
        let supported: Vec<String> = ApiMode::supported_wire_names()
            .into_iter()
            .map(|m| format!("`{m}`"))
            .collect();
        warn!(
            "Failed to register API methods: Unsupported api mode: `{}`, supported modes are: {}. Schema: {}",
            mode,
            supported.join(", "),
            entry
        );
        return None;
    };
    if !is_valid_method_name(name) {
        warn!(
            "Failed to register API methods: `{}` is not a valid method name. Schema: {}",
            name, entry
        );
        return None;
    }

    let doc = entry
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_method_doc(name, mode));
    let core = MethodCore {
        name: name.to_string(),
        doc,
        handle: handle.clone(),
    };

    let method = match mode {
        ApiMode::Unary => BoundMethod::Unary(UnaryMethod(core)),
        ApiMode::Async => BoundMethod::Async(AsyncMethod(core)),
        ApiMode::Stream => BoundMethod::Stream(StreamMethod(core)),
        ApiMode::AsyncStream => BoundMethod::AsyncStream(AsyncStreamMethod(core)),
        ApiMode::BidiStream => BoundMethod::BidiStream(BidiStreamMethod(core)),
        ApiMode::A2aExtension => {
            let card = entry
                .get("a2a_agent_card")
                .and_then(Value::as_str)
                .map(serde_json::from_str::<AgentCard>);
            match card {
                Some(Ok(card)) => BoundMethod::A2a(A2aMethod { core, card }),
                Some(Err(e)) => {
                    warn!("Failed to register API methods: invalid agent card for `{}`: {}", name, e);
                    return None;
                }
                None => {
                    warn!(
                        "Failed to register API methods: `a2a_agent_card` is missing for `{}`. Schema: {}",
                        name, entry
                    );
                    return None;
                }
            }
        }
    };
    debug!("Bound method {} ({:?})", name, mode.as_str());
    Some(method)
}
