//! Resource and wire types for the Agent Engine REST surface.
//!
//! Resources serialize in the service's camelCase JSON form. The invocation
//! payload ([`QueryRequest`]) keeps the snake_case field names the query
//! endpoints document.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentEngineError, AgentEngineResult};

// ---------------------------------------------------------------------------
// Api modes
// ---------------------------------------------------------------------------

/// Dispatch shape of a deployed method.
///
/// The wire form of [`ApiMode::Unary`] is the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApiMode {
    /// Blocking request/response.
    #[serde(rename = "")]
    Unary,
    /// Awaitable request/response.
    #[serde(rename = "async")]
    Async,
    /// Blocking server stream.
    #[serde(rename = "stream")]
    Stream,
    /// Async server stream.
    #[serde(rename = "async_stream")]
    AsyncStream,
    /// Bidirectional stream fed by an input queue.
    #[serde(rename = "bidi_stream")]
    BidiStream,
    /// Agent-to-Agent protocol extension.
    #[serde(rename = "a2a_extension")]
    A2aExtension,
}

impl ApiMode {
    /// Every supported mode.
    pub const ALL: [ApiMode; 6] = [
        ApiMode::Unary,
        ApiMode::Async,
        ApiMode::Stream,
        ApiMode::AsyncStream,
        ApiMode::BidiStream,
        ApiMode::A2aExtension,
    ];

    /// The string used for this mode on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMode::Unary => "",
            ApiMode::Async => "async",
            ApiMode::Stream => "stream",
            ApiMode::AsyncStream => "async_stream",
            ApiMode::BidiStream => "bidi_stream",
            ApiMode::A2aExtension => "a2a_extension",
        }
    }

    /// Parse a wire string; `None` for unknown modes.
    pub fn from_wire(mode: &str) -> Option<Self> {
        ApiMode::ALL.into_iter().find(|m| m.as_str() == mode)
    }

    /// Canonical method name a user object exposes for this mode.
    pub fn default_method_name(&self) -> &'static str {
        match self {
            ApiMode::Unary => "query",
            ApiMode::Async => "async_query",
            ApiMode::Stream => "stream_query",
            ApiMode::AsyncStream => "async_stream_query",
            ApiMode::BidiStream => "bidi_stream_query",
            ApiMode::A2aExtension => "on_message_send",
        }
    }

    /// Conventional return shape, used in generated method docs.
    pub fn return_type(&self) -> &'static str {
        match self {
            ApiMode::Unary => "serde_json::Value",
            ApiMode::Async => "impl Future<Output = serde_json::Value>",
            ApiMode::Stream => "impl Iterator<Item = serde_json::Value>",
            ApiMode::AsyncStream | ApiMode::BidiStream => {
                "impl Stream<Item = serde_json::Value>"
            }
            ApiMode::A2aExtension => "serde_json::Value",
        }
    }

    /// All wire names, sorted alphabetically.
    pub fn supported_wire_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = ApiMode::ALL.iter().map(|m| m.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Display for ApiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered method table: api mode to method names.
pub type OperationTable = BTreeMap<ApiMode, Vec<String>>;

// ---------------------------------------------------------------------------
// Parameter schema (OpenAPI subset)
// ---------------------------------------------------------------------------

/// JSON-schema primitive types the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// A JSON object.
    Object,
    /// A string.
    String,
    /// An integer.
    Integer,
    /// A floating point number.
    Number,
    /// A boolean.
    Boolean,
    /// An array.
    Array,
}

/// OpenAPI 3 `schema` restricted to the subset class methods use.
///
/// An absent `type` means the value is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Value type, absent when unconstrained.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Object properties, in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Schema>,

    /// Required property names, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Whether `null` is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    /// Element schema for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
}

impl Schema {
    /// Schema with only a type set.
    pub fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Default::default()
        }
    }
}

/// One invokable method of a deployed agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallableSchema {
    /// Method identifier.
    pub name: String,

    /// Doc string of the method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Parameter schema.
    pub parameters: Schema,

    /// Dispatch shape.
    pub api_mode: ApiMode,

    /// JSON-encoded agent card, for `a2a_extension` methods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a2a_agent_card: Option<String>,
}

impl CallableSchema {
    /// Convert to the untyped form stored in `spec.class_methods`.
    pub fn to_value(&self) -> AgentEngineResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ---------------------------------------------------------------------------
// Deployment manifest
// ---------------------------------------------------------------------------

/// Agent framework the deployed object was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentFramework {
    /// Plain user object.
    #[default]
    #[serde(rename = "custom")]
    Custom,
    /// Agent Development Kit.
    #[serde(rename = "google-adk")]
    GoogleAdk,
    /// LangChain.
    #[serde(rename = "langchain")]
    Langchain,
    /// LangGraph.
    #[serde(rename = "langgraph")]
    Langgraph,
    /// AG2.
    #[serde(rename = "ag2")]
    Ag2,
    /// LlamaIndex.
    #[serde(rename = "llama-index")]
    LlamaIndex,
}

/// Where the packaged artifacts live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// `major.minor` of the interpreter the object was packaged for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,

    /// URI of `agent_engine.pkl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickle_object_gcs_uri: Option<String>,

    /// URI of `dependencies.tar.gz`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_files_gcs_uri: Option<String>,

    /// URI of `requirements.txt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements_gcs_uri: Option<String>,
}

/// A plain environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Reference to a secret held by the secret manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Secret id.
    pub secret: String,
    /// Secret version; the service resolves `latest` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// An environment variable populated from a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretEnvVar {
    /// Variable name.
    pub name: String,
    /// Secret to read the value from.
    pub secret_ref: SecretRef,
}

/// Private Service Connect interface configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PscInterfaceConfig {
    /// Network attachment resource name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_attachment: Option<String>,

    /// DNS peering configurations, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_peering_configs: Vec<Value>,
}

/// Runtime settings for the deployed container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Plain environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Secret-backed environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_env: Vec<SecretEnvVar>,

    /// Container resource limits (`cpu`, `memory`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<BTreeMap<String, String>>,

    /// Minimum number of instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<u32>,

    /// Maximum number of instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,

    /// Concurrent requests per container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_concurrency: Option<u32>,

    /// PSC interface configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psc_interface_config: Option<PscInterfaceConfig>,
}

impl DeploymentSpec {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self == &DeploymentSpec::default()
    }
}

/// Customer-managed encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionSpec {
    /// KMS key resource name.
    pub kms_key_name: String,
}

/// The `spec` block of a reasoning engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningEngineSpec {
    /// Packaged artifacts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_spec: Option<PackageSpec>,

    /// Runtime settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_spec: Option<DeploymentSpec>,

    /// Class method schemas, kept untyped because the service echoes back
    /// whatever it stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class_methods: Vec<Value>,

    /// Framework identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_framework: Option<AgentFramework>,

    /// Service account the agent runs as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

/// A deployed agent resource, and the create/update payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningEngine {
    /// Resource name; empty in create payloads.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Spec; absent for display-only resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<ReasoningEngineSpec>,

    /// Encryption settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_spec: Option<EncryptionSpec>,

    /// Server-assigned creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Server-assigned update time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Concurrency token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ReasoningEngine {
    /// Dictionary form of the resource.
    pub fn to_value(&self) -> AgentEngineResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Inverse of [`to_value`](Self::to_value).
    pub fn from_value(value: Value) -> AgentEngineResult<Self> {
        serde_json::from_value(value).map_err(|e| {
            AgentEngineError::InvalidJson(format!("failed to parse reasoning engine: {e}"))
        })
    }

    /// Class methods echoed by the service, or an empty slice.
    pub fn class_methods(&self) -> &[Value] {
        self.spec
            .as_ref()
            .map(|s| s.class_methods.as_slice())
            .unwrap_or(&[])
    }
}

/// One page of `reasoningEngines.list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReasoningEnginesResponse {
    /// Resources on this page.
    #[serde(default)]
    pub reasoning_engines: Vec<ReasoningEngine>,

    /// Token for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Set of dotted paths the service should overwrite on update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    /// Empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path, ignoring duplicates.
    pub fn push(&mut self, path: &str) {
        if !self.contains(path) {
            self.paths.push(path.to_string());
        }
    }

    /// Whether `path` is in the mask.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Paths in insertion order.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// True when no path is set.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Comma-joined form used in the `updateMask` query parameter.
    pub fn to_query(&self) -> String {
        self.paths.join(",")
    }
}

// ---------------------------------------------------------------------------
// Long-running operations
// ---------------------------------------------------------------------------

/// Error status of a finished operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Canonical status code.
    #[serde(default)]
    pub code: i32,
    /// Developer-facing message.
    #[serde(default)]
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Value>,
}

/// A long-running operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation resource name.
    pub name: String,

    /// Whether the operation has finished.
    #[serde(default)]
    pub done: bool,

    /// Service-specific progress metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    /// Result on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Status>,
}

impl Operation {
    /// Turn a finished operation into its result, surfacing `error`.
    pub fn into_result(self) -> AgentEngineResult<Option<Value>> {
        match self.error {
            Some(status) => Err(AgentEngineError::OperationFailed {
                code: status.code,
                message: status.message,
            }),
            None => Ok(self.response),
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Body of `:query` and `:streamQuery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Method to run on the deployed object.
    pub class_method: String,
    /// Keyword arguments.
    pub input: Value,
    /// Ask the service to return every field of the output.
    pub include_all_fields: bool,
}

impl QueryRequest {
    /// Request for `class_method` with the given keyword arguments.
    pub fn new(class_method: impl Into<String>, input: Value) -> Self {
        Self {
            class_method: class_method.into(),
            input,
            include_all_fields: true,
        }
    }
}

/// Extract the `output` field of a unary response, falling back to the whole
/// body when it is absent.
pub fn query_output(response: Value) -> Value {
    match response {
        Value::Object(mut map) => match map.remove("output") {
            Some(output) => output,
            None => Value::Object(map),
        },
        other => other,
    }
}
