//! # agent-engines: deploy and call agents on Agent Engine
//!
//! This crate is the client runtime for the Agent Engine service (the
//! `reasoningEngines` resource of the `v1beta1` REST surface). It takes a
//! local agent object, packages it, deploys it, and hands back a handle whose
//! methods forward to the deployed agent.
//!
//! ## Overview
//!
//! A deployment goes through these stages:
//! - **Schema generation**: every published method gets a JSON schema
//!   ([`schema`])
//! - **Operation registry**: methods come from `register_operations` or are
//!   probed by canonical name ([`registry`])
//! - **Requirements**: imports are scanned and reconciled against the
//!   declared requirements ([`requirements`])
//! - **Packaging**: the object blob, requirements and extra packages are
//!   staged in a bucket ([`packaging`], [`storage`])
//! - **Deployment request**: the resource payload and update mask are built
//!   from the options ([`deployment`])
//! - **Long-running operations**: create, update and delete are awaited
//!   ([`lro`])
//! - **Method synthesis**: the echoed schemas become callable methods on the
//!   returned handle ([`methods`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use agent_engines::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("my-project", "us-central1")
//!         .with_staging_bucket("gs://my-bucket")
//!         .with_access_token("ya29.token")
//!         .build()?;
//!
//!     let agent = AgentBuilder::new("EchoAgent", b"<serialized agent>".to_vec())
//!         .with_method(
//!             "query",
//!             Callable::method(vec![Parameter::new("input", Some(TypeAnnotation::Str))]),
//!         )
//!         .build();
//!
//!     let engine = client
//!         .create(
//!             Some(&agent),
//!             AgentEngineOptions::new()
//!                 .with_display_name("echo")
//!                 .with_requirements(vec!["requests==2.32.3"]),
//!         )
//!         .await?;
//!
//!     if let Some(query) = engine.method("query").and_then(|m| m.as_async().cloned()) {
//!         let output = query.call(json!({"input": "hello"})).await?;
//!         println!("{output}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`AgentEngines`]: the façade with `create`, `get`, `list`, `update` and
//!   `delete`, each with a `_blocking` twin
//! - [`AgentEngine`]: a deployed agent with its bound methods
//! - [`transport::Transport`]: the seam to the service;
//!   [`transport::RestTransport`] is the `reqwest` implementation
//! - [`storage::ObjectStore`]: the seam to the staging bucket;
//!   [`storage::GcsObjectStore`] talks to Cloud Storage
//! - [`a2a::A2aRestClient`]: HTTP+JSON client used by `a2a_extension`
//!   methods

pub mod a2a;
pub mod agent;
mod blocking;
pub mod builders;
pub mod config;
pub mod deployment;
pub mod engines;
pub mod error;
pub mod lro;
pub mod methods;
pub mod packaging;
pub mod registry;
pub mod requirements;
pub mod resource;
pub mod schema;
pub mod storage;
pub mod stream;
pub mod transport;
pub mod types;
pub mod validation;

/// Prelude module that re-exports commonly used types and traits.
///
/// ```
/// use agent_engines::prelude::*;
///
/// let options = AgentEngineOptions::new().with_display_name("demo");
/// assert_eq!(options.display_name.as_deref(), Some("demo"));
/// ```
pub mod prelude {
    pub use crate::agent::{
        AgentObject, Callable, Field, Member, MemberKind, Parameter, ParameterKind, Receiver,
        TypeAnnotation,
    };
    pub use crate::builders::{AgentBuilder, ClientBuilder};
    pub use crate::config::ClientConfig;
    pub use crate::deployment::{AgentEngineOptions, EnvVars};
    pub use crate::engines::{AgentEngine, AgentEngines};
    pub use crate::error::{AgentEngineError, AgentEngineResult};
    pub use crate::methods::BoundMethod;
    pub use crate::packaging::BuildOptions;
    pub use crate::requirements::{InstalledPackages, Requirements};
    pub use crate::types::{AgentFramework, ApiMode};
}

// Re-export core types at crate root for convenience.
pub use builders::{AgentBuilder, ClientBuilder};
pub use deployment::AgentEngineOptions;
pub use engines::{AgentEngine, AgentEngines};
pub use error::{AgentEngineError, AgentEngineResult};
