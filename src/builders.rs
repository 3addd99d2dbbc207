//! Builder patterns for clients and agent objects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::a2a::AgentCard;
use crate::agent::{Callable, Member, MemberKind, PackagedAgent};
use crate::config::ClientConfig;
use crate::engines::AgentEngines;
use crate::error::AgentEngineResult;
use crate::requirements::InstalledPackages;
use crate::storage::{GcsObjectStore, ObjectStore};
use crate::transport::{RestTransport, Transport, TransportConfig};
use crate::types::{AgentFramework, OperationTable};

/// Builder for [`AgentEngines`].
///
/// # Example
///
/// ```no_run
/// use agent_engines::builders::ClientBuilder;
///
/// # fn example() -> agent_engines::AgentEngineResult<()> {
/// let client = ClientBuilder::new("my-project", "us-central1")
///     .with_staging_bucket("gs://my-bucket")
///     .with_access_token("ya29.token")
///     .build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn ObjectStore>>,
    packages: Option<InstalledPackages>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Builder for `project` in `location`.
    pub fn new(project: impl Into<String>, location: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(project, location))
    }

    /// Builder starting from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            packages: None,
        }
    }

    /// Set the staging bucket (`gs://...`).
    pub fn with_staging_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.staging_bucket = Some(bucket.into());
        self
    }

    /// Set the bearer token used for the service and the bucket.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    /// Override the service endpoint.
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.api_endpoint = Some(endpoint.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the interval between operation polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }

    /// Set the Python version packaged objects target.
    pub fn with_python_version(mut self, version: impl Into<String>) -> Self {
        self.config.python_version = version.into();
        self
    }

    /// Use a custom transport instead of [`RestTransport`].
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom object store instead of [`GcsObjectStore`].
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Reconcile requirements against this installed-package index.
    pub fn with_installed_packages(mut self, packages: InstalledPackages) -> Self {
        self.packages = Some(packages);
        self
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> AgentEngineResult<AgentEngines> {
        self.config.validate()?;
        let config = self.config;
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(RestTransport::new(
                config.endpoint(),
                TransportConfig {
                    timeout: config.timeout,
                    headers: config.headers.clone(),
                    access_token: config.access_token.clone(),
                },
            )),
        };
        let store = match self.store {
            Some(s) => s,
            None => Arc::new(GcsObjectStore::new(
                config.project.clone(),
                config.location.clone(),
                config.access_token.clone(),
                config.timeout,
            )),
        };
        let mut engines = AgentEngines::new(config, transport, store);
        if let Some(packages) = self.packages {
            engines = engines.with_installed_packages(packages);
        }
        Ok(engines)
    }
}

/// Builder for [`PackagedAgent`].
///
/// # Example
///
/// ```
/// use agent_engines::agent::{Callable, Parameter, TypeAnnotation};
/// use agent_engines::builders::AgentBuilder;
///
/// let agent = AgentBuilder::new("EchoAgent", b"<serialized object>".to_vec())
///     .with_method(
///         "query",
///         Callable::method(vec![Parameter::new("x", Some(TypeAnnotation::Str))]),
///     )
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct AgentBuilder {
    class_name: String,
    payload: Vec<u8>,
    members: Vec<Member>,
    operations: Option<OperationTable>,
    framework: AgentFramework,
    agent_card: Option<AgentCard>,
    modules: HashMap<String, String>,
}

impl AgentBuilder {
    /// Builder for an object of `class_name` serialized as `payload`.
    pub fn new(class_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            class_name: class_name.into(),
            payload,
            members: Vec::new(),
            operations: None,
            framework: AgentFramework::Custom,
            agent_card: None,
            modules: HashMap::new(),
        }
    }

    /// Add a member. A later member with the same name replaces the earlier.
    pub fn with_member(mut self, member: Member) -> Self {
        self.members.retain(|m| m.name != member.name);
        self.members.push(member);
        self
    }

    /// Add a callable member.
    pub fn with_method(self, name: impl Into<String>, callable: Callable) -> Self {
        let name = name.into();
        let module = self.modules.get(&name).cloned();
        self.with_member(Member {
            name,
            module,
            kind: MemberKind::Callable(callable),
        })
    }

    /// Add a non-callable attribute, optionally defined in `module`.
    pub fn with_attribute(self, name: impl Into<String>, module: Option<&str>) -> Self {
        self.with_member(Member {
            name: name.into(),
            module: module.map(str::to_string),
            kind: MemberKind::Attribute,
        })
    }

    /// Record the module a later [`with_method`](Self::with_method) call
    /// for `name` is defined in.
    pub fn with_module(mut self, name: impl Into<String>, module: impl Into<String>) -> Self {
        let name = name.into();
        let module = module.into();
        if let Some(member) = self.members.iter_mut().find(|m| m.name == name) {
            member.module = Some(module.clone());
        }
        self.modules.insert(name, module);
        self
    }

    /// Declare the operation table explicitly.
    pub fn with_operations(mut self, operations: OperationTable) -> Self {
        self.operations = Some(operations);
        self
    }

    /// Set the framework.
    pub fn with_framework(mut self, framework: AgentFramework) -> Self {
        self.framework = framework;
        self
    }

    /// Publish an A2A card with the object's `a2a_extension` methods.
    pub fn with_agent_card(mut self, card: AgentCard) -> Self {
        self.agent_card = Some(card);
        self
    }

    /// Build the agent.
    pub fn build(self) -> PackagedAgent {
        PackagedAgent {
            class_name: self.class_name,
            members: self.members,
            operations: self.operations,
            framework: self.framework,
            agent_card: self.agent_card,
            payload: self.payload,
        }
    }
}
