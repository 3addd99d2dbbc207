//! The public façade: create, get, list, update and delete deployed agents.
//!
//! [`AgentEngines`] owns the configuration, the transport and the staging
//! store. Every call that returns a deployed agent hands back an
//! [`AgentEngine`] handle with the agent's class methods bound on it.
//!
//! Each operation has an async form and a `_blocking` form. The blocking
//! forms poll long-running operations with a thread sleep. On a
//! multi-threaded runtime they block through `block_in_place`; on a
//! current-thread runtime they refuse to run.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::AgentObject;
use crate::blocking::BlockingRuntime;
use crate::config::ClientConfig;
use crate::deployment::{self, AgentEngineOptions, DeploymentInputs};
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::lro;
use crate::methods::{BoundMethod, MethodTable};
use crate::packaging::{self, PackageInputs, StagedArtifacts, DEFAULT_DIR_NAME};
use crate::registry;
use crate::requirements::{self, InstalledPackages};
use crate::resource::ResourceName;
use crate::storage::{ObjectStore, StagingLocation};
use crate::transport::Transport;
use crate::types::{Operation, ReasoningEngine};
use crate::validation;

/// Client for deploying and managing agents.
///
/// Cheap to clone; clones share the transport and the store.
#[derive(Clone)]
pub struct AgentEngines {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    packages: Option<InstalledPackages>,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for AgentEngines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEngines")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What a create or update call is about to send.
struct Prepared {
    engine: ReasoningEngine,
    mask: Option<crate::types::FieldMask>,
}

impl AgentEngines {
    /// Client over an explicit transport and store.
    ///
    /// Most callers use [`ClientBuilder`](crate::builders::ClientBuilder).
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            packages: None,
            cancel: None,
        }
    }

    /// Reconcile requirements against `packages` before staging.
    pub fn with_installed_packages(mut self, packages: InstalledPackages) -> Self {
        self.packages = Some(packages);
        self
    }

    /// Stop waiting on long-running operations when `token` fires.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The transport shared by every handle.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // -----------------------------------------------------------------------
    // Async
    // -----------------------------------------------------------------------

    /// Deploy `agent` (or register a display-only resource when `None`).
    ///
    /// Validation, requirement reconciliation and schema generation happen
    /// before anything is uploaded; the operation is awaited and the created
    /// resource is fetched and bound.
    pub async fn create(
        &self,
        agent: Option<&dyn AgentObject>,
        options: AgentEngineOptions,
    ) -> AgentEngineResult<AgentEngine> {
        let operation = self.start_create(agent, &options).await?;
        let operation = self.wait(operation).await?;
        self.finish(operation, None).await
    }

    /// Fetch a deployed agent by full name or bare id.
    pub async fn get(&self, name: &str) -> AgentEngineResult<AgentEngine> {
        let name = ResourceName::resolve(name, &self.config)?.to_string();
        let resource = self.transport.get_reasoning_engine(&name).await?;
        Ok(AgentEngine::from_resource(self.clone(), resource))
    }

    /// List deployed agents in the configured project and location,
    /// following every page.
    pub async fn list(&self, filter: Option<&str>) -> AgentEngineResult<Vec<AgentEngine>> {
        let parent = self.config.parent();
        let mut engines = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .transport
                .list_reasoning_engines(&parent, filter, page_token.as_deref())
                .await?;
            engines.extend(
                page.reasoning_engines
                    .into_iter()
                    .map(|r| AgentEngine::from_resource(self.clone(), r)),
            );
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!("Listed {} agent engines under {}", engines.len(), parent);
        Ok(engines)
    }

    /// Update the deployed agent `name`. Returns a freshly bound handle.
    pub async fn update(
        &self,
        name: &str,
        agent: Option<&dyn AgentObject>,
        options: AgentEngineOptions,
    ) -> AgentEngineResult<AgentEngine> {
        let handle = AgentEngine::from_resource(
            self.clone(),
            ReasoningEngine {
                name: ResourceName::resolve(name, &self.config)?.to_string(),
                ..Default::default()
            },
        );
        handle.update(agent, options).await?;
        Ok(handle)
    }

    /// Delete the deployed agent `name`. With `force`, child resources are
    /// deleted too.
    pub async fn delete(&self, name: &str, force: bool) -> AgentEngineResult<()> {
        let name = ResourceName::resolve(name, &self.config)?.to_string();
        info!("Deleting AgentEngine resource: {}", name);
        let operation = self.transport.delete_reasoning_engine(&name, force).await?;
        debug!("Delete AgentEngine backing LRO: {}", operation.name);
        self.wait(operation).await?.into_result()?;
        info!("AgentEngine resource {} deleted", name);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    /// Blocking [`create`](Self::create).
    pub fn create_blocking(
        &self,
        agent: Option<&dyn AgentObject>,
        options: AgentEngineOptions,
    ) -> AgentEngineResult<AgentEngine> {
        let runtime = blocking_runtime("create")?;
        let operation = runtime.block_on(self.start_create(agent, &options))?;
        let operation = self.wait_blocking(&runtime, operation)?;
        runtime.block_on(self.finish(operation, None))
    }

    /// Blocking [`get`](Self::get).
    pub fn get_blocking(&self, name: &str) -> AgentEngineResult<AgentEngine> {
        blocking_runtime("get")?.block_on(self.get(name))
    }

    /// Blocking [`list`](Self::list).
    pub fn list_blocking(&self, filter: Option<&str>) -> AgentEngineResult<Vec<AgentEngine>> {
        blocking_runtime("list")?.block_on(self.list(filter))
    }

    /// Blocking [`update`](Self::update).
    pub fn update_blocking(
        &self,
        name: &str,
        agent: Option<&dyn AgentObject>,
        options: AgentEngineOptions,
    ) -> AgentEngineResult<AgentEngine> {
        let runtime = blocking_runtime("update")?;
        let name = ResourceName::resolve(name, &self.config)?.to_string();
        let operation = runtime.block_on(self.start_update(&name, agent, &options))?;
        let operation = self.wait_blocking(&runtime, operation)?;
        runtime.block_on(self.finish(operation, Some(&name)))
    }

    /// Blocking [`delete`](Self::delete).
    pub fn delete_blocking(&self, name: &str, force: bool) -> AgentEngineResult<()> {
        let runtime = blocking_runtime("delete")?;
        let name = ResourceName::resolve(name, &self.config)?.to_string();
        let operation = runtime.block_on(self.transport.delete_reasoning_engine(&name, force))?;
        self.wait_blocking(&runtime, operation)?.into_result()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn start_create(
        &self,
        agent: Option<&dyn AgentObject>,
        options: &AgentEngineOptions,
    ) -> AgentEngineResult<Operation> {
        let prepared = self.prepare(None, agent, options).await?;
        info!("Creating AgentEngine");
        let operation = self
            .transport
            .create_reasoning_engine(&self.config.parent(), &prepared.engine)
            .await?;
        info!("Create AgentEngine backing LRO: {}", operation.name);
        Ok(operation)
    }

    async fn start_update(
        &self,
        name: &str,
        agent: Option<&dyn AgentObject>,
        options: &AgentEngineOptions,
    ) -> AgentEngineResult<Operation> {
        let prepared = self.prepare(Some(name), agent, options).await?;
        let mask = prepared.mask.unwrap_or_default();
        info!("Updating AgentEngine {} (update mask: {})", name, mask.to_query());
        let operation = self
            .transport
            .update_reasoning_engine(&prepared.engine, &mask)
            .await?;
        info!("Update AgentEngine backing LRO: {}", operation.name);
        Ok(operation)
    }

    /// Validate, stage and build the payload. `name` selects update.
    async fn prepare(
        &self,
        name: Option<&str>,
        agent: Option<&dyn AgentObject>,
        options: &AgentEngineOptions,
    ) -> AgentEngineResult<Prepared> {
        options.validate(agent.is_some())?;
        validation::validate_python_version(&self.config.python_version)?;
        if let Some(vars) = &options.env_vars {
            vars.resolve()?;
        }

        let mut requirement_lines = None;
        let mut class_methods: Option<Vec<Value>> = None;
        if let Some(agent) = agent {
            if self.config.staging_bucket.is_none() {
                return Err(AgentEngineError::config(
                    "staging_bucket must be set to deploy an agent object",
                ));
            }
            requirement_lines = match options.requirements.clone() {
                Some(declared) => {
                    let lines = declared.into_lines()?;
                    Some(match &self.packages {
                        Some(packages) => requirements::reconcile(agent, lines, packages),
                        None => lines,
                    })
                }
                None => None,
            };

            let schemas = registry::class_method_schemas(agent)?;
            class_methods = Some(
                schemas
                    .iter()
                    .map(|s| s.to_value())
                    .collect::<AgentEngineResult<Vec<_>>>()?,
            );
        }

        let artifacts = match (agent, &self.config.staging_bucket) {
            (Some(agent), Some(bucket)) => {
                let dir = options.gcs_dir_name.as_deref().unwrap_or(DEFAULT_DIR_NAME);
                let location = StagingLocation::new(bucket, dir)?;
                packaging::prepare(
                    self.store.as_ref(),
                    &location,
                    PackageInputs {
                        object: Some(agent),
                        requirements: requirement_lines.as_deref(),
                        extra_packages: options.extra_packages.as_deref(),
                        build_options: options.build_options.as_ref(),
                    },
                )
                .await?
            }
            _ => StagedArtifacts::default(),
        };

        let inputs = DeploymentInputs {
            options,
            artifacts: &artifacts,
            class_methods: class_methods.as_deref(),
            agent_framework: agent.map(|a| a.agent_framework()),
            python_version: &self.config.python_version,
        };
        match name {
            None => Ok(Prepared {
                engine: deployment::build_create_request(&inputs)?,
                mask: None,
            }),
            Some(name) => {
                let (engine, mask) = deployment::build_update_request(name, &inputs)?;
                Ok(Prepared {
                    engine,
                    mask: Some(mask),
                })
            }
        }
    }

    async fn wait(&self, operation: Operation) -> AgentEngineResult<Operation> {
        if operation.done {
            return Ok(operation);
        }
        let transport = self.transport.clone();
        lro::await_operation(
            &operation.name,
            move |name| {
                let transport = transport.clone();
                async move { transport.get_operation(&name).await }
            },
            self.config.poll_interval,
            self.cancel.clone(),
        )
        .await
    }

    fn wait_blocking(
        &self,
        runtime: &BlockingRuntime,
        operation: Operation,
    ) -> AgentEngineResult<Operation> {
        if operation.done {
            return Ok(operation);
        }
        runtime.run(|| {
            lro::await_operation_blocking(
                &operation.name,
                |name| runtime.block_on(self.transport.get_operation(name)),
                self.config.poll_interval,
            )
        })
    }

    /// Surface the operation's error, fetch the resource and bind it.
    async fn finish(
        &self,
        operation: Operation,
        name: Option<&str>,
    ) -> AgentEngineResult<AgentEngine> {
        let response = operation.clone().into_result()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => engine_name(&operation, response.as_ref())?,
        };
        let resource = self.transport.get_reasoning_engine(&name).await?;
        info!("AgentEngine ready. Resource name: {}", resource.name);
        info!(
            "To use this AgentEngine in another session: client.get(\"{}\")",
            resource.name
        );
        Ok(AgentEngine::from_resource(self.clone(), resource))
    }
}

fn engine_name(operation: &Operation, response: Option<&Value>) -> AgentEngineResult<String> {
    if let Ok(name) = ResourceName::parse(&operation.name) {
        return Ok(name.to_string());
    }
    response
        .and_then(|r| r.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AgentEngineError::InvalidJson(format!(
                "cannot determine the agent engine created by operation {}",
                operation.name
            ))
        })
}

fn blocking_runtime(what: &str) -> AgentEngineResult<BlockingRuntime> {
    BlockingRuntime::for_current_thread(|| {
        format!(
            "`{what}_blocking` cannot be called from inside a current-thread async runtime; \
             use `{what}` instead"
        )
    })
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared state behind an [`AgentEngine`]. Bound methods hold a weak
/// reference to it.
pub(crate) struct EngineInner {
    client: AgentEngines,
    resource: RwLock<ReasoningEngine>,
    methods: RwLock<MethodTable>,
}

impl EngineInner {
    pub(crate) fn target(&self) -> (Arc<dyn Transport>, String) {
        let name = self
            .resource
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .name
            .clone();
        (self.client.transport.clone(), name)
    }
}

/// A deployed agent and the methods it publishes.
///
/// Clones share the same state; an update through one clone is visible
/// through all of them. Do not call methods while an update of the same
/// handle is in flight.
#[derive(Clone)]
pub struct AgentEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for AgentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEngine")
            .field("resource_name", &self.resource_name())
            .field("methods", &self.method_names())
            .finish()
    }
}

impl AgentEngine {
    fn from_resource(client: AgentEngines, resource: ReasoningEngine) -> Self {
        let inner = Arc::new_cyclic(|weak| EngineInner {
            client,
            methods: RwLock::new(MethodTable::bind(resource.class_methods(), weak)),
            resource: RwLock::new(resource),
        });
        Self { inner }
    }

    /// Full resource name.
    pub fn resource_name(&self) -> String {
        self.read_resource(|r| r.name.clone())
    }

    /// Snapshot of the resource as last fetched.
    pub fn api_resource(&self) -> ReasoningEngine {
        self.read_resource(Clone::clone)
    }

    /// Display name.
    pub fn display_name(&self) -> Option<String> {
        self.read_resource(|r| r.display_name.clone())
    }

    /// Class method schemas the service echoed back.
    pub fn operation_schemas(&self) -> Vec<Value> {
        self.read_resource(|r| r.class_methods().to_vec())
    }

    /// Bound method by name.
    pub fn method(&self, name: &str) -> Option<BoundMethod> {
        self.inner
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of the bound methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        self.inner
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
    }

    /// Update this agent in place and rebind its methods.
    pub async fn update(
        &self,
        agent: Option<&dyn AgentObject>,
        options: AgentEngineOptions,
    ) -> AgentEngineResult<()> {
        let client = &self.inner.client;
        let name = self.resource_name();
        let operation = client.start_update(&name, agent, &options).await?;
        let operation = client.wait(operation).await?;
        operation.into_result()?;
        let resource = client.transport.get_reasoning_engine(&name).await?;
        self.replace(resource);
        Ok(())
    }

    /// Blocking [`update`](Self::update).
    pub fn update_blocking(
        &self,
        agent: Option<&dyn AgentObject>,
        options: AgentEngineOptions,
    ) -> AgentEngineResult<()> {
        let client = &self.inner.client;
        let runtime = blocking_runtime("update")?;
        let name = self.resource_name();
        let operation = runtime.block_on(client.start_update(&name, agent, &options))?;
        client.wait_blocking(&runtime, operation)?.into_result()?;
        let resource = runtime.block_on(client.transport.get_reasoning_engine(&name))?;
        self.replace(resource);
        Ok(())
    }

    /// Delete this agent.
    pub async fn delete(&self, force: bool) -> AgentEngineResult<()> {
        self.inner.client.delete(&self.resource_name(), force).await
    }

    /// Re-fetch the resource and rebind its methods.
    pub async fn refresh(&self) -> AgentEngineResult<()> {
        let resource = self
            .inner
            .client
            .transport
            .get_reasoning_engine(&self.resource_name())
            .await?;
        self.replace(resource);
        Ok(())
    }

    fn replace(&self, resource: ReasoningEngine) {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rebind(resource.class_methods(), &weak);
        *self
            .inner
            .resource
            .write()
            .unwrap_or_else(PoisonError::into_inner) = resource;
    }

    fn read_resource<T>(&self, f: impl FnOnce(&ReasoningEngine) -> T) -> T {
        f(&self
            .inner
            .resource
            .read()
            .unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_name_from_operation_or_response() {
        let op = Operation {
            name: "projects/p/locations/l/reasoningEngines/7/operations/9".into(),
            ..Default::default()
        };
        assert_eq!(
            engine_name(&op, None).unwrap(),
            "projects/p/locations/l/reasoningEngines/7"
        );

        let op = Operation {
            name: "projects/p/locations/l/operations/9".into(),
            ..Default::default()
        };
        let response = json!({"name": "projects/p/locations/l/reasoningEngines/8"});
        assert_eq!(
            engine_name(&op, Some(&response)).unwrap(),
            "projects/p/locations/l/reasoningEngines/8"
        );
        assert!(engine_name(&op, None).is_err());
    }
}
