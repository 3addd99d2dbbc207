//! Create and update payloads.
//!
//! [`build_create_request`] assembles the full resource for `create`.
//! [`build_update_request`] assembles the partial resource for `update`
//! together with its field mask. The mask lists exactly the fields the caller
//! specified, drawn from [`UPDATE_MASK_PATHS`] and in that order.

use std::collections::BTreeMap;
use std::env;

use serde_json::Value;

use crate::error::{AgentEngineError, AgentEngineResult};
use crate::packaging::{BuildOptions, StagedArtifacts};
use crate::requirements::Requirements;
use crate::types::{
    AgentFramework, DeploymentSpec, EncryptionSpec, EnvVar, FieldMask, PackageSpec,
    PscInterfaceConfig, ReasoningEngine, ReasoningEngineSpec, SecretEnvVar, SecretRef,
};
use crate::validation;

/// Every path an update mask may contain, in mask order.
pub const UPDATE_MASK_PATHS: [&str; 16] = [
    "display_name",
    "description",
    "spec.package_spec.pickle_object_gcs_uri",
    "spec.package_spec.requirements_gcs_uri",
    "spec.package_spec.dependency_files_gcs_uri",
    "spec.class_methods",
    "spec.agent_framework",
    "spec.deployment_spec.env",
    "spec.deployment_spec.secret_env",
    "spec.deployment_spec.resource_limits",
    "spec.deployment_spec.min_instances",
    "spec.deployment_spec.max_instances",
    "spec.deployment_spec.container_concurrency",
    "spec.deployment_spec.psc_interface_config",
    "spec.service_account",
    "encryption_spec",
];

// ---------------------------------------------------------------------------
// Environment variables
// ---------------------------------------------------------------------------

/// Value of one environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Literal value.
    Plain(String),
    /// Reference to a secret.
    Secret(SecretRef),
}

/// Environment variables for the deployed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvVars {
    /// Explicit values.
    Map(BTreeMap<String, EnvValue>),
    /// Names copied from the local process environment.
    Names(Vec<String>),
}

impl Default for EnvVars {
    fn default() -> Self {
        EnvVars::Map(BTreeMap::new())
    }
}

impl EnvVars {
    /// Empty map form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names copied from the local environment when the request is built.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EnvVars::Names(names.into_iter().map(Into::into).collect())
    }

    /// Add a literal value. Converts the names form into the map form.
    pub fn plain(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name.into(), EnvValue::Plain(value.into()))
    }

    /// Add a secret reference. Converts the names form into the map form.
    pub fn secret(
        self,
        name: impl Into<String>,
        secret: impl Into<String>,
        version: Option<&str>,
    ) -> Self {
        self.insert(
            name.into(),
            EnvValue::Secret(SecretRef {
                secret: secret.into(),
                version: version.map(str::to_string),
            }),
        )
    }

    fn insert(self, name: String, value: EnvValue) -> Self {
        let mut map = match self {
            EnvVars::Map(map) => map,
            EnvVars::Names(_) => BTreeMap::new(),
        };
        map.insert(name, value);
        EnvVars::Map(map)
    }

    /// Parse the untyped form: an object of strings and `{secret, version}`
    /// objects, or an array of names.
    ///
    /// # Errors
    ///
    /// [`AgentEngineError::Config`] for any other shape.
    pub fn from_value(value: Value) -> AgentEngineResult<Self> {
        match value {
            Value::Object(entries) => {
                let mut map = BTreeMap::new();
                for (name, value) in entries {
                    let parsed = match value {
                        Value::String(s) => EnvValue::Plain(s),
                        Value::Object(ref obj) => {
                            let secret = obj.get("secret").and_then(Value::as_str);
                            let version = obj.get("version");
                            match (secret, version) {
                                (Some(secret), None | Some(Value::Null)) => {
                                    EnvValue::Secret(SecretRef {
                                        secret: secret.to_string(),
                                        version: None,
                                    })
                                }
                                (Some(secret), Some(Value::String(v))) => {
                                    EnvValue::Secret(SecretRef {
                                        secret: secret.to_string(),
                                        version: Some(v.clone()),
                                    })
                                }
                                _ => return Err(env_type_error(&name, &value)),
                            }
                        }
                        other => return Err(env_type_error(&name, &other)),
                    };
                    map.insert(name, parsed);
                }
                Ok(EnvVars::Map(map))
            }
            Value::Array(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => names.push(s),
                        other => {
                            return Err(AgentEngineError::config(format!(
                                "env_vars names must be strings, got {other}"
                            )))
                        }
                    }
                }
                Ok(EnvVars::Names(names))
            }
            other => Err(AgentEngineError::config(format!(
                "env_vars must be a map or a list of names, got {other}"
            ))),
        }
    }

    /// Split into plain and secret variables.
    ///
    /// # Errors
    ///
    /// [`AgentEngineError::Config`] when a name in the names form is not set
    /// in the local environment.
    pub fn resolve(&self) -> AgentEngineResult<(Vec<EnvVar>, Vec<SecretEnvVar>)> {
        let mut plain = Vec::new();
        let mut secrets = Vec::new();
        match self {
            EnvVars::Map(map) => {
                for (name, value) in map {
                    match value {
                        EnvValue::Plain(v) => plain.push(EnvVar {
                            name: name.clone(),
                            value: v.clone(),
                        }),
                        EnvValue::Secret(secret_ref) => secrets.push(SecretEnvVar {
                            name: name.clone(),
                            secret_ref: secret_ref.clone(),
                        }),
                    }
                }
            }
            EnvVars::Names(names) => {
                for name in names {
                    let value = env::var(name).map_err(|_| {
                        AgentEngineError::config(format!(
                            "Environment variable {name} is not defined in the local environment"
                        ))
                    })?;
                    plain.push(EnvVar {
                        name: name.clone(),
                        value,
                    });
                }
            }
        }
        Ok((plain, secrets))
    }
}

fn env_type_error(name: &str, value: &Value) -> AgentEngineError {
    AgentEngineError::config(format!(
        "Unknown value type in env_vars for {name}: expected a string or a secret reference {{secret, version}}, got {value}"
    ))
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Caller-supplied settings for `create` and `update`.
///
/// Every field is optional. On update, a field that is `Some` is written and
/// listed in the field mask; a field that is `None` is left alone.
#[derive(Debug, Clone, Default)]
pub struct AgentEngineOptions {
    /// Display name.
    pub display_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Requirements for the deployed object.
    pub requirements: Option<Requirements>,
    /// Local files and directories shipped with the object.
    pub extra_packages: Option<Vec<String>>,
    /// Build options.
    pub build_options: Option<BuildOptions>,
    /// Environment variables.
    pub env_vars: Option<EnvVars>,
    /// Service account the agent runs as.
    pub service_account: Option<String>,
    /// PSC interface configuration.
    pub psc_interface_config: Option<PscInterfaceConfig>,
    /// Minimum instance count.
    pub min_instances: Option<u32>,
    /// Maximum instance count.
    pub max_instances: Option<u32>,
    /// `{cpu, memory}` limits.
    pub resource_limits: Option<BTreeMap<String, String>>,
    /// Concurrent requests per container.
    pub container_concurrency: Option<u32>,
    /// Customer-managed encryption key.
    pub encryption_spec: Option<EncryptionSpec>,
    /// Staging directory inside the bucket.
    pub gcs_dir_name: Option<String>,
}

impl AgentEngineOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the requirements.
    pub fn with_requirements(mut self, requirements: impl Into<Requirements>) -> Self {
        self.requirements = Some(requirements.into());
        self
    }

    /// Set the extra packages.
    pub fn with_extra_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_packages = Some(packages.into_iter().map(Into::into).collect());
        self
    }

    /// Set the build options.
    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.build_options = Some(options);
        self
    }

    /// Set the environment variables.
    pub fn with_env_vars(mut self, env_vars: EnvVars) -> Self {
        self.env_vars = Some(env_vars);
        self
    }

    /// Set the service account.
    pub fn with_service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = Some(account.into());
        self
    }

    /// Set the PSC interface configuration.
    pub fn with_psc_interface_config(mut self, config: PscInterfaceConfig) -> Self {
        self.psc_interface_config = Some(config);
        self
    }

    /// Set the minimum instance count.
    pub fn with_min_instances(mut self, n: u32) -> Self {
        self.min_instances = Some(n);
        self
    }

    /// Set the maximum instance count.
    pub fn with_max_instances(mut self, n: u32) -> Self {
        self.max_instances = Some(n);
        self
    }

    /// Set `{cpu, memory}` limits.
    pub fn with_resource_limits(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.resource_limits = Some(BTreeMap::from([
            ("cpu".to_string(), cpu.into()),
            ("memory".to_string(), memory.into()),
        ]));
        self
    }

    /// Set the per-container concurrency.
    pub fn with_container_concurrency(mut self, n: u32) -> Self {
        self.container_concurrency = Some(n);
        self
    }

    /// Set the encryption key.
    pub fn with_encryption_key(mut self, kms_key_name: impl Into<String>) -> Self {
        self.encryption_spec = Some(EncryptionSpec {
            kms_key_name: kms_key_name.into(),
        });
        self
    }

    /// Set the staging directory.
    pub fn with_gcs_dir_name(mut self, dir: impl Into<String>) -> Self {
        self.gcs_dir_name = Some(dir.into());
        self
    }

    fn has_deployment_settings(&self) -> bool {
        self.env_vars.is_some()
            || self.psc_interface_config.is_some()
            || self.min_instances.is_some()
            || self.max_instances.is_some()
            || self.resource_limits.is_some()
            || self.container_concurrency.is_some()
            || self.service_account.is_some()
    }

    /// Check the settings that need no remote state: resource limits,
    /// instance bounds, concurrency and agent-dependent fields.
    pub fn validate(&self, has_agent: bool) -> AgentEngineResult<()> {
        if !has_agent && self.requirements.is_some() {
            return Err(AgentEngineError::validation(
                "requirements can only be specified together with an agent object",
            ));
        }
        if !has_agent && self.extra_packages.is_some() {
            return Err(AgentEngineError::validation(
                "extra_packages can only be specified together with an agent object",
            ));
        }
        if !has_agent && self.build_options.is_some() {
            return Err(AgentEngineError::validation(
                "build_options can only be specified together with an agent object",
            ));
        }
        if let Some(limits) = &self.resource_limits {
            validation::validate_resource_limits(limits)?;
        }
        validation::validate_instance_bounds(
            self.min_instances,
            self.max_instances,
            self.psc_interface_config.is_some(),
        )?;
        if let Some(concurrency) = self.container_concurrency {
            validation::validate_container_concurrency(concurrency)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Everything the request builders combine.
#[derive(Debug, Clone, Copy)]
pub struct DeploymentInputs<'a> {
    /// Caller settings.
    pub options: &'a AgentEngineOptions,
    /// Staged artifact URIs.
    pub artifacts: &'a StagedArtifacts,
    /// Class method schemas, present when an agent object was supplied.
    pub class_methods: Option<&'a [Value]>,
    /// Framework of the supplied agent object.
    pub agent_framework: Option<AgentFramework>,
    /// Python version recorded in the package spec.
    pub python_version: &'a str,
}

impl DeploymentInputs<'_> {
    fn has_agent(&self) -> bool {
        self.class_methods.is_some()
    }
}

/// Build the `create` payload.
///
/// Without an agent object only the display metadata (and encryption key)
/// is sent.
pub fn build_create_request(inputs: &DeploymentInputs<'_>) -> AgentEngineResult<ReasoningEngine> {
    let options = inputs.options;
    options.validate(inputs.has_agent())?;
    if !inputs.has_agent() && options.has_deployment_settings() {
        return Err(AgentEngineError::validation(
            "deployment settings can only be specified together with an agent object",
        ));
    }

    let mut engine = ReasoningEngine {
        display_name: options.display_name.clone(),
        description: options.description.clone(),
        encryption_spec: options.encryption_spec.clone(),
        ..Default::default()
    };

    if let Some(class_methods) = inputs.class_methods {
        validation::validate_python_version(inputs.python_version)?;
        let deployment_spec = deployment_spec(options)?;
        engine.spec = Some(ReasoningEngineSpec {
            package_spec: Some(package_spec(inputs)),
            deployment_spec: (!deployment_spec.is_empty()).then_some(deployment_spec),
            class_methods: class_methods.to_vec(),
            agent_framework: Some(inputs.agent_framework.unwrap_or_default()),
            service_account: options.service_account.clone(),
        });
    }
    Ok(engine)
}

/// Build the `update` payload for `name` and its field mask.
///
/// # Errors
///
/// [`AgentEngineError::Validation`] when nothing to update was specified.
pub fn build_update_request(
    name: &str,
    inputs: &DeploymentInputs<'_>,
) -> AgentEngineResult<(ReasoningEngine, FieldMask)> {
    let options = inputs.options;
    options.validate(inputs.has_agent())?;

    let mut mask = FieldMask::new();
    let mut engine = ReasoningEngine {
        name: name.to_string(),
        ..Default::default()
    };
    let mut spec = ReasoningEngineSpec::default();
    let mut has_spec = false;

    if let Some(display_name) = &options.display_name {
        engine.display_name = Some(display_name.clone());
        mask.push("display_name");
    }
    if let Some(description) = &options.description {
        engine.description = Some(description.clone());
        mask.push("description");
    }

    if inputs.has_agent() {
        validation::validate_python_version(inputs.python_version)?;
        spec.package_spec = Some(package_spec(inputs));
        has_spec = true;
        if inputs.artifacts.pickle_uri.is_some() {
            mask.push("spec.package_spec.pickle_object_gcs_uri");
        }
        if inputs.artifacts.requirements_uri.is_some() {
            mask.push("spec.package_spec.requirements_gcs_uri");
        }
        if inputs.artifacts.dependencies_uri.is_some() {
            mask.push("spec.package_spec.dependency_files_gcs_uri");
        }
        spec.class_methods = inputs.class_methods.unwrap_or_default().to_vec();
        spec.agent_framework = Some(inputs.agent_framework.unwrap_or_default());
        mask.push("spec.class_methods");
        mask.push("spec.agent_framework");
    }

    let deployment_spec = deployment_spec(options)?;
    if options.env_vars.is_some() {
        mask.push("spec.deployment_spec.env");
        mask.push("spec.deployment_spec.secret_env");
    }
    if options.resource_limits.is_some() {
        mask.push("spec.deployment_spec.resource_limits");
    }
    if options.min_instances.is_some() {
        mask.push("spec.deployment_spec.min_instances");
    }
    if options.max_instances.is_some() {
        mask.push("spec.deployment_spec.max_instances");
    }
    if options.container_concurrency.is_some() {
        mask.push("spec.deployment_spec.container_concurrency");
    }
    if options.psc_interface_config.is_some() {
        mask.push("spec.deployment_spec.psc_interface_config");
    }
    if !deployment_spec.is_empty() || options.env_vars.is_some() {
        spec.deployment_spec = Some(deployment_spec);
        has_spec = true;
    }
    if let Some(account) = &options.service_account {
        spec.service_account = Some(account.clone());
        has_spec = true;
        mask.push("spec.service_account");
    }
    if has_spec {
        engine.spec = Some(spec);
    }

    if let Some(encryption) = &options.encryption_spec {
        engine.encryption_spec = Some(encryption.clone());
        mask.push("encryption_spec");
    }

    if mask.is_empty() {
        return Err(AgentEngineError::validation(
            "At least one of `agent_engine`, `requirements`, `extra_packages`, `display_name`, \
             `description`, `env_vars`, `build_options`, `service_account`, `psc_interface_config`, \
             `min_instances`, `max_instances`, `resource_limits`, `container_concurrency` or \
             `encryption_spec` must be specified.",
        ));
    }
    Ok((engine, mask))
}

fn package_spec(inputs: &DeploymentInputs<'_>) -> PackageSpec {
    PackageSpec {
        python_version: Some(inputs.python_version.to_string()),
        pickle_object_gcs_uri: inputs.artifacts.pickle_uri.clone(),
        dependency_files_gcs_uri: inputs.artifacts.dependencies_uri.clone(),
        requirements_gcs_uri: inputs.artifacts.requirements_uri.clone(),
    }
}

fn deployment_spec(options: &AgentEngineOptions) -> AgentEngineResult<DeploymentSpec> {
    let (env, secret_env) = match &options.env_vars {
        Some(vars) => vars.resolve()?,
        None => (Vec::new(), Vec::new()),
    };
    Ok(DeploymentSpec {
        env,
        secret_env,
        resource_limits: options.resource_limits.clone(),
        min_instances: options.min_instances,
        max_instances: options.max_instances,
        container_concurrency: options.container_concurrency,
        psc_interface_config: options.psc_interface_config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn staged() -> StagedArtifacts {
        StagedArtifacts {
            pickle_uri: Some("gs://b/agent_engine/agent_engine.pkl".into()),
            requirements_uri: None,
            dependencies_uri: None,
        }
    }

    fn inputs<'a>(
        options: &'a AgentEngineOptions,
        artifacts: &'a StagedArtifacts,
        class_methods: Option<&'a [Value]>,
    ) -> DeploymentInputs<'a> {
        DeploymentInputs {
            options,
            artifacts,
            class_methods,
            agent_framework: class_methods.map(|_| AgentFramework::Custom),
            python_version: "3.12",
        }
    }

    #[test]
    fn env_vars_from_value() {
        let vars = EnvVars::from_value(json!({
            "X": "v",
            "S": {"secret": "s1", "version": "v1"},
        }))
        .unwrap();
        let (plain, secrets) = vars.resolve().unwrap();
        assert_eq!(plain, vec![EnvVar { name: "X".into(), value: "v".into() }]);
        assert_eq!(secrets[0].secret_ref.secret, "s1");
        assert_eq!(secrets[0].secret_ref.version.as_deref(), Some("v1"));

        let err = EnvVars::from_value(json!({"N": 5})).unwrap_err();
        assert!(matches!(err, AgentEngineError::Config { .. }));
        assert!(EnvVars::from_value(json!("X")).is_err());
    }

    #[test]
    fn env_var_names_must_be_set_locally() {
        let err = EnvVars::from_names(["AGENT_ENGINES_SURELY_UNSET_VAR"])
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("AGENT_ENGINES_SURELY_UNSET_VAR"));

        let path = env::var("PATH").unwrap_or_default();
        if !path.is_empty() {
            let (plain, _) = EnvVars::from_names(["PATH"]).resolve().unwrap();
            assert_eq!(plain[0].value, path);
        }
    }

    #[test]
    fn mask_paths_follow_vocabulary_order() {
        let options = AgentEngineOptions::new()
            .with_encryption_key("k")
            .with_max_instances(3)
            .with_description("d");
        let artifacts = StagedArtifacts::default();
        let (_, mask) = build_update_request("n", &inputs(&options, &artifacts, None)).unwrap();
        assert_eq!(
            mask.paths(),
            ["description", "spec.deployment_spec.max_instances", "encryption_spec"]
        );
        let positions: Vec<usize> = mask
            .paths()
            .iter()
            .map(|p| UPDATE_MASK_PATHS.iter().position(|v| v == p).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn agent_update_always_masks_class_methods() {
        let options = AgentEngineOptions::new();
        let artifacts = staged();
        let methods = vec![json!({"name": "query", "api_mode": ""})];
        let (engine, mask) =
            build_update_request("n", &inputs(&options, &artifacts, Some(&methods))).unwrap();
        assert_eq!(
            mask.paths(),
            [
                "spec.package_spec.pickle_object_gcs_uri",
                "spec.class_methods",
                "spec.agent_framework"
            ]
        );
        assert_eq!(engine.class_methods().len(), 1);
    }

    #[test]
    fn empty_update_is_rejected() {
        let options = AgentEngineOptions::new();
        let artifacts = StagedArtifacts::default();
        let err = build_update_request("n", &inputs(&options, &artifacts, None)).unwrap_err();
        assert!(err.to_string().contains("must be specified"));
    }

    #[test]
    fn build_options_need_an_agent() {
        let options = AgentEngineOptions::new().with_build_options(BuildOptions::default());
        let artifacts = StagedArtifacts::default();
        let err = build_update_request("n", &inputs(&options, &artifacts, None)).unwrap_err();
        assert!(err
            .to_string()
            .contains("build_options can only be specified together with an agent object"));
        let err = build_create_request(&inputs(&options, &artifacts, None)).unwrap_err();
        assert!(matches!(err, AgentEngineError::Validation { .. }));
    }

    #[test]
    fn create_without_agent_is_display_only() {
        let options = AgentEngineOptions::new()
            .with_display_name("hello")
            .with_description("world");
        let artifacts = StagedArtifacts::default();
        let engine = build_create_request(&inputs(&options, &artifacts, None)).unwrap();
        assert_eq!(
            engine.to_value().unwrap(),
            json!({"displayName": "hello", "description": "world"})
        );
    }

    #[test]
    fn requirements_need_an_agent() {
        let options = AgentEngineOptions::new().with_requirements(vec!["a==1"]);
        let artifacts = StagedArtifacts::default();
        assert!(matches!(
            build_create_request(&inputs(&options, &artifacts, None)),
            Err(AgentEngineError::Validation { .. })
        ));
        assert!(matches!(
            build_update_request("n", &inputs(&options, &artifacts, None)),
            Err(AgentEngineError::Validation { .. })
        ));
    }

    #[test]
    fn create_validates_resource_limits() {
        let options = AgentEngineOptions::new().with_resource_limits("1", "16Gi");
        let artifacts = staged();
        let methods: Vec<Value> = vec![];
        let err = build_create_request(&inputs(&options, &artifacts, Some(&methods))).unwrap_err();
        assert!(matches!(err, AgentEngineError::Config { .. }));
    }
}
