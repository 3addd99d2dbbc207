//! Client configuration.
//!
//! A [`ClientConfig`] names the project and location every request is scoped
//! to, where artifacts are staged and how the transport talks to the
//! service. It is usually assembled with
//! [`ClientBuilder`](crate::builders::ClientBuilder) or read from the
//! environment with [`ClientConfig::from_env`].

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{AgentEngineError, AgentEngineResult};
use crate::validation;

/// REST API version the transport targets.
pub const API_VERSION: &str = "v1beta1";

/// Python versions the service can run packaged objects with.
pub const SUPPORTED_PYTHON_VERSIONS: [&str; 5] = ["3.9", "3.10", "3.11", "3.12", "3.13"];

/// Python version used when none is configured.
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between long-running operation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Environment variable holding the project id.
pub const ENV_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
/// Environment variable holding the location.
pub const ENV_LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
/// Environment variable holding the staging bucket.
pub const ENV_STAGING_BUCKET: &str = "GOOGLE_CLOUD_STAGING_BUCKET";
/// Environment variable holding a bearer token.
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_CLOUD_ACCESS_TOKEN";

/// Settings shared by every request a client makes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project id or number.
    pub project: String,
    /// Region, e.g. `us-central1`.
    pub location: String,
    /// Override for the service endpoint. Defaults to the regional endpoint.
    pub api_endpoint: Option<String>,
    /// `gs://` bucket artifacts are staged in.
    pub staging_bucket: Option<String>,
    /// `major.minor` Python version the packaged object targets.
    pub python_version: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Interval between operation polls.
    pub poll_interval: Duration,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Bearer token for the service and the staging bucket.
    pub access_token: Option<String>,
}

impl ClientConfig {
    /// Configuration for `project` in `location` with defaults elsewhere.
    pub fn new(project: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            api_endpoint: None,
            staging_bucket: None,
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            headers: HashMap::new(),
            access_token: None,
        }
    }

    /// Read the configuration from `GOOGLE_CLOUD_*` environment variables.
    ///
    /// # Errors
    ///
    /// [`AgentEngineError::Config`] when the project or location is unset.
    pub fn from_env() -> AgentEngineResult<Self> {
        let project = env::var(ENV_PROJECT)
            .map_err(|_| AgentEngineError::config(format!("{ENV_PROJECT} is not set")))?;
        let location = env::var(ENV_LOCATION)
            .map_err(|_| AgentEngineError::config(format!("{ENV_LOCATION} is not set")))?;
        let mut config = Self::new(project, location);
        config.staging_bucket = env::var(ENV_STAGING_BUCKET).ok();
        config.access_token = env::var(ENV_ACCESS_TOKEN).ok();
        Ok(config)
    }

    /// Service endpoint, without a trailing slash.
    pub fn endpoint(&self) -> String {
        match &self.api_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", self.location),
        }
    }

    /// `projects/{project}/locations/{location}`.
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }

    /// Check the settings that do not depend on a particular deployment.
    pub fn validate(&self) -> AgentEngineResult<()> {
        if self.project.is_empty() {
            return Err(AgentEngineError::config("project must not be empty"));
        }
        if self.location.is_empty() {
            return Err(AgentEngineError::config("location must not be empty"));
        }
        validation::validate_python_version(&self.python_version)?;
        if let Some(bucket) = &self.staging_bucket {
            validation::validate_staging_bucket(bucket)?;
        }
        Ok(())
    }
}
