//! Reasoning engine resource names.

use std::fmt;

use crate::config::ClientConfig;
use crate::error::{AgentEngineError, AgentEngineResult};

/// `projects/{project}/locations/{location}/reasoningEngines/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName {
    /// Project id or number.
    pub project: String,
    /// Region.
    pub location: String,
    /// Engine id.
    pub engine_id: String,
}

impl ResourceName {
    /// Parse a full engine name. A trailing `/operations/{id}` is stripped,
    /// which maps an operation name to the engine it belongs to.
    pub fn parse(name: &str) -> AgentEngineResult<Self> {
        let parts: Vec<&str> = name.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            ["projects", project, "locations", location, "reasoningEngines", id, rest @ ..]
                if !project.is_empty()
                    && !location.is_empty()
                    && !id.is_empty()
                    && (rest.is_empty() || (rest.len() == 2 && rest[0] == "operations")) =>
            {
                Ok(Self {
                    project: project.to_string(),
                    location: location.to_string(),
                    engine_id: id.to_string(),
                })
            }
            _ => Err(AgentEngineError::validation(format!(
                "invalid reasoning engine resource name: {name:?}"
            ))),
        }
    }

    /// Resolve a full name or a bare id against the configured project and
    /// location.
    pub fn resolve(name: &str, config: &ClientConfig) -> AgentEngineResult<Self> {
        if name.contains('/') {
            return Self::parse(name);
        }
        if name.is_empty() {
            return Err(AgentEngineError::validation("resource name must not be empty"));
        }
        Ok(Self {
            project: config.project.clone(),
            location: config.location.clone(),
            engine_id: name.to_string(),
        })
    }

    /// `projects/{project}/locations/{location}`.
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/reasoningEngines/{}", self.parent(), self.engine_id)
    }
}
