//! Error types for the Agent Engine client.
//!
//! Configuration and validation problems surface before any remote side
//! effect. Transport failures are propagated from the collaborator. Problems
//! binding a single server-published method are not errors at all: they are
//! logged and the method is left off the handle.

/// Unified error type for deployment, invocation and transport failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentEngineError {
    // -- Local, pre-flight errors --
    /// Invalid client or deployment configuration (staging bucket, python
    /// version, resource limits, env var types).
    #[error("Invalid configuration: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// The user object or deployment arguments failed validation (no
    /// supported operation, unknown registered method, installation script
    /// layout).
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// The agent object could not be serialized, or the staged blob failed
    /// its round-trip load.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message.
        message: String,
    },

    /// A schema could not be produced for one method.
    #[error("Could not generate schema for `{method}`: {message}")]
    SchemaGeneration {
        /// Name of the method whose signature was rejected.
        method: String,
        /// Human-readable error message.
        message: String,
    },

    // -- Remote errors --
    /// The long-running operation finished with an error.
    #[error("Operation failed ({code}): {message}")]
    OperationFailed {
        /// Status code reported by the operation.
        code: i32,
        /// Status message reported by the operation.
        message: String,
    },

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not supported by this transport or method.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    // -- Client/transport-side errors --
    /// Transport-level error (connection failed, request failed, etc.).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or stream timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error with status code and response body.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// Invalid JSON received from the service.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The caller cancelled the wait.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Catch-all for errors that don't fit other categories.
    #[error("{0}")]
    Other(String),
}

/// Convenience result type for Agent Engine operations.
pub type AgentEngineResult<T> = Result<T, AgentEngineError>;

impl AgentEngineError {
    /// Create a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a `Serialization` error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a `SchemaGeneration` error for the named method.
    pub fn schema_generation(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaGeneration {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors raised locally before anything was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AgentEngineError::Config { .. }
                | AgentEngineError::Validation { .. }
                | AgentEngineError::Serialization { .. }
                | AgentEngineError::SchemaGeneration { .. }
                | AgentEngineError::Io(_)
        )
    }
}

impl From<serde_json::Error> for AgentEngineError {
    fn from(err: serde_json::Error) -> Self {
        AgentEngineError::InvalidJson(err.to_string())
    }
}

impl From<std::io::Error> for AgentEngineError {
    fn from(err: std::io::Error) -> Self {
        AgentEngineError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_message() {
        let err = AgentEngineError::validation("no operations");
        match &err {
            AgentEngineError::Validation { message } => assert_eq!(message, "no operations"),
            _ => panic!("wrong variant"),
        }
        assert!(err.to_string().contains("no operations"));
    }

    #[test]
    fn local_errors_are_flagged() {
        assert!(AgentEngineError::config("bad bucket").is_local());
        assert!(AgentEngineError::schema_generation("query", "opaque").is_local());
        assert!(!AgentEngineError::Transport("refused".into()).is_local());
        assert!(!AgentEngineError::OperationFailed {
            code: 3,
            message: "bad".into()
        }
        .is_local());
    }

    #[test]
    fn schema_generation_message_names_method() {
        let err = AgentEngineError::schema_generation("stream_query", "missing receiver");
        assert_eq!(
            err.to_string(),
            "Could not generate schema for `stream_query`: missing receiver"
        );
    }

    #[test]
    fn serde_error_maps_to_invalid_json() {
        let err: AgentEngineError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, AgentEngineError::InvalidJson(_)));
    }
}
