//! The slice of the A2A v0.3 data model the extension methods exchange.
//!
//! Wire format is the camelCase JSON used by the HTTP+JSON binding.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport label for the HTTP+JSON (REST) binding.
pub const HTTP_JSON_TRANSPORT: &str = "HTTP+JSON";

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Received, not started.
    Submitted,
    /// Being processed.
    Working,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
    /// Canceled.
    Canceled,
    /// Waiting for user input.
    InputRequired,
    /// Rejected by the agent.
    Rejected,
    /// Waiting for authentication.
    AuthRequired,
    /// State not reported.
    Unknown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::InputRequired => "input-required",
            TaskState::Rejected => "rejected",
            TaskState::AuthRequired => "auth-required",
            TaskState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// From the client.
    User,
    /// From the agent.
    Agent,
}

/// Content part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Part {
    /// Text content.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
        /// Part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// File content (bytes or URI), passed through untouched.
    #[serde(rename = "file")]
    File {
        /// The file object.
        file: Value,
        /// Part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Structured data.
    #[serde(rename = "data")]
    Data {
        /// The data.
        data: Value,
        /// Part metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
}

impl Part {
    /// A text part without metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }
}

fn kind_message() -> String {
    "message".to_string()
}

fn kind_task() -> String {
    "task".to_string()
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    pub message_id: String,
    /// Sender.
    pub role: Role,
    /// Always `"message"`.
    #[serde(default = "kind_message")]
    pub kind: String,
    /// Content.
    pub parts: Vec<Part>,
    /// Conversation context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Associated task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// A user message with a single text part and a fresh id.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            kind: kind_message(),
            parts: vec![Part::text(text)],
            context_id: None,
            task_id: None,
            metadata: None,
        }
    }
}

/// Status of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current state.
    pub state: TaskState,
    /// Message attached to the status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// ISO-8601 timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task id.
    pub id: String,
    /// Conversation context.
    pub context_id: String,
    /// Always `"task"`.
    #[serde(default = "kind_task")]
    pub kind: String,
    /// Current status.
    pub status: TaskStatus,
    /// Produced artifacts, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Value>>,
    /// Message history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Parameters of `on_message_send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    /// The message to send.
    pub message: Message,
    /// Send configuration, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Result of a message send: a task or a direct reply.
#[derive(Debug, Clone, PartialEq)]
pub enum SendMessageResponse {
    /// A task was created or updated.
    Task(Task),
    /// A direct message reply.
    Message(Message),
}

impl Serialize for SendMessageResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SendMessageResponse::Task(inner) => inner.serialize(serializer),
            SendMessageResponse::Message(inner) => inner.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for SendMessageResponse {
    // Accepts the REST envelope (`{"task": …}` / `{"message": …}` /
    // `{"msg": …}`) as well as a bare object discriminated by `kind`.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Some(task) = value.get("task") {
            let task = serde_json::from_value(task.clone()).map_err(serde::de::Error::custom)?;
            return Ok(SendMessageResponse::Task(task));
        }
        if let Some(msg) = value.get("message").or_else(|| value.get("msg")) {
            if msg.is_object() {
                let msg = serde_json::from_value(msg.clone()).map_err(serde::de::Error::custom)?;
                return Ok(SendMessageResponse::Message(msg));
            }
        }
        match value.get("kind").and_then(|v| v.as_str()) {
            Some("task") => serde_json::from_value(value)
                .map(SendMessageResponse::Task)
                .map_err(serde::de::Error::custom),
            Some("message") => serde_json::from_value(value)
                .map(SendMessageResponse::Message)
                .map_err(serde::de::Error::custom),
            Some(other) => Err(serde::de::Error::custom(format!(
                "unknown kind '{other}', expected task or message"
            ))),
            None => Err(serde::de::Error::custom(
                "response has neither a task nor a message",
            )),
        }
    }
}

/// A transport interface advertised by a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInterface {
    /// Endpoint URL.
    pub url: String,
    /// Transport label, e.g. `HTTP+JSON`.
    pub transport: String,
}

/// Capabilities declared by a card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Server streaming support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    /// Push notification support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_notifications: Option<bool>,
    /// Protocol extensions, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Value>>,
}

/// A skill advertised by a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    /// Skill id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Agent metadata published alongside `a2a_extension` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Agent name.
    pub name: String,
    /// Agent description.
    pub description: String,
    /// Agent version.
    pub version: String,
    /// Primary URL.
    #[serde(default)]
    pub url: String,
    /// Preferred transport label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_transport: Option<String>,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    /// Additional interfaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_interfaces: Vec<AgentInterface>,
    /// Default input MIME types.
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    /// Default output MIME types.
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    /// Skills.
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    /// Protocol version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Whether an authenticated extended card is served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_authenticated_extended_card: Option<bool>,
}

impl AgentCard {
    /// Minimal card advertising the HTTP+JSON transport without streaming.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            url: String::new(),
            preferred_transport: Some(HTTP_JSON_TRANSPORT.to_string()),
            capabilities: AgentCapabilities {
                streaming: Some(false),
                ..Default::default()
            },
            additional_interfaces: Vec::new(),
            default_input_modes: vec!["text/plain".to_string()],
            default_output_modes: vec!["text/plain".to_string()],
            skills: Vec::new(),
            protocol_version: Some("0.3.0".to_string()),
            supports_authenticated_extended_card: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_message_response_accepts_envelopes() {
        let task = json!({
            "task": {"id": "t1", "contextId": "c1", "status": {"state": "working"}}
        });
        match serde_json::from_value::<SendMessageResponse>(task).unwrap() {
            SendMessageResponse::Task(t) => {
                assert_eq!(t.id, "t1");
                assert_eq!(t.status.state, TaskState::Working);
            }
            other => panic!("expected task, got {other:?}"),
        }

        let msg = json!({
            "msg": {"messageId": "m1", "role": "agent", "parts": [{"kind": "text", "text": "hi"}]}
        });
        assert!(matches!(
            serde_json::from_value::<SendMessageResponse>(msg).unwrap(),
            SendMessageResponse::Message(_)
        ));
    }

    #[test]
    fn send_message_response_accepts_bare_kind() {
        let bare = json!({
            "kind": "task", "id": "t2", "contextId": "c", "status": {"state": "completed"}
        });
        assert!(matches!(
            serde_json::from_value::<SendMessageResponse>(bare).unwrap(),
            SendMessageResponse::Task(_)
        ));
        assert!(serde_json::from_value::<SendMessageResponse>(json!({"kind": "other"})).is_err());
    }

    #[test]
    fn task_state_wire_names() {
        let status: TaskStatus = serde_json::from_value(json!({"state": "input-required"})).unwrap();
        assert_eq!(status.state, TaskState::InputRequired);
        assert_eq!(status.state.to_string(), "input-required");
    }

    #[test]
    fn card_defaults_to_rest_without_streaming() {
        let card = AgentCard::new("Agent", "desc", "1.0.0");
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["preferredTransport"], json!("HTTP+JSON"));
        assert_eq!(value["capabilities"]["streaming"], json!(false));
        let back: AgentCard = serde_json::from_value(value).unwrap();
        assert_eq!(back, card);
    }
}
