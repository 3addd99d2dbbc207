//! Agent-to-Agent (A2A) support for `a2a_extension` methods.
//!
//! - [`A2aRestClient`]: HTTP+JSON client built from a published card
//! - [`AgentCard`], [`Message`], [`Task`]: the data the extension exchanges

mod client;
mod types;

pub use client::A2aRestClient;
pub use types::{
    AgentCapabilities, AgentCard, AgentInterface, AgentSkill, Message, Part, Role,
    SendMessageParams, SendMessageResponse, Task, TaskState, TaskStatus, HTTP_JSON_TRANSPORT,
};
