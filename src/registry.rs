//! Operation discovery for agent objects.
//!
//! An object either declares its operations through
//! [`AgentObject::register_operations`] or is probed for the canonical method
//! names. [`class_method_schemas`] turns the resulting table into the schemas
//! stored in `spec.class_methods`.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::agent::{AgentObject, Receiver};
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::schema::generate_schema;
use crate::types::{ApiMode, CallableSchema, OperationTable};

/// Method names probed when the object declares no operation table.
pub const PROBED_OPERATIONS: [(ApiMode, &str); 5] = [
    (ApiMode::Unary, "query"),
    (ApiMode::Async, "async_query"),
    (ApiMode::Stream, "stream_query"),
    (ApiMode::AsyncStream, "async_stream_query"),
    (ApiMode::BidiStream, "bidi_stream_query"),
];

/// Where an object's operation table came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationSource {
    /// Declared through `register_operations`.
    Registered(OperationTable),
    /// Found by probing for the canonical method names.
    Probed(OperationTable),
}

impl OperationSource {
    /// The operation table.
    pub fn table(&self) -> &OperationTable {
        match self {
            OperationSource::Registered(t) | OperationSource::Probed(t) => t,
        }
    }

    /// Consume into the operation table.
    pub fn into_table(self) -> OperationTable {
        match self {
            OperationSource::Registered(t) | OperationSource::Probed(t) => t,
        }
    }
}

/// Compute the operation table of `object`.
///
/// # Errors
///
/// [`AgentEngineError::Validation`] when a registered name is not a callable
/// member, or when probing finds none of the canonical names.
pub fn registered_operations(object: &dyn AgentObject) -> AgentEngineResult<OperationSource> {
    if let Some(table) = object.register_operations() {
        for names in table.values() {
            for name in names {
                let callable = object.member(name).and_then(|m| m.callable().cloned());
                if callable.is_none() {
                    return Err(AgentEngineError::validation(format!(
                        "Method `{name}` defined in register_operations not found in {}",
                        object.class_name()
                    )));
                }
            }
        }
        return Ok(OperationSource::Registered(table));
    }

    let mut table = OperationTable::new();
    for (mode, name) in PROBED_OPERATIONS {
        if object.member(name).is_some_and(|m| m.callable().is_some()) {
            table.entry(mode).or_default().push(name.to_string());
        }
    }
    if table.is_empty() {
        let accepted: Vec<&str> = PROBED_OPERATIONS.iter().map(|(_, n)| *n).collect();
        return Err(AgentEngineError::validation(format!(
            "{} must have at least one of the following methods: {}, or implement register_operations",
            object.class_name(),
            accepted.join(", ")
        )));
    }
    Ok(OperationSource::Probed(table))
}

/// Schemas for every registered operation, unique by `(name, api_mode)`.
///
/// Methods whose signature cannot be read are logged and left out. A method
/// declared without a receiver fails the whole call, since the schema would
/// misdescribe every argument. `a2a_extension` methods carry the object's
/// agent card when it has one.
pub fn class_method_schemas(object: &dyn AgentObject) -> AgentEngineResult<Vec<CallableSchema>> {
    let table = registered_operations(object)?.into_table();
    let card = match object.agent_card() {
        Some(card) => Some(serde_json::to_string(&card)?),
        None => None,
    };

    let mut seen = HashSet::new();
    let mut schemas = Vec::new();
    for (mode, names) in table {
        for name in names {
            if !seen.insert((name.clone(), mode)) {
                continue;
            }
            let Some(callable) = object.member(&name).and_then(|m| m.callable().cloned()) else {
                continue;
            };
            if callable.receiver == Receiver::Missing {
                return Err(AgentEngineError::validation(format!(
                    "Invalid {name} signature. This might be due to a missing `self` argument in the {}.{name} method.",
                    object.class_name()
                )));
            }
            let mut schema = match generate_schema(&callable, &name, None, None) {
                Ok(schema) => schema,
                Err(e) => {
                    warn!("failed to generate schema for {}: {}", name, e);
                    continue;
                }
            };
            schema.api_mode = mode;
            if mode == ApiMode::A2aExtension {
                schema.a2a_agent_card = card.clone();
            }
            debug!("Generated schema for {} ({:?})", name, mode.as_str());
            schemas.push(schema);
        }
    }
    Ok(schemas)
}
