//! Parameter schemas for class methods.
//!
//! [`generate_schema`] turns a [`Callable`] signature into the OpenAPI subset
//! the service stores for each method.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::agent::{Callable, Field, Parameter, ParameterKind, Receiver, TypeAnnotation};
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::types::{ApiMode, CallableSchema, Schema, SchemaType};

/// Produce the schema of `callable`.
///
/// * `schema_name` names the schema; callers pass the method name.
/// * `descriptions` attaches per-parameter descriptions.
/// * `required` overrides the inferred required list verbatim; otherwise
///   every parameter without a default is required.
///
/// Variadic parameters and the bidirectional input queue are left out. The
/// returned schema has [`ApiMode::Unary`]; callers set the real mode.
///
/// # Errors
///
/// [`AgentEngineError::SchemaGeneration`] when the signature cannot be read
/// or the receiver is missing.
pub fn generate_schema(
    callable: &Callable,
    schema_name: &str,
    descriptions: Option<&BTreeMap<String, String>>,
    required: Option<&[String]>,
) -> AgentEngineResult<CallableSchema> {
    if callable.receiver == Receiver::Missing {
        return Err(AgentEngineError::schema_generation(
            schema_name,
            "the method is declared without a receiver",
        ));
    }
    let parameters = callable.parameters.as_ref().ok_or_else(|| {
        AgentEngineError::schema_generation(schema_name, "the signature is not introspectable")
    })?;

    let included: Vec<&Parameter> = parameters.iter().filter(|p| is_schema_parameter(p)).collect();

    let mut properties = IndexMap::new();
    for param in &included {
        let mut schema = match &param.annotation {
            Some(annotation) => annotation_schema(annotation),
            None => Schema::default(),
        };
        if let Some(description) = descriptions.and_then(|d| d.get(&param.name)) {
            schema.description = Some(description.clone());
        }
        properties.insert(param.name.clone(), schema);
    }

    let required = match required {
        Some(names) => names.to_vec(),
        None => included
            .iter()
            .filter(|p| !p.has_default)
            .map(|p| p.name.clone())
            .collect(),
    };

    Ok(CallableSchema {
        name: schema_name.to_string(),
        description: callable.doc.clone(),
        parameters: Schema {
            schema_type: Some(SchemaType::Object),
            properties,
            required,
            ..Default::default()
        },
        api_mode: ApiMode::Unary,
        a2a_agent_card: None,
    })
}

fn is_schema_parameter(param: &Parameter) -> bool {
    let kind_ok = matches!(
        param.kind,
        ParameterKind::PositionalOnly
            | ParameterKind::PositionalOrKeyword
            | ParameterKind::KeywordOnly
    );
    kind_ok && !matches!(param.annotation, Some(TypeAnnotation::InputQueue))
}

/// Map one annotation to its schema.
pub fn annotation_schema(annotation: &TypeAnnotation) -> Schema {
    match annotation {
        TypeAnnotation::Str => Schema::of(SchemaType::String),
        TypeAnnotation::Int => Schema::of(SchemaType::Integer),
        TypeAnnotation::Float => Schema::of(SchemaType::Number),
        TypeAnnotation::Bool => Schema::of(SchemaType::Boolean),
        TypeAnnotation::Dict => Schema::of(SchemaType::Object),
        TypeAnnotation::List(inner) => Schema {
            schema_type: Some(SchemaType::Array),
            items: Some(Box::new(annotation_schema(inner))),
            ..Default::default()
        },
        TypeAnnotation::Object(fields) => object_schema(fields),
        TypeAnnotation::Optional(inner) => nullable(annotation_schema(inner)),
        TypeAnnotation::Union(members) => union_schema(members),
        TypeAnnotation::NoneType => Schema {
            nullable: Some(true),
            ..Default::default()
        },
        TypeAnnotation::Any | TypeAnnotation::ForwardRef(_) | TypeAnnotation::InputQueue => {
            Schema::default()
        }
    }
}

fn object_schema(fields: &[Field]) -> Schema {
    let mut schema = Schema::of(SchemaType::Object);
    for field in fields {
        schema
            .properties
            .insert(field.name.clone(), annotation_schema(&field.annotation));
        if !field.has_default {
            schema.required.push(field.name.clone());
        }
    }
    schema
}

fn nullable(mut schema: Schema) -> Schema {
    schema.nullable = Some(true);
    schema
}

// `T | None` collapses to `T` with `nullable`; wider unions are unconstrained.
fn union_schema(members: &[TypeAnnotation]) -> Schema {
    let has_none = members.iter().any(|m| *m == TypeAnnotation::NoneType);
    let rest: Vec<&TypeAnnotation> = members
        .iter()
        .filter(|m| **m != TypeAnnotation::NoneType)
        .collect();
    let schema = match rest.as_slice() {
        [single] => annotation_schema(single),
        _ => Schema::default(),
    };
    if has_none {
        nullable(schema)
    } else {
        schema
    }
}
