//! The user-supplied agent object.
//!
//! Rust cannot introspect an arbitrary object the way the agent's own
//! runtime can, so the object describes itself: its members (one level of
//! attribute access), the signatures of its callables, an optional explicit
//! operation table, and an opaque serialized payload produced by the
//! language-specific packager.

use serde::{Deserialize, Serialize};

use crate::a2a::AgentCard;
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::types::{AgentFramework, OperationTable};

/// How a parameter binds at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Positional-only (`def f(a, /)`).
    PositionalOnly,
    /// Positional or keyword.
    PositionalOrKeyword,
    /// Keyword-only (`def f(*, a)`).
    KeywordOnly,
    /// `*args`.
    VarPositional,
    /// `**kwargs`.
    VarKeyword,
}

/// Type annotation of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "of")]
pub enum TypeAnnotation {
    /// `str`
    Str,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `bool`
    Bool,
    /// `None`
    NoneType,
    /// `Any`
    Any,
    /// `list[T]`
    List(Box<TypeAnnotation>),
    /// `dict[...]`
    Dict,
    /// A structured type with named fields.
    Object(Vec<Field>),
    /// `Optional[T]`
    Optional(Box<TypeAnnotation>),
    /// `Union[...]` in any syntactic form.
    Union(Vec<TypeAnnotation>),
    /// A string forward reference that did not resolve.
    ForwardRef(String),
    /// The input queue of a bidirectional stream, fed by the transport.
    InputQueue,
}

/// Named field of a structured annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field type.
    pub annotation: TypeAnnotation,
    /// Whether the field has a default.
    #[serde(default)]
    pub has_default: bool,
}

impl Field {
    /// Field without a default.
    pub fn required(name: impl Into<String>, annotation: TypeAnnotation) -> Self {
        Self {
            name: name.into(),
            annotation,
            has_default: false,
        }
    }

    /// Field with a default.
    pub fn optional(name: impl Into<String>, annotation: TypeAnnotation) -> Self {
        Self {
            name: name.into(),
            annotation,
            has_default: true,
        }
    }
}

/// One parameter of a callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Binding kind.
    pub kind: ParameterKind,
    /// Annotation; `None` when unannotated.
    pub annotation: Option<TypeAnnotation>,
    /// Whether the parameter has a default value.
    pub has_default: bool,
}

impl Parameter {
    /// Positional-or-keyword parameter without a default.
    pub fn new(name: impl Into<String>, annotation: Option<TypeAnnotation>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::PositionalOrKeyword,
            annotation,
            has_default: false,
        }
    }

    /// Mark the parameter as having a default.
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Change the binding kind.
    pub fn with_kind(mut self, kind: ParameterKind) -> Self {
        self.kind = kind;
        self
    }
}

/// How the callable receives its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Receiver {
    /// A method taking `self`.
    Bound,
    /// Declared on the class without `self`; the first parameter is
    /// swallowed by the binding and the signature cannot be trusted.
    Missing,
    /// A static or free function.
    Static,
}

/// Signature of a callable member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callable {
    /// Doc string.
    pub doc: Option<String>,
    /// Receiver kind.
    pub receiver: Receiver,
    /// Parameters, excluding the receiver. `None` when the signature could
    /// not be read (native callables).
    pub parameters: Option<Vec<Parameter>>,
}

impl Callable {
    /// Bound method with the given parameters.
    pub fn method(parameters: Vec<Parameter>) -> Self {
        Self {
            doc: None,
            receiver: Receiver::Bound,
            parameters: Some(parameters),
        }
    }

    /// Callable whose signature cannot be read.
    pub fn opaque() -> Self {
        Self {
            doc: None,
            receiver: Receiver::Bound,
            parameters: None,
        }
    }

    /// Attach a doc string.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Change the receiver kind.
    pub fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = receiver;
        self
    }
}

/// What a member is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MemberKind {
    /// A callable attribute.
    Callable(Callable),
    /// Any other attribute.
    Attribute,
}

/// One attribute reachable from the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Attribute name.
    pub name: String,
    /// Defining module (dotted), when the member has one.
    pub module: Option<String>,
    /// Attribute kind.
    pub kind: MemberKind,
}

impl Member {
    /// The callable signature, if the member is callable.
    pub fn callable(&self) -> Option<&Callable> {
        match &self.kind {
            MemberKind::Callable(c) => Some(c),
            MemberKind::Attribute => None,
        }
    }
}

/// A local agent object that can be deployed.
///
/// Implementations describe their callable surface and hand over the bytes
/// produced by the external packager. The default methods cover objects that
/// rely on operation probing and the `custom` framework.
pub trait AgentObject: Send + Sync {
    /// Class name, used in validation messages.
    fn class_name(&self) -> &str;

    /// Members one attribute deep.
    fn members(&self) -> Vec<Member>;

    /// Explicit operation table. `None` means "probe by name".
    fn register_operations(&self) -> Option<OperationTable> {
        None
    }

    /// Framework the object was built with.
    fn agent_framework(&self) -> AgentFramework {
        AgentFramework::Custom
    }

    /// Card published with `a2a_extension` methods.
    fn agent_card(&self) -> Option<AgentCard> {
        None
    }

    /// Serialized object.
    fn serialize(&self) -> AgentEngineResult<Vec<u8>>;

    /// Check that `blob` loads back into this object.
    fn verify(&self, blob: &[u8]) -> AgentEngineResult<()>;

    /// Member by name.
    fn member(&self, name: &str) -> Option<Member> {
        self.members().into_iter().find(|m| m.name == name)
    }
}

/// An [`AgentObject`] assembled from a pre-serialized payload.
///
/// Built with [`AgentBuilder`](crate::builders::AgentBuilder).
#[derive(Debug, Clone)]
pub struct PackagedAgent {
    pub(crate) class_name: String,
    pub(crate) members: Vec<Member>,
    pub(crate) operations: Option<OperationTable>,
    pub(crate) framework: AgentFramework,
    pub(crate) agent_card: Option<AgentCard>,
    pub(crate) payload: Vec<u8>,
}

impl AgentObject for PackagedAgent {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn members(&self) -> Vec<Member> {
        self.members.clone()
    }

    fn register_operations(&self) -> Option<OperationTable> {
        self.operations.clone()
    }

    fn agent_framework(&self) -> AgentFramework {
        self.framework
    }

    fn agent_card(&self) -> Option<AgentCard> {
        self.agent_card.clone()
    }

    fn serialize(&self) -> AgentEngineResult<Vec<u8>> {
        if self.payload.is_empty() {
            return Err(AgentEngineError::serialization(format!(
                "{} has an empty serialized payload",
                self.class_name
            )));
        }
        Ok(self.payload.clone())
    }

    fn verify(&self, blob: &[u8]) -> AgentEngineResult<()> {
        if blob != self.payload.as_slice() {
            return Err(AgentEngineError::serialization(format!(
                "staged payload for {} does not match the serialized object ({} bytes staged, {} expected)",
                self.class_name,
                blob.len(),
                self.payload.len()
            )));
        }
        Ok(())
    }
}
