//! Declaration tree handed to [`SchemaSet::new`](super::SchemaSet::new).
//!
//! This is the shape an external schema front end supplies: one
//! [`FileDecl`] per `.proto` file, messages and enums nested the way they
//! are written in source. It deserializes from JSON so a front end does not
//! have to link against this crate.

use serde::{Deserialize, Serialize};

/// Schema dialect of a file. Decides the implicit packing rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
}

impl Syntax {
    /// Whether repeated packable fields are packed when the option is unset.
    pub fn packs_implicitly(self) -> bool {
        matches!(self, Syntax::Proto3)
    }
}

/// Declared kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Enum,
    Message,
    /// Legacy proto2 group. Declared so descriptor sets load, never classified.
    Group,
}

impl FieldKind {
    /// Protobuf spelling of the kind (`int32`, `message`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int32 => "int32",
            FieldKind::Int64 => "int64",
            FieldKind::Uint32 => "uint32",
            FieldKind::Uint64 => "uint64",
            FieldKind::Sint32 => "sint32",
            FieldKind::Sint64 => "sint64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::Sfixed32 => "sfixed32",
            FieldKind::Sfixed64 => "sfixed64",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::Enum => "enum",
            FieldKind::Message => "message",
            FieldKind::Group => "group",
        }
    }

    /// Numeric, enum and bool kinds can use the packed wire encoding.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message | FieldKind::Group
        )
    }

    /// Kinds that carry a type reference.
    pub fn is_named(self) -> bool {
        matches!(self, FieldKind::Enum | FieldKind::Message | FieldKind::Group)
    }

    /// 64-bit integers, which the keyed representation spells as strings.
    pub fn is_64_bit_integer(self) -> bool {
        matches!(
            self,
            FieldKind::Int64
                | FieldKind::Uint64
                | FieldKind::Sint64
                | FieldKind::Fixed64
                | FieldKind::Sfixed64
        )
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Singular,
    Repeated,
}

/// A field as declared in its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub kind: FieldKind,
    /// Raw type reference for enum/message fields, possibly relative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Explicit `packed` option: `None` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packed: Option<bool>,
    /// Explicit presence (`optional` keyword, or any proto2 singular scalar).
    #[serde(default)]
    pub optional: bool,
}

impl FieldDescriptor {
    /// A singular scalar field.
    pub fn scalar(name: impl Into<String>, number: i32, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            number,
            kind,
            type_name: None,
            cardinality: Cardinality::Singular,
            packed: None,
            optional: false,
        }
    }

    /// A singular field referencing a message or enum.
    pub fn named(
        name: impl Into<String>,
        number: i32,
        kind: FieldKind,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::scalar(name, number, kind)
        }
    }

    /// Mark the field repeated.
    pub fn repeated(mut self) -> Self {
        self.cardinality = Cardinality::Repeated;
        self
    }

    /// Set the explicit `packed` option.
    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = Some(packed);
        self
    }

    /// Mark the field as having explicit presence.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }
}

/// A message declaration with its nested declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Set on the synthetic wrapper protoc creates for a map field.
    #[serde(default)]
    pub map_entry: bool,
    #[serde(default)]
    pub messages: Vec<MessageDecl>,
    #[serde(default)]
    pub enums: Vec<EnumDecl>,
}

impl MessageDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn nested(mut self, message: MessageDecl) -> Self {
        self.messages.push(message);
        self
    }

    pub fn nested_enum(mut self, decl: EnumDecl) -> Self {
        self.enums.push(decl);
        self
    }

    /// Build the synthetic entry message for a `map<key, value>` field.
    pub fn map_entry(name: impl Into<String>, key: FieldDescriptor, value: FieldDescriptor) -> Self {
        Self {
            name: name.into(),
            fields: vec![key, value],
            map_entry: true,
            ..Self::default()
        }
    }
}

/// One enum value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
}

/// An enum declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub values: Vec<EnumValue>,
}

impl EnumDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, name: impl Into<String>, number: i32) -> Self {
        self.values.push(EnumValue {
            name: name.into(),
            number,
        });
        self
    }
}

/// Whether each side of an RPC exchanges one message or a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodCardinality {
    #[default]
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl MethodCardinality {
    pub fn from_streaming(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => MethodCardinality::Unary,
            (false, true) => MethodCardinality::ServerStreaming,
            (true, false) => MethodCardinality::ClientStreaming,
            (true, true) => MethodCardinality::BidiStreaming,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodCardinality::Unary => "unary",
            MethodCardinality::ServerStreaming => "server_streaming",
            MethodCardinality::ClientStreaming => "client_streaming",
            MethodCardinality::BidiStreaming => "bidi_streaming",
        }
    }
}

impl std::fmt::Display for MethodCardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    #[serde(default)]
    pub cardinality: MethodCardinality,
}

impl MethodDescriptor {
    pub fn new(
        name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
        cardinality: MethodCardinality,
    ) -> Self {
        Self {
            name: name.into(),
            input_type: input_type.into(),
            output_type: output_type.into(),
            cardinality,
        }
    }
}

/// A service and its methods, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }
}

/// One `.proto` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDecl {
    pub name: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub syntax: Syntax,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub messages: Vec<MessageDecl>,
    #[serde(default)]
    pub enums: Vec<EnumDecl>,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl FileDecl {
    pub fn new(name: impl Into<String>, package: impl Into<String>, syntax: Syntax) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            syntax,
            ..Self::default()
        }
    }

    pub fn import(mut self, file: impl Into<String>) -> Self {
        self.imports.push(file.into());
        self
    }

    pub fn message(mut self, message: MessageDecl) -> Self {
        self.messages.push(message);
        self
    }

    pub fn enum_decl(mut self, decl: EnumDecl) -> Self {
        self.enums.push(decl);
        self
    }

    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }
}
