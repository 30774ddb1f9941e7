//! Ingestion of protoc `FileDescriptorSet` output.
//!
//! `protoc --descriptor_set_out=set.pb --include_imports` produces the
//! serialized set; [`SchemaSet::from_descriptor_bytes`] decodes it and
//! [`SchemaSet::from_file_descriptor_set`] maps it onto the declaration tree.

use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, ServiceDescriptorProto,
};

use super::{
    Cardinality, EnumDecl, FieldDescriptor, FieldKind, FileDecl, MessageDecl, MethodCardinality,
    MethodDescriptor, SchemaSet, ServiceDescriptor, Syntax,
};
use crate::{ProtolaneError, Result};

impl SchemaSet {
    /// Build a schema set from a decoded descriptor set.
    pub fn from_file_descriptor_set(set: &FileDescriptorSet) -> Result<Self> {
        let files = set
            .file
            .iter()
            .map(convert_file)
            .collect::<Result<Vec<_>>>()?;
        Self::new(files)
    }

    /// Decode a serialized descriptor set and build a schema set from it.
    pub fn from_descriptor_bytes(bytes: &[u8]) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)
            .map_err(|e| ProtolaneError::Decode(format!("invalid descriptor set: {e}")))?;
        Self::from_file_descriptor_set(&set)
    }
}

fn convert_file(file: &FileDescriptorProto) -> Result<FileDecl> {
    // Editions files are treated like proto3: packed unless told otherwise.
    let syntax = match file.syntax() {
        "proto3" | "editions" => Syntax::Proto3,
        _ => Syntax::Proto2,
    };

    Ok(FileDecl {
        name: file.name().to_string(),
        package: file.package().to_string(),
        syntax,
        imports: file.dependency.clone(),
        messages: file
            .message_type
            .iter()
            .map(|m| convert_message(m, syntax))
            .collect::<Result<Vec<_>>>()?,
        enums: file.enum_type.iter().map(convert_enum).collect(),
        services: file.service.iter().map(convert_service).collect(),
    })
}

fn convert_message(message: &DescriptorProto, syntax: Syntax) -> Result<MessageDecl> {
    let map_entry = message
        .options
        .as_ref()
        .is_some_and(|options| options.map_entry());

    Ok(MessageDecl {
        name: message.name().to_string(),
        fields: message
            .field
            .iter()
            .map(|f| convert_field(message.name(), f, syntax))
            .collect::<Result<Vec<_>>>()?,
        map_entry,
        messages: message
            .nested_type
            .iter()
            .map(|m| convert_message(m, syntax))
            .collect::<Result<Vec<_>>>()?,
        enums: message.enum_type.iter().map(convert_enum).collect(),
    })
}

fn convert_field(
    message: &str,
    field: &FieldDescriptorProto,
    syntax: Syntax,
) -> Result<FieldDescriptor> {
    if field.r#type.is_none() && field.type_name.is_none() {
        return Err(ProtolaneError::InvalidSchema(format!(
            "field {message}.{} has neither a type nor a type name",
            field.name()
        )));
    }

    // An unresolved type_name without an explicit type is either a message
    // or an enum; protoc always fills the type in, other producers may not.
    let kind = match field.r#type {
        Some(_) => convert_kind(field.r#type()),
        None => FieldKind::Message,
    };

    let cardinality = match field.label() {
        Label::Repeated => Cardinality::Repeated,
        Label::Optional | Label::Required => Cardinality::Singular,
    };

    let optional = match syntax {
        Syntax::Proto3 => field.proto3_optional(),
        Syntax::Proto2 => {
            field.label() == Label::Optional && !matches!(kind, FieldKind::Message | FieldKind::Group)
        }
    };

    Ok(FieldDescriptor {
        name: field.name().to_string(),
        number: field.number(),
        kind,
        type_name: field.type_name.clone().filter(|name| !name.is_empty()),
        cardinality,
        packed: field.options.as_ref().and_then(|options| options.packed),
        optional,
    })
}

fn convert_kind(kind: Type) -> FieldKind {
    match kind {
        Type::Double => FieldKind::Double,
        Type::Float => FieldKind::Float,
        Type::Int64 => FieldKind::Int64,
        Type::Uint64 => FieldKind::Uint64,
        Type::Int32 => FieldKind::Int32,
        Type::Fixed64 => FieldKind::Fixed64,
        Type::Fixed32 => FieldKind::Fixed32,
        Type::Bool => FieldKind::Bool,
        Type::String => FieldKind::String,
        Type::Group => FieldKind::Group,
        Type::Message => FieldKind::Message,
        Type::Bytes => FieldKind::Bytes,
        Type::Uint32 => FieldKind::Uint32,
        Type::Enum => FieldKind::Enum,
        Type::Sfixed32 => FieldKind::Sfixed32,
        Type::Sfixed64 => FieldKind::Sfixed64,
        Type::Sint32 => FieldKind::Sint32,
        Type::Sint64 => FieldKind::Sint64,
    }
}

fn convert_enum(decl: &EnumDescriptorProto) -> EnumDecl {
    decl.value
        .iter()
        .fold(EnumDecl::new(decl.name()), |acc, value| {
            acc.value(value.name(), value.number())
        })
}

fn convert_service(service: &ServiceDescriptorProto) -> ServiceDescriptor {
    service
        .method
        .iter()
        .fold(ServiceDescriptor::new(service.name()), |acc, method| {
            acc.method(MethodDescriptor::new(
                method.name(),
                method.input_type(),
                method.output_type(),
                MethodCardinality::from_streaming(
                    method.client_streaming(),
                    method.server_streaming(),
                ),
            ))
        })
}
