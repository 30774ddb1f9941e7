//! Field classification: map, repeated and packed detection, and the keyed
//! data type each field converts to.

use std::fmt;

use crate::resolve::TypeResolver;
use crate::schema::{FieldDescriptor, FieldKind, MessageId, TypeHandle};
use crate::{ProtolaneError, Result};

/// Key representation of a map field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKey {
    /// `string` keys.
    String,
    /// Integer and bool keys.
    Number,
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::String => f.write_str("string"),
            MapKey::Number => f.write_str("number"),
        }
    }
}

/// Keyed representation of a field value.
///
/// `Display` renders the compact notation (`number[]`,
/// `map<string, Foo>`); [`DataType::describe`] renders prose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Number,
    Boolean,
    Bytes,
    /// A message or enum, spelled relative to the generating file.
    Named(String),
    Sequence(Box<DataType>),
    Mapping { key: MapKey, value: Box<DataType> },
}

impl DataType {
    /// Prose form, e.g. `mapping from string to sequence of number`.
    pub fn describe(&self) -> String {
        match self {
            DataType::String => "string".to_string(),
            DataType::Number => "number".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Bytes => "bytes".to_string(),
            DataType::Named(name) => name.clone(),
            DataType::Sequence(inner) => format!("sequence of {}", inner.describe()),
            DataType::Mapping { key, value } => {
                format!("mapping from {key} to {}", value.describe())
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => f.write_str("string"),
            DataType::Number => f.write_str("number"),
            DataType::Boolean => f.write_str("bool"),
            DataType::Bytes => f.write_str("bytes"),
            DataType::Named(name) => f.write_str(name),
            DataType::Sequence(inner) => write!(f, "{inner}[]"),
            DataType::Mapping { key, value } => write!(f, "map<{key}, {value}>"),
        }
    }
}

/// Classification result for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldShape {
    pub is_map: bool,
    pub map_key: Option<MapKey>,
    pub map_value: Option<DataType>,
    pub is_packed: bool,
    pub target_type: DataType,
    /// Resolved declaration for message and enum fields. For map fields this
    /// is the entry message.
    pub resolved: Option<TypeHandle>,
}

/// Computes [`FieldShape`]s from resolved descriptors. Pure: the same field
/// always classifies to the same shape.
#[derive(Debug, Clone, Copy)]
pub struct FieldClassifier<'r, 'a> {
    resolver: &'r TypeResolver<'a>,
}

impl<'r, 'a> FieldClassifier<'r, 'a> {
    pub fn new(resolver: &'r TypeResolver<'a>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &'r TypeResolver<'a> {
        self.resolver
    }

    /// Classify `field` of `message`.
    pub fn classify(&self, message: MessageId, field: &FieldDescriptor) -> Result<FieldShape> {
        let resolved = self.resolve(message, field)?;
        let is_packed = self.is_packed(message, field);

        if let Some(entry) = self.map_entry_of(resolved) {
            let (key, value) = self.map_entry_fields(entry).ok_or_else(|| {
                ProtolaneError::InvalidSchema(format!(
                    "map entry {} lost its key/value fields",
                    self.resolver.schema().message(entry).full_name
                ))
            })?;
            let map_key = map_key_of(self.message_name(entry), key)?;
            let map_value = self.data_type(entry, value)?;
            return Ok(FieldShape {
                is_map: true,
                map_key: Some(map_key),
                map_value: Some(map_value.clone()),
                is_packed,
                target_type: DataType::Mapping {
                    key: map_key,
                    value: Box::new(map_value),
                },
                resolved,
            });
        }

        let element = self.element_type(message, field, resolved)?;
        let target_type = if field.is_repeated() {
            DataType::Sequence(Box::new(element))
        } else {
            element
        };

        Ok(FieldShape {
            is_map: false,
            map_key: None,
            map_value: None,
            is_packed,
            target_type,
            resolved,
        })
    }

    /// Whether the field's type is a message that is a map entry.
    pub fn is_map(&self, message: MessageId, field: &FieldDescriptor) -> Result<bool> {
        if field.kind != FieldKind::Message {
            return Ok(false);
        }
        let resolved = self.resolve(message, field)?;
        Ok(self.map_entry_of(resolved).is_some())
    }

    /// Keyed data type of the field. Same as `classify(..).target_type`.
    pub fn data_type(&self, message: MessageId, field: &FieldDescriptor) -> Result<DataType> {
        self.classify(message, field).map(|shape| shape.target_type)
    }

    /// Repeated packable fields pack when explicitly asked to, or when the
    /// option is unset and the file's dialect packs implicitly. An explicit
    /// `false` always wins.
    pub fn is_packed(&self, message: MessageId, field: &FieldDescriptor) -> bool {
        if !field.is_repeated() || !field.kind.is_packable() {
            return false;
        }
        let schema = self.resolver.schema();
        let syntax = schema.file(schema.message(message).file).syntax;
        field.packed.unwrap_or(syntax.packs_implicitly())
    }

    /// The `(key, value)` fields of a map entry message.
    pub fn map_entry_fields(
        &self,
        entry: MessageId,
    ) -> Option<(&'a FieldDescriptor, &'a FieldDescriptor)> {
        let message = self.resolver.schema().message(entry);
        if !message.is_map_entry() {
            return None;
        }
        Some((message.field("key")?, message.field("value")?))
    }

    fn resolve(&self, message: MessageId, field: &FieldDescriptor) -> Result<Option<TypeHandle>> {
        match field.kind {
            FieldKind::Group => Err(ProtolaneError::UnsupportedFieldType {
                message: self.message_name(message).to_string(),
                field: field.name.clone(),
                kind: field.kind.to_string(),
            }),
            FieldKind::Message | FieldKind::Enum => {
                let handle = self.resolver.resolve_field(message, field)?;
                let matches = matches!(
                    (field.kind, handle),
                    (FieldKind::Message, TypeHandle::Message(_)) | (FieldKind::Enum, TypeHandle::Enum(_))
                );
                if !matches {
                    return Err(ProtolaneError::InvalidSchema(format!(
                        "field {}.{} is declared {} but {} is not",
                        self.message_name(message),
                        field.name,
                        field.kind,
                        self.resolver.schema().full_name(handle)
                    )));
                }
                Ok(Some(handle))
            }
            _ => Ok(None),
        }
    }

    fn map_entry_of(&self, resolved: Option<TypeHandle>) -> Option<MessageId> {
        match resolved {
            Some(TypeHandle::Message(id)) if self.resolver.schema().message(id).is_map_entry() => {
                Some(id)
            }
            _ => None,
        }
    }

    fn element_type(
        &self,
        message: MessageId,
        field: &FieldDescriptor,
        resolved: Option<TypeHandle>,
    ) -> Result<DataType> {
        if let Some(handle) = resolved {
            let file = self.resolver.schema().message(message).file;
            return Ok(DataType::Named(self.resolver.relative_name(handle, file)));
        }
        scalar_type(field.kind).ok_or_else(|| ProtolaneError::UnsupportedFieldType {
            message: self.message_name(message).to_string(),
            field: field.name.clone(),
            kind: field.kind.to_string(),
        })
    }

    fn message_name(&self, message: MessageId) -> &'a str {
        &self.resolver.schema().message(message).full_name
    }
}

/// Keyed representation of a scalar kind. 64-bit integers travel as decimal
/// strings since they do not fit a double.
pub fn scalar_type(kind: FieldKind) -> Option<DataType> {
    match kind {
        FieldKind::String => Some(DataType::String),
        FieldKind::Bytes => Some(DataType::Bytes),
        FieldKind::Bool => Some(DataType::Boolean),
        k if k.is_64_bit_integer() => Some(DataType::String),
        FieldKind::Double
        | FieldKind::Float
        | FieldKind::Int32
        | FieldKind::Uint32
        | FieldKind::Sint32
        | FieldKind::Fixed32
        | FieldKind::Sfixed32 => Some(DataType::Number),
        _ => None,
    }
}

fn map_key_of(entry: &str, key: &FieldDescriptor) -> Result<MapKey> {
    match key.kind {
        FieldKind::String => Ok(MapKey::String),
        FieldKind::Double
        | FieldKind::Float
        | FieldKind::Bytes
        | FieldKind::Enum
        | FieldKind::Message
        | FieldKind::Group => Err(ProtolaneError::UnsupportedFieldType {
            message: entry.to_string(),
            field: key.name.clone(),
            kind: key.kind.to_string(),
        }),
        _ => Ok(MapKey::Number),
    }
}
