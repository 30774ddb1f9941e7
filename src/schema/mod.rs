//! Schema IR: the loaded file set as an arena of declarations.
//!
//! [`SchemaSet`] owns every file, message and enum. Declarations refer to
//! each other through [`MessageId`]/[`EnumId`] handles, never by value, so
//! recursive message graphs (a message containing itself, directly or
//! through another message) need no special casing anywhere downstream.
//!
//! The set is built once and never mutated; generation is a read pass.

mod decl;
pub mod descriptor;

use std::collections::HashSet;

use serde::Deserialize;

pub use decl::{
    Cardinality, EnumDecl, EnumValue, FieldDescriptor, FieldKind, FileDecl, MessageDecl,
    MethodCardinality, MethodDescriptor, ServiceDescriptor, Syntax,
};

use crate::{ProtolaneError, Result};

/// Handle to a file in a [`SchemaSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    /// Position of the file in load order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a message in a [`SchemaSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u32);

/// Handle to an enum in a [`SchemaSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(u32);

/// What a type reference resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeHandle {
    Message(MessageId),
    Enum(EnumId),
}

/// A loaded `.proto` file.
#[derive(Debug, Clone)]
pub struct SchemaFile {
    pub name: String,
    pub package: String,
    pub syntax: Syntax,
    pub imports: Vec<String>,
    /// Top-level messages, in declaration order.
    pub messages: Vec<MessageId>,
    /// Top-level enums, in declaration order.
    pub enums: Vec<EnumId>,
    pub services: Vec<ServiceDescriptor>,
}

/// A message declaration in the arena.
#[derive(Debug, Clone)]
pub struct MessageType {
    pub name: String,
    /// Fully-qualified name without a leading dot (`pkg.Outer.Inner`).
    pub full_name: String,
    pub file: FileId,
    /// Enclosing message for nested declarations.
    pub owner: Option<MessageId>,
    pub fields: Vec<FieldDescriptor>,
    /// The raw `map_entry` flag. Use [`MessageType::is_map_entry`] to test
    /// whether the message really is a map entry.
    pub map_entry: bool,
    pub messages: Vec<MessageId>,
    pub enums: Vec<EnumId>,
}

impl MessageType {
    /// A message is a map entry only when flagged AND shaped as `{key, value}`.
    pub fn is_map_entry(&self) -> bool {
        self.map_entry
            && self.fields.len() == 2
            && self.field("key").is_some()
            && self.field("value").is_some()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// An enum declaration in the arena.
#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub full_name: String,
    pub file: FileId,
    pub owner: Option<MessageId>,
    pub values: Vec<EnumValue>,
}

/// The complete, immutable set of loaded schema files.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    files: Vec<SchemaFile>,
    messages: Vec<MessageType>,
    enums: Vec<EnumType>,
}

#[derive(Deserialize)]
struct SchemaDocument {
    files: Vec<FileDecl>,
}

impl SchemaSet {
    /// Build the arena from file declarations.
    ///
    /// Fails on structurally invalid input (empty names, duplicate file
    /// names). Name clashes between declarations are detected later, when
    /// the resolver indexes the set.
    pub fn new(files: Vec<FileDecl>) -> Result<Self> {
        let mut set = SchemaSet::default();
        let mut seen = HashSet::new();

        for decl in files {
            if decl.name.is_empty() {
                return Err(ProtolaneError::InvalidSchema("file without a name".into()));
            }
            if !seen.insert(decl.name.clone()) {
                return Err(ProtolaneError::InvalidSchema(format!(
                    "file {} loaded twice",
                    decl.name
                )));
            }
            set.push_file(decl)?;
        }

        Ok(set)
    }

    /// Parse a JSON document of the form `{"files": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: SchemaDocument = serde_json::from_str(json)?;
        Self::new(document.files)
    }

    fn push_file(&mut self, decl: FileDecl) -> Result<()> {
        let file_id = FileId(self.files.len() as u32);
        let mut messages = Vec::with_capacity(decl.messages.len());
        let mut enums = Vec::with_capacity(decl.enums.len());

        for message in decl.messages {
            messages.push(self.push_message(message, file_id, &decl.package, None)?);
        }
        for enum_decl in decl.enums {
            enums.push(self.push_enum(enum_decl, file_id, &decl.package, None)?);
        }

        for service in &decl.services {
            if service.name.is_empty() {
                return Err(ProtolaneError::InvalidSchema(format!(
                    "service without a name in {}",
                    decl.name
                )));
            }
        }

        self.files.push(SchemaFile {
            name: decl.name,
            package: decl.package,
            syntax: decl.syntax,
            imports: decl.imports,
            messages,
            enums,
            services: decl.services,
        });
        Ok(())
    }

    fn push_message(
        &mut self,
        decl: MessageDecl,
        file: FileId,
        scope: &str,
        owner: Option<MessageId>,
    ) -> Result<MessageId> {
        if decl.name.is_empty() {
            return Err(ProtolaneError::InvalidSchema(format!(
                "message without a name in scope '{scope}'"
            )));
        }

        let id = MessageId(self.messages.len() as u32);
        let full_name = qualify(scope, &decl.name);
        for field in &decl.fields {
            check_identifier("field", &field.name, &full_name)?;
        }

        // Reserve the slot first so nested ids come after the owner.
        self.messages.push(MessageType {
            name: decl.name,
            full_name: full_name.clone(),
            file,
            owner,
            fields: decl.fields,
            map_entry: decl.map_entry,
            messages: Vec::new(),
            enums: Vec::new(),
        });

        let mut nested_messages = Vec::with_capacity(decl.messages.len());
        for nested in decl.messages {
            nested_messages.push(self.push_message(nested, file, &full_name, Some(id))?);
        }
        let mut nested_enums = Vec::with_capacity(decl.enums.len());
        for nested in decl.enums {
            nested_enums.push(self.push_enum(nested, file, &full_name, Some(id))?);
        }

        let message = &mut self.messages[id.0 as usize];
        message.messages = nested_messages;
        message.enums = nested_enums;
        Ok(id)
    }

    fn push_enum(
        &mut self,
        decl: EnumDecl,
        file: FileId,
        scope: &str,
        owner: Option<MessageId>,
    ) -> Result<EnumId> {
        if decl.name.is_empty() {
            return Err(ProtolaneError::InvalidSchema(format!(
                "enum without a name in scope '{scope}'"
            )));
        }

        let full_name = qualify(scope, &decl.name);
        for value in &decl.values {
            check_identifier("enum value", &value.name, &full_name)?;
        }

        let id = EnumId(self.enums.len() as u32);
        self.enums.push(EnumType {
            full_name,
            name: decl.name,
            file,
            owner,
            values: decl.values,
        });
        Ok(id)
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &SchemaFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| (FileId(i as u32), f))
    }

    pub fn messages(&self) -> impl Iterator<Item = (MessageId, &MessageType)> {
        self.messages
            .iter()
            .enumerate()
            .map(|(i, m)| (MessageId(i as u32), m))
    }

    pub fn enums(&self) -> impl Iterator<Item = (EnumId, &EnumType)> {
        self.enums
            .iter()
            .enumerate()
            .map(|(i, e)| (EnumId(i as u32), e))
    }

    pub fn file(&self, id: FileId) -> &SchemaFile {
        &self.files[id.0 as usize]
    }

    pub fn message(&self, id: MessageId) -> &MessageType {
        &self.messages[id.0 as usize]
    }

    pub fn enum_type(&self, id: EnumId) -> &EnumType {
        &self.enums[id.0 as usize]
    }

    /// Find a file by its name (`echo/v1/echo.proto`).
    pub fn file_by_name(&self, name: &str) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.name == name)
            .map(|i| FileId(i as u32))
    }

    /// Find a message by fully-qualified name (no leading dot).
    pub fn message_by_name(&self, full_name: &str) -> Option<MessageId> {
        self.messages
            .iter()
            .position(|m| m.full_name == full_name)
            .map(|i| MessageId(i as u32))
    }

    /// Fully-qualified name of a resolved type.
    pub fn full_name(&self, handle: TypeHandle) -> &str {
        match handle {
            TypeHandle::Message(id) => &self.message(id).full_name,
            TypeHandle::Enum(id) => &self.enum_type(id).full_name,
        }
    }

    /// File that declares a resolved type.
    pub fn declaring_file(&self, handle: TypeHandle) -> FileId {
        match handle {
            TypeHandle::Message(id) => self.message(id).file,
            TypeHandle::Enum(id) => self.enum_type(id).file,
        }
    }

    /// Declaration names from the outermost owner down to the type itself,
    /// e.g. `["Outer", "Inner"]` for `pkg.Outer.Inner`.
    pub fn nesting_chain(&self, handle: TypeHandle) -> Vec<&str> {
        let (name, mut owner) = match handle {
            TypeHandle::Message(id) => {
                let m = self.message(id);
                (m.name.as_str(), m.owner)
            }
            TypeHandle::Enum(id) => {
                let e = self.enum_type(id);
                (e.name.as_str(), e.owner)
            }
        };

        let mut chain = vec![name];
        while let Some(id) = owner {
            let m = self.message(id);
            chain.push(m.name.as_str());
            owner = m.owner;
        }
        chain.reverse();
        chain
    }

    /// Number of enclosing messages around a message declaration.
    pub fn nesting_depth(&self, id: MessageId) -> usize {
        let mut depth = 0;
        let mut owner = self.message(id).owner;
        while let Some(parent) = owner {
            depth += 1;
            owner = self.message(parent).owner;
        }
        depth
    }
}

/// Join a scope and a name with a dot, skipping the dot for the root scope.
/// Field and enum value names must be protobuf identifiers:
/// `[A-Za-z_][A-Za-z0-9_]*`.
fn check_identifier(what: &str, name: &str, owner: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ProtolaneError::InvalidSchema(format!(
            "{what} name '{name}' in {owner} is not an identifier"
        )))
    }
}

pub(crate) fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}
