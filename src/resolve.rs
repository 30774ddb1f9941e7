//! Type resolution against a loaded [`SchemaSet`].
//!
//! [`TypeResolver`] indexes every declaration by fully-qualified name once,
//! then answers lookups with a two-phase search:
//!
//! 1. **Enclosing scopes.** Starting at the declaring scope (a message or a
//!    package), the reference is qualified with each scope from the innermost
//!    outwards to the root. The first hit declared in a visible file (the
//!    declaring file itself or one of its direct imports) wins, so a nested
//!    or sibling declaration shadows an imported one with the same short
//!    name.
//! 2. **Imported packages.** The reference is qualified with the package of
//!    each imported file and matched against that file's declarations. A
//!    single match wins; several matches are reported as ambiguous instead
//!    of picking one by load order.
//!
//! References starting with `.` are fully qualified and skip both phases.
//!
//! The resolver holds handles only. Resolving the same reference twice
//! yields the same handle, and recursive message graphs never recurse.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{FieldDescriptor, FileId, MessageId, SchemaSet, TypeHandle};
use crate::{ProtolaneError, Result};

/// Where a type reference was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    /// File containing the reference.
    pub file: FileId,
    /// Fully-qualified enclosing scope: a message name, or the package.
    pub path: String,
}

impl Scope {
    /// Scope of a reference written inside a message body.
    pub fn of_message(schema: &SchemaSet, message: MessageId) -> Self {
        let m = schema.message(message);
        Self {
            file: m.file,
            path: m.full_name.clone(),
        }
    }

    /// Scope of a reference written at file level (service methods).
    pub fn of_file(schema: &SchemaSet, file: FileId) -> Self {
        Self {
            file,
            path: schema.file(file).package.clone(),
        }
    }
}

/// Immutable name index over a [`SchemaSet`].
#[derive(Debug)]
pub struct TypeResolver<'a> {
    schema: &'a SchemaSet,
    index: BTreeMap<String, TypeHandle>,
    /// Files whose declarations each file may see: itself plus direct imports.
    visible: Vec<BTreeSet<FileId>>,
    /// Imported files of each file, in import order.
    imports: Vec<Vec<FileId>>,
}

impl<'a> TypeResolver<'a> {
    /// Index the schema set.
    ///
    /// Fails with [`ProtolaneError::DuplicateType`] when two declarations
    /// share a fully-qualified name. Imports naming files outside the set
    /// are ignored here; references into them fail at resolution time.
    pub fn new(schema: &'a SchemaSet) -> Result<Self> {
        let mut index: BTreeMap<String, TypeHandle> = BTreeMap::new();

        let handles = schema
            .messages()
            .map(|(id, _)| TypeHandle::Message(id))
            .chain(schema.enums().map(|(id, _)| TypeHandle::Enum(id)));

        for handle in handles {
            let name = schema.full_name(handle).to_string();
            if let Some(previous) = index.insert(name.clone(), handle) {
                return Err(ProtolaneError::DuplicateType {
                    first: schema.file(schema.declaring_file(previous)).name.clone(),
                    second: schema.file(schema.declaring_file(handle)).name.clone(),
                    name,
                });
            }
        }

        let mut visible = Vec::new();
        let mut imports = Vec::new();
        for (id, file) in schema.files() {
            let imported: Vec<FileId> = file
                .imports
                .iter()
                .filter_map(|name| {
                    let found = schema.file_by_name(name);
                    if found.is_none() {
                        tracing::debug!(file = %file.name, import = %name, "import not loaded");
                    }
                    found
                })
                .collect();

            let mut files: BTreeSet<FileId> = imported.iter().copied().collect();
            files.insert(id);
            visible.push(files);
            imports.push(imported);
        }

        tracing::debug!(types = index.len(), "indexed schema types");

        Ok(Self {
            schema,
            index,
            visible,
            imports,
        })
    }

    pub fn schema(&self) -> &'a SchemaSet {
        self.schema
    }

    /// Find a declaration by fully-qualified name, with or without the
    /// leading dot. Ignores visibility.
    pub fn lookup(&self, full_name: &str) -> Option<TypeHandle> {
        self.index
            .get(full_name.strip_prefix('.').unwrap_or(full_name))
            .copied()
    }

    /// Resolve `reference` as written in `scope`.
    pub fn resolve(&self, reference: &str, scope: &Scope) -> Result<TypeHandle> {
        if let Some(absolute) = reference.strip_prefix('.') {
            return self
                .index
                .get(absolute)
                .copied()
                .ok_or_else(|| self.unresolved(reference, scope));
        }

        if reference.is_empty() {
            return Err(self.unresolved(reference, scope));
        }

        let visible = &self.visible[scope.file.index()];

        // Phase 1: enclosing scopes, innermost first.
        let mut prefix = Some(scope.path.as_str());
        while let Some(current) = prefix {
            let candidate = crate::schema::qualify(current, reference);
            if let Some(&handle) = self.index.get(&candidate) {
                if visible.contains(&self.schema.declaring_file(handle)) {
                    return Ok(handle);
                }
            }
            prefix = parent_scope(current);
        }

        // Phase 2: declarations of imported files, qualified by their package.
        let mut candidates = BTreeSet::new();
        for &imported in &self.imports[scope.file.index()] {
            let package = &self.schema.file(imported).package;
            let candidate = crate::schema::qualify(package, reference);
            if let Some(&handle) = self.index.get(&candidate) {
                if self.schema.declaring_file(handle) == imported {
                    candidates.insert(handle);
                }
            }
        }

        let mut candidates = candidates.into_iter();
        match (candidates.next(), candidates.next()) {
            (Some(handle), None) => Ok(handle),
            (None, _) => Err(self.unresolved(reference, scope)),
            (Some(first), Some(second)) => {
                let mut names: Vec<String> = [first, second]
                    .into_iter()
                    .chain(candidates)
                    .map(|h| self.schema.full_name(h).to_string())
                    .collect();
                names.sort();
                Err(ProtolaneError::AmbiguousType {
                    reference: reference.to_string(),
                    scope: scope.path.clone(),
                    candidates: names,
                })
            }
        }
    }

    /// Resolve the type reference of a message or enum field.
    pub fn resolve_field(&self, message: MessageId, field: &FieldDescriptor) -> Result<TypeHandle> {
        let owner = self.schema.message(message);
        let reference = field.type_name.as_deref().ok_or_else(|| {
            ProtolaneError::InvalidSchema(format!(
                "field {}.{} of kind {} has no type name",
                owner.full_name, field.name, field.kind
            ))
        })?;
        self.resolve(reference, &Scope::of_message(self.schema, message))
    }

    /// Shortest spelling of `target` that resolves back to it from the
    /// package scope of `file`.
    ///
    /// Tries dotted suffixes of the fully-qualified name from the shortest
    /// upwards. Falls back to `.<full name>` when no relative spelling
    /// round-trips, e.g. when the target is not visible from `file`.
    pub fn relative_name(&self, target: TypeHandle, file: FileId) -> String {
        let full_name = self.schema.full_name(target);
        let scope = Scope::of_file(self.schema, file);

        let mut suffixes: Vec<&str> = full_name
            .match_indices('.')
            .map(|(i, _)| &full_name[i + 1..])
            .collect();
        suffixes.reverse();
        suffixes.push(full_name);

        suffixes
            .into_iter()
            .find(|suffix| matches!(self.resolve(suffix, &scope), Ok(h) if h == target))
            .map(str::to_string)
            .unwrap_or_else(|| format!(".{full_name}"))
    }

    fn unresolved(&self, reference: &str, scope: &Scope) -> ProtolaneError {
        ProtolaneError::UnresolvedType {
            reference: reference.to_string(),
            scope: scope.path.clone(),
            file: self.schema.file(scope.file).name.clone(),
        }
    }
}

/// `a.b.C` -> `a.b`, `a` -> root, root -> none.
fn parent_scope(scope: &str) -> Option<&str> {
    if scope.is_empty() {
        return None;
    }
    Some(scope.rfind('.').map_or("", |i| &scope[..i]))
}
