//! Rust client generation.
//!
//! [`Generator`] turns a [`SchemaSet`] into one Rust source per package:
//! prost message structs and enums, [`Keyed`] impls, and a
//! `<Service>Client` per service whose methods return cold
//! [`EventSource`]s. Packages map to nested modules, so a consumer mounts
//! `echo.v1.rs` as `pub mod echo { pub mod v1 { include!(...); } }`.
//!
//! [`Keyed`]: crate::keyed::Keyed
//! [`EventSource`]: crate::transport::EventSource

pub mod binding;
mod emit;
pub mod naming;

use std::collections::BTreeMap;

use proc_macro2::TokenStream;
use serde::{Deserialize, Serialize};

use crate::classify::FieldClassifier;
use crate::resolve::TypeResolver;
use crate::schema::{FileId, MethodCardinality, SchemaSet};
use crate::{ProtolaneError, Result};

pub use binding::{CallStyle, MethodBinding, ServiceBinding, SettingsRule, bind_service};
use emit::{Emitter, FileReport};

/// Header of every generated source.
pub const GENERATED_HEADER: &str = "// @generated by protolane. Do not edit.\n";

/// Generator knobs, also read from the `[generator]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Path generated code uses to reach this crate.
    pub runtime_crate: String,
    /// Emit [`Keyed`](crate::keyed::Keyed) impls for messages.
    pub keyed: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            runtime_crate: "::protolane".to_string(),
            keyed: true,
        }
    }
}

/// Generated source for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub package: String,
    /// Output file name, see [`naming::package_file_name`].
    pub name: String,
    /// Schema files that contributed to this package.
    pub sources: Vec<String>,
    pub source: String,
}

/// A schema file whose declarations were left out of the output.
#[derive(Debug)]
pub struct GenerationError {
    pub file: String,
    pub error: ProtolaneError,
}

/// A method with no binding because its cardinality has no call shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedMethod {
    pub service_id: String,
    pub method: String,
    pub path: String,
    pub cardinality: MethodCardinality,
}

#[derive(Debug, Default)]
pub struct GenerationOutput {
    pub files: Vec<GeneratedFile>,
    /// Failed schema files, and messages skipped for unsupported fields.
    pub errors: Vec<GenerationError>,
    pub unsupported: Vec<UnsupportedMethod>,
}

impl GenerationOutput {
    /// No file failed and no message was skipped.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn file(&self, package: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.package == package)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Generator {
    options: GeneratorOptions,
}

impl Generator {
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Generate sources for every package in `schema`.
    ///
    /// Fails only when the schema cannot be indexed or the options are
    /// invalid. Errors inside a schema file drop that file from the output
    /// and are listed in [`GenerationOutput::errors`].
    #[tracing::instrument(skip_all, fields(files = schema.files().count()))]
    pub fn generate(&self, schema: &SchemaSet) -> Result<GenerationOutput> {
        let runtime: TokenStream = self.options.runtime_crate.parse().map_err(|e| {
            ProtolaneError::Configuration(format!(
                "invalid runtime crate path {:?}: {e}",
                self.options.runtime_crate
            ))
        })?;

        let resolver = TypeResolver::new(schema)?;
        let emitter = Emitter::new(FieldClassifier::new(&resolver), runtime, self.options.keyed);

        let mut output = GenerationOutput::default();
        let mut packages: BTreeMap<&str, (Vec<String>, Vec<TokenStream>)> = BTreeMap::new();

        for (id, file) in schema.files() {
            let mut report = FileReport::default();
            match emitter.emit_file(id, &mut report) {
                Ok(tokens) => {
                    let entry = packages.entry(file.package.as_str()).or_default();
                    entry.0.push(file.name.clone());
                    entry.1.push(tokens);
                }
                Err(error) => {
                    tracing::warn!(file = %file.name, %error, "schema file left out of output");
                    output.errors.push(GenerationError {
                        file: file.name.clone(),
                        error,
                    });
                }
            }
            output
                .errors
                .extend(report.skipped.into_iter().map(|error| GenerationError {
                    file: file.name.clone(),
                    error,
                }));
            output.unsupported.extend(report.unsupported);
        }

        for (package, (sources, items)) in packages {
            let tokens: TokenStream = items.into_iter().collect();
            let source = format!("{GENERATED_HEADER}{tokens}\n");
            tracing::info!(package = %package, files = sources.len(), "generated package");
            output.files.push(GeneratedFile {
                package: package.to_string(),
                name: naming::package_file_name(package),
                sources,
                source,
            });
        }

        Ok(output)
    }
}

/// Bindings for every service in `schema`, in file order.
pub fn service_bindings(schema: &SchemaSet) -> Result<Vec<ServiceBinding>> {
    let resolver = TypeResolver::new(schema)?;
    let mut bindings = Vec::new();
    for (id, file) in schema.files() {
        for service in &file.services {
            bindings.push(bind_service(&resolver, id, service)?);
        }
    }
    Ok(bindings)
}

/// Bindings of the services declared in one file.
pub fn file_bindings(schema: &SchemaSet, file: FileId) -> Result<Vec<ServiceBinding>> {
    let resolver = TypeResolver::new(schema)?;
    schema
        .file(file)
        .services
        .iter()
        .map(|service| bind_service(&resolver, file, service))
        .collect()
}
