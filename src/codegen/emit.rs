//! Token emission for messages, enums and service clients.

use std::collections::HashSet;

use proc_macro2::{Literal, TokenStream};
use quote::{format_ident, quote};

use super::binding::{CallStyle, ServiceBinding, bind_service};
use super::naming::{
    field_ident, method_ident, module_ident, path_const_ident, path_string, path_tokens,
    type_ident, type_path, variant_ident,
};
use super::UnsupportedMethod;
use crate::classify::FieldClassifier;
use crate::schema::{EnumId, FieldDescriptor, FieldKind, FileId, MessageId, SchemaSet, TypeHandle};
use crate::{ProtolaneError, Result, telemetry};

/// What one source file contributed besides its tokens.
#[derive(Debug, Default)]
pub(crate) struct FileReport {
    /// Messages left out because of an unsupported field.
    pub skipped: Vec<ProtolaneError>,
    pub unsupported: Vec<UnsupportedMethod>,
}

pub(crate) struct Emitter<'r, 'a> {
    classifier: FieldClassifier<'r, 'a>,
    runtime: TokenStream,
    keyed: bool,
}

/// Where generated code sits: a package module, `depth` messages deep.
#[derive(Clone, Copy)]
struct Location<'p> {
    package: &'p str,
    depth: usize,
}

impl<'r, 'a> Emitter<'r, 'a> {
    pub fn new(classifier: FieldClassifier<'r, 'a>, runtime: TokenStream, keyed: bool) -> Self {
        Self {
            classifier,
            runtime,
            keyed,
        }
    }

    fn schema(&self) -> &'a SchemaSet {
        self.classifier.resolver().schema()
    }

    /// Items for every declaration of `file`.
    ///
    /// A message with an unsupported field is left out and recorded in
    /// `report`; any other error fails the whole file.
    pub fn emit_file(&self, file: FileId, report: &mut FileReport) -> Result<TokenStream> {
        let schema = self.schema();
        let source = schema.file(file);
        let location = Location {
            package: &source.package,
            depth: 0,
        };

        let mut items = Vec::new();
        for &message in &source.messages {
            if let Some(tokens) = self.emit_or_skip(message, location, report)? {
                items.push(tokens);
            }
        }
        for &enum_id in &source.enums {
            items.push(self.emit_enum(enum_id)?);
        }
        for service in &source.services {
            let binding = bind_service(self.classifier.resolver(), file, service)?;
            items.push(self.emit_client(&binding, location, report));
        }

        Ok(quote!(#(#items)*))
    }

    fn emit_or_skip(
        &self,
        message: MessageId,
        location: Location<'_>,
        report: &mut FileReport,
    ) -> Result<Option<TokenStream>> {
        if self.schema().message(message).is_map_entry() {
            return Ok(None);
        }
        match self.emit_message(message, location, report) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(error @ ProtolaneError::UnsupportedFieldType { .. }) => {
                tracing::warn!(
                    name = %self.schema().message(message).full_name,
                    %error,
                    "skipping message"
                );
                report.skipped.push(error);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn emit_message(
        &self,
        id: MessageId,
        location: Location<'_>,
        report: &mut FileReport,
    ) -> Result<TokenStream> {
        let message = self.schema().message(id);
        let name = type_ident(&message.name);
        let doc = format!(" `{}`", message.full_name);

        let mut fields = Vec::with_capacity(message.fields.len());
        for field in &message.fields {
            fields.push(self.emit_field(id, field, location)?);
        }
        let declarations = fields.iter().map(|f| &f.declaration);

        let keyed = if self.keyed {
            self.keyed_impl(&name, &message.full_name, &fields)
        } else {
            TokenStream::new()
        };

        let nested = self.emit_nested(id, location, report)?;

        Ok(quote! {
            #[doc = #doc]
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct #name {
                #(#declarations)*
            }
            #keyed
            #nested
        })
    }

    /// Module holding the nested declarations of `id`, if it has any.
    fn emit_nested(
        &self,
        id: MessageId,
        location: Location<'_>,
        report: &mut FileReport,
    ) -> Result<TokenStream> {
        let message = self.schema().message(id);
        let inner = Location {
            package: location.package,
            depth: location.depth + 1,
        };

        let mut items = Vec::new();
        for &nested in &message.messages {
            if let Some(tokens) = self.emit_or_skip(nested, inner, report)? {
                items.push(tokens);
            }
        }
        for &enum_id in &message.enums {
            items.push(self.emit_enum(enum_id)?);
        }
        if items.is_empty() {
            return Ok(TokenStream::new());
        }

        let module = module_ident(&message.name);
        let doc = format!(" Nested message and enum types in `{}`.", message.name);
        Ok(quote! {
            #[doc = #doc]
            pub mod #module {
                #(#items)*
            }
        })
    }

    fn emit_field(
        &self,
        message: MessageId,
        field: &FieldDescriptor,
        location: Location<'_>,
    ) -> Result<EmittedField> {
        let shape = self.classifier.classify(message, field)?;
        let ident = field_ident(&field.name);
        let tag = field.number.to_string();
        let doc = format!(" Keyed as `{}`.", shape.target_type);

        let (attribute, ty) = match (shape.resolved, field.kind) {
            (Some(TypeHandle::Message(entry)), _) if shape.is_map => {
                self.map_field(message, field, entry, location)?
            }
            (Some(TypeHandle::Message(target)), _) => {
                let path = path_tokens(&type_path(
                    self.schema(),
                    TypeHandle::Message(target),
                    location.package,
                    location.depth,
                ));
                if field.is_repeated() {
                    (
                        quote!(message, repeated),
                        quote!(::prost::alloc::vec::Vec<#path>),
                    )
                } else if self.is_recursive(message, target) {
                    (
                        quote!(message, optional, boxed),
                        quote!(::core::option::Option<::prost::alloc::boxed::Box<#path>>),
                    )
                } else {
                    (
                        quote!(message, optional),
                        quote!(::core::option::Option<#path>),
                    )
                }
            }
            (Some(TypeHandle::Enum(target)), _) => {
                let path = path_string(&type_path(
                    self.schema(),
                    TypeHandle::Enum(target),
                    location.package,
                    location.depth,
                ));
                let kind = quote!(enumeration = #path);
                wrap_scalar(kind, quote!(i32), field, shape.is_packed)
            }
            (None, kind) => {
                let (attribute, ty) = scalar_kind(kind).ok_or_else(|| unsupported(
                    self.schema(),
                    message,
                    field,
                    kind.as_str(),
                ))?;
                wrap_scalar(attribute, ty, field, shape.is_packed)
            }
        };

        let declaration = quote! {
            #[doc = #doc]
            #[prost(#attribute, tag = #tag)]
            pub #ident: #ty,
        };

        Ok(EmittedField {
            ident,
            key: field.name.clone(),
            declaration,
        })
    }

    fn map_field(
        &self,
        message: MessageId,
        field: &FieldDescriptor,
        entry: MessageId,
        location: Location<'_>,
    ) -> Result<(TokenStream, TokenStream)> {
        let (key, value) = self.classifier.map_entry_fields(entry).ok_or_else(|| {
            ProtolaneError::InvalidSchema(format!(
                "map field {}.{} has no key/value entry",
                self.schema().message(message).full_name,
                field.name
            ))
        })?;

        let (_, key_ty) = scalar_kind(key.kind)
            .filter(|_| !matches!(key.kind, FieldKind::Bytes | FieldKind::Float | FieldKind::Double))
            .ok_or_else(|| unsupported(self.schema(), message, field, "map key"))?;

        if value.is_repeated() {
            return Err(unsupported(self.schema(), message, field, "repeated map value"));
        }

        let (value_kind, value_ty) = match value.kind {
            FieldKind::Message | FieldKind::Enum => {
                let handle = self.classifier.resolver().resolve_field(entry, value)?;
                let segments = type_path(self.schema(), handle, location.package, location.depth);
                match handle {
                    TypeHandle::Message(_) => ("message".to_string(), path_tokens(&segments)),
                    TypeHandle::Enum(_) => (
                        format!("enumeration({})", path_string(&segments)),
                        quote!(i32),
                    ),
                }
            }
            kind => {
                let (_, ty) = scalar_kind(kind)
                    .ok_or_else(|| unsupported(self.schema(), message, field, kind.as_str()))?;
                (kind.as_str().to_string(), ty)
            }
        };

        let kinds = format!("{}, {}", key.kind.as_str(), value_kind);
        Ok((
            quote!(map = #kinds),
            quote!(::std::collections::HashMap<#key_ty, #value_ty>),
        ))
    }

    /// Whether `target` leads back to `owner` through singular message
    /// fields, in which case the field must be boxed to give the struct a
    /// finite size.
    fn is_recursive(&self, owner: MessageId, target: MessageId) -> bool {
        let schema = self.schema();
        let resolver = self.classifier.resolver();
        let mut seen = HashSet::new();
        let mut pending = vec![target];

        while let Some(current) = pending.pop() {
            if current == owner {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for field in &schema.message(current).fields {
                if field.kind != FieldKind::Message || field.is_repeated() {
                    continue;
                }
                if let Ok(TypeHandle::Message(next)) = resolver.resolve_field(current, field) {
                    pending.push(next);
                }
            }
        }
        false
    }

    fn keyed_impl(
        &self,
        name: &proc_macro2::Ident,
        full_name: &str,
        fields: &[EmittedField],
    ) -> TokenStream {
        let rt = &self.runtime;
        let idents: Vec<_> = fields.iter().map(|f| &f.ident).collect();
        let keys: Vec<_> = fields.iter().map(|f| f.key.as_str()).collect();
        // Empty messages neither fill nor read the object.
        let (mutability, parsed) = if fields.is_empty() {
            (TokenStream::new(), format_ident!("_object"))
        } else {
            (quote!(mut), format_ident!("object"))
        };

        quote! {
            impl #rt::keyed::Keyed for #name {
                fn to_keyed(&self) -> #rt::keyed::Value {
                    let #mutability object = #rt::keyed::Object::new();
                    #(
                        object.insert(
                            #keys.to_string(),
                            #rt::keyed::Keyed::to_keyed(&self.#idents),
                        );
                    )*
                    #rt::keyed::Value::Object(object)
                }

                fn from_keyed(value: &#rt::keyed::Value) -> #rt::Result<Self> {
                    let #parsed = #rt::keyed::expect_object(value, #full_name)?;
                    ::core::result::Result::Ok(Self {
                        #( #idents: #rt::keyed::field(#parsed, #keys)?, )*
                    })
                }
            }
        }
    }

    // =========================================================================
    // Enums
    // =========================================================================

    fn emit_enum(&self, id: EnumId) -> Result<TokenStream> {
        let decl = self.schema().enum_type(id);
        if decl.values.is_empty() {
            return Err(ProtolaneError::InvalidSchema(format!(
                "enum {} has no values",
                decl.full_name
            )));
        }

        let name = type_ident(&decl.name);
        let doc = format!(" `{}`", decl.full_name);

        // Aliases share a number; the first spelling is kept.
        let mut numbers = HashSet::new();
        let mut variants = HashSet::new();
        let mut idents = Vec::new();
        let mut values = Vec::new();
        let mut names = Vec::new();
        for value in &decl.values {
            let ident = variant_ident(&decl.name, &value.name);
            if !numbers.insert(value.number) || !variants.insert(ident.to_string()) {
                continue;
            }
            idents.push(ident);
            values.push(Literal::i32_unsuffixed(value.number));
            names.push(value.name.as_str());
        }

        Ok(quote! {
            #[doc = #doc]
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
            #[repr(i32)]
            pub enum #name {
                #( #idents = #values, )*
            }

            impl #name {
                /// Value name as written in the schema.
                pub fn as_str_name(&self) -> &'static str {
                    match self {
                        #( Self::#idents => #names, )*
                    }
                }

                /// Look a value up by its schema name.
                pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
                    match value {
                        #( #names => ::core::option::Option::Some(Self::#idents), )*
                        _ => ::core::option::Option::None,
                    }
                }
            }
        })
    }

    // =========================================================================
    // Service clients
    // =========================================================================

    fn emit_client(
        &self,
        binding: &ServiceBinding,
        location: Location<'_>,
        report: &mut FileReport,
    ) -> TokenStream {
        let rt = &self.runtime;
        let schema = self.schema();
        let client = format_ident!("{}Client", type_ident(&binding.name));
        let service_id = &binding.service_id;
        let doc = format!(" Client for `{service_id}`.");

        let mut constants = Vec::new();
        let mut methods = Vec::new();
        for method in &binding.methods {
            metrics::counter!(telemetry::GENERATED_BINDINGS_TOTAL,
                "cardinality" => method.cardinality.as_str()
            )
            .increment(1);

            let constant = path_const_ident(&method.name);
            let path = &method.path;
            let constant_doc = format!(" `{path}` ({}).", method.cardinality);
            constants.push(quote! {
                #[doc = #constant_doc]
                pub const #constant: &'static str = #path;
            });

            let request = path_tokens(&type_path(
                schema,
                TypeHandle::Message(method.request),
                location.package,
                location.depth,
            ));
            let response = path_tokens(&type_path(
                schema,
                TypeHandle::Message(method.response),
                location.package,
                location.depth,
            ));
            let ident = method_ident(&method.name);

            let call = match method.call {
                CallStyle::Unary => quote!(unary),
                CallStyle::ServerStream => quote!(server_stream),
                CallStyle::Unsupported => {
                    tracing::warn!(
                        service = %service_id,
                        method = %method.name,
                        cardinality = %method.cardinality,
                        "no binding generated for streaming request method"
                    );
                    report.unsupported.push(UnsupportedMethod {
                        service_id: service_id.clone(),
                        method: method.name.clone(),
                        path: method.path.clone(),
                        cardinality: method.cardinality,
                    });
                    continue;
                }
            };

            let method_doc = format!(" Calls `{path}`. Nothing is sent until the source is subscribed.");
            methods.push(quote! {
                #[doc = #method_doc]
                pub fn #ident(
                    &self,
                    request: &#request,
                    metadata: ::core::option::Option<#rt::Metadata>,
                ) -> #rt::EventSource<#response> {
                    self.inner.#call(Self::#constant, request, metadata)
                }
            });
        }

        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone)]
            pub struct #client {
                inner: #rt::ServiceClient,
            }

            impl #client {
                /// Service identifier, also the settings registry key.
                pub const SERVICE_ID: &'static str = #service_id;
                #(#constants)*

                /// Create a client. Fails when no settings are passed, none
                /// are registered for the service and the factory has no
                /// default.
                pub fn new(
                    settings: ::core::option::Option<#rt::ClientSettings>,
                    factory: &dyn #rt::TransportFactory,
                ) -> #rt::Result<Self> {
                    #rt::ServiceClient::new(Self::SERVICE_ID, settings, factory)
                        .map(|inner| Self { inner })
                }

                /// Create a client over an existing transport.
                pub fn with_transport(transport: ::std::sync::Arc<dyn #rt::Transport>) -> Self {
                    Self {
                        inner: #rt::ServiceClient::with_transport(Self::SERVICE_ID, transport),
                    }
                }

                #(#methods)*
            }
        }
    }
}

struct EmittedField {
    ident: proc_macro2::Ident,
    /// Key in the keyed representation: the schema field name.
    key: String,
    declaration: TokenStream,
}

/// prost kind attribute and Rust type for a scalar kind.
fn scalar_kind(kind: FieldKind) -> Option<(TokenStream, TokenStream)> {
    let ty = match kind {
        FieldKind::Double => quote!(f64),
        FieldKind::Float => quote!(f32),
        FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32 => quote!(i32),
        FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64 => quote!(i64),
        FieldKind::Uint32 | FieldKind::Fixed32 => quote!(u32),
        FieldKind::Uint64 | FieldKind::Fixed64 => quote!(u64),
        FieldKind::Bool => quote!(bool),
        FieldKind::String => quote!(::prost::alloc::string::String),
        FieldKind::Bytes => {
            return Some((
                quote!(bytes = "vec"),
                quote!(::prost::alloc::vec::Vec<u8>),
            ));
        }
        FieldKind::Enum | FieldKind::Message | FieldKind::Group => return None,
    };
    let attribute = format_ident!("{}", kind.as_str());
    Some((quote!(#attribute), ty))
}

/// Apply cardinality and presence to a scalar or enum field.
fn wrap_scalar(
    kind: TokenStream,
    ty: TokenStream,
    field: &FieldDescriptor,
    is_packed: bool,
) -> (TokenStream, TokenStream) {
    if field.is_repeated() {
        let packed = if field.kind.is_packable() && !is_packed {
            quote!(, packed = "false")
        } else {
            TokenStream::new()
        };
        (
            quote!(#kind, repeated #packed),
            quote!(::prost::alloc::vec::Vec<#ty>),
        )
    } else if field.optional {
        (quote!(#kind, optional), quote!(::core::option::Option<#ty>))
    } else {
        (kind, ty)
    }
}

fn unsupported(
    schema: &SchemaSet,
    message: MessageId,
    field: &FieldDescriptor,
    kind: &str,
) -> ProtolaneError {
    ProtolaneError::UnsupportedFieldType {
        message: schema.message(message).full_name.clone(),
        field: field.name.clone(),
        kind: kind.to_string(),
    }
}
