//! Tests for client generation. Generated sources are parsed with `syn`
//! and inspected structurally.

use quote::ToTokens;

use protolane::codegen::{CallStyle, service_bindings};
use protolane::schema::{
    EnumDecl, FieldDescriptor, FieldKind, FileDecl, MessageDecl, MethodCardinality,
    MethodDescriptor, ServiceDescriptor, Syntax,
};
use protolane::{GenerationOutput, Generator, GeneratorOptions, ProtolaneError, SchemaSet};

// ============================================================================
// Fixture
// ============================================================================

fn echo_file() -> FileDecl {
    FileDecl::new("echo.proto", "echo.v1", Syntax::Proto3)
        .message(
            MessageDecl::new("EchoRequest")
                .field(FieldDescriptor::scalar("text", 1, FieldKind::String))
                .field(FieldDescriptor::scalar("id", 2, FieldKind::Int64))
                .field(FieldDescriptor::scalar("samples", 3, FieldKind::Int32).repeated())
                .field(
                    FieldDescriptor::scalar("raw", 4, FieldKind::Int32)
                        .repeated()
                        .packed(false),
                )
                .field(FieldDescriptor::named("tags", 5, FieldKind::Message, "TagsEntry").repeated())
                .field(FieldDescriptor::named("level", 6, FieldKind::Enum, "Level"))
                .field(FieldDescriptor::scalar("note", 7, FieldKind::String).optional())
                .field(FieldDescriptor::scalar("blob", 8, FieldKind::Bytes))
                .nested(MessageDecl::map_entry(
                    "TagsEntry",
                    FieldDescriptor::scalar("key", 1, FieldKind::String),
                    FieldDescriptor::named("value", 2, FieldKind::Message, "Tag"),
                )),
        )
        .message(MessageDecl::new("Tag").field(FieldDescriptor::scalar("name", 1, FieldKind::String)))
        .message(
            MessageDecl::new("Node")
                .field(FieldDescriptor::named("next", 1, FieldKind::Message, "Node"))
                .field(FieldDescriptor::named("children", 2, FieldKind::Message, "Node").repeated())
                .field(FieldDescriptor::named("inner", 3, FieldKind::Message, "Inner"))
                .nested(
                    MessageDecl::new("Inner")
                        .field(FieldDescriptor::named("kind", 1, FieldKind::Enum, "Kind")),
                )
                .nested_enum(
                    EnumDecl::new("Kind")
                        .value("KIND_UNSPECIFIED", 0)
                        .value("KIND_LEAF", 1),
                ),
        )
        .message(MessageDecl::new("EchoReply").field(FieldDescriptor::scalar("text", 1, FieldKind::String)))
        .enum_decl(
            EnumDecl::new("Level")
                .value("LEVEL_UNSPECIFIED", 0)
                .value("LEVEL_HIGH", 1),
        )
        .service(
            ServiceDescriptor::new("EchoService")
                .method(MethodDescriptor::new("Echo", "EchoRequest", "EchoReply", MethodCardinality::Unary))
                .method(MethodDescriptor::new(
                    "Watch",
                    "EchoRequest",
                    ".echo.v1.EchoReply",
                    MethodCardinality::ServerStreaming,
                ))
                .method(MethodDescriptor::new(
                    "Upload",
                    "EchoRequest",
                    "EchoReply",
                    MethodCardinality::ClientStreaming,
                ))
                .method(MethodDescriptor::new(
                    "Chat",
                    "EchoRequest",
                    "EchoReply",
                    MethodCardinality::BidiStreaming,
                )),
        )
}

/// Same package as `echo.proto`; one message uses an unsupported group.
fn legacy_file() -> FileDecl {
    FileDecl::new("legacy.proto", "echo.v1", Syntax::Proto2)
        .message(MessageDecl::new("Old").field(FieldDescriptor::named(
            "result",
            1,
            FieldKind::Group,
            "Result",
        )))
        .message(MessageDecl::new("Fine").field(FieldDescriptor::scalar("ok", 1, FieldKind::Bool)))
}

/// References a type nobody declares.
fn broken_file() -> FileDecl {
    FileDecl::new("broken.proto", "broken", Syntax::Proto3).message(
        MessageDecl::new("Bad").field(FieldDescriptor::named("m", 1, FieldKind::Message, "Missing")),
    )
}

/// Uses a type from another package.
fn other_file() -> FileDecl {
    FileDecl::new("other.proto", "other", Syntax::Proto3)
        .import("echo.proto")
        .message(MessageDecl::new("Wrapper").field(FieldDescriptor::named(
            "reply",
            1,
            FieldKind::Message,
            "echo.v1.EchoReply",
        )))
}

fn schema() -> SchemaSet {
    SchemaSet::new(vec![echo_file(), legacy_file(), broken_file(), other_file()]).unwrap()
}

fn generate(options: GeneratorOptions) -> GenerationOutput {
    Generator::new(options).generate(&schema()).unwrap()
}

// ============================================================================
// Helpers
// ============================================================================

fn parse(output: &GenerationOutput, package: &str) -> syn::File {
    let file = output
        .file(package)
        .unwrap_or_else(|| panic!("no output for {package}"));
    syn::parse_file(&file.source).unwrap_or_else(|e| panic!("{package} does not parse: {e}"))
}

fn compact(tokens: impl ToTokens) -> String {
    tokens.to_token_stream().to_string().replace(' ', "")
}

fn find_struct<'f>(items: &'f [syn::Item], name: &str) -> Option<&'f syn::ItemStruct> {
    items.iter().find_map(|item| match item {
        syn::Item::Struct(s) if s.ident == name => Some(s),
        _ => None,
    })
}

fn find_enum<'f>(items: &'f [syn::Item], name: &str) -> Option<&'f syn::ItemEnum> {
    items.iter().find_map(|item| match item {
        syn::Item::Enum(e) if e.ident == name => Some(e),
        _ => None,
    })
}

fn find_mod<'f>(items: &'f [syn::Item], name: &str) -> Option<&'f [syn::Item]> {
    items.iter().find_map(|item| match item {
        syn::Item::Mod(m) if m.ident == name => m.content.as_ref().map(|(_, items)| &items[..]),
        _ => None,
    })
}

/// Inherent or trait impls for `name`, with their trait path if any.
fn impls_for<'f>(items: &'f [syn::Item], name: &str) -> Vec<&'f syn::ItemImpl> {
    items
        .iter()
        .filter_map(|item| match item {
            syn::Item::Impl(i) if compact(&i.self_ty) == name => Some(i),
            _ => None,
        })
        .collect()
}

fn field<'s>(item: &'s syn::ItemStruct, name: &str) -> &'s syn::Field {
    item.fields
        .iter()
        .find(|f| f.ident.as_ref().is_some_and(|i| i == name))
        .unwrap_or_else(|| panic!("no field {name} in {}", item.ident))
}

fn prost_attr(field: &syn::Field) -> String {
    field
        .attrs
        .iter()
        .find(|a| a.path().is_ident("prost"))
        .map(compact)
        .unwrap_or_default()
}

// ============================================================================
// Output layout
// ============================================================================

#[test]
fn test_one_file_per_package() {
    let output = generate(GeneratorOptions::default());

    let packages: Vec<_> = output.files.iter().map(|f| f.package.as_str()).collect();
    assert_eq!(packages, vec!["echo.v1", "other"]);

    let echo = output.file("echo.v1").unwrap();
    assert_eq!(echo.name, "echo.v1.rs");
    assert_eq!(echo.sources, vec!["echo.proto", "legacy.proto"]);
    assert!(echo.source.starts_with("// @generated"));

    for file in &output.files {
        syn::parse_file(&file.source).unwrap();
    }
}

#[test]
fn test_failures_are_isolated_per_file_and_message() {
    let output = generate(GeneratorOptions::default());
    assert!(!output.is_success());
    assert!(output.file("broken").is_none());

    let broken = output.errors.iter().find(|e| e.file == "broken.proto").unwrap();
    assert!(matches!(broken.error, ProtolaneError::UnresolvedType { .. }));

    let legacy = output.errors.iter().find(|e| e.file == "legacy.proto").unwrap();
    assert!(matches!(
        legacy.error,
        ProtolaneError::UnsupportedFieldType { ref message, .. } if message == "echo.v1.Old"
    ));

    // The rest of legacy.proto is still generated.
    let echo = parse(&output, "echo.v1");
    assert!(find_struct(&echo.items, "Old").is_none());
    assert!(find_struct(&echo.items, "Fine").is_some());
}

#[test]
fn test_duplicate_declarations_abort_generation() {
    let a = FileDecl::new("a.proto", "dup", Syntax::Proto3).message(MessageDecl::new("Thing"));
    let b = FileDecl::new("b.proto", "dup", Syntax::Proto3).message(MessageDecl::new("Thing"));
    let schema = SchemaSet::new(vec![a, b]).unwrap();

    let err = Generator::default().generate(&schema).unwrap_err();
    assert!(matches!(err, ProtolaneError::DuplicateType { .. }));
}

#[test]
fn test_invalid_runtime_path_is_configuration_error() {
    let options = GeneratorOptions {
        runtime_crate: "rt(".to_string(),
        ..GeneratorOptions::default()
    };
    let err = Generator::new(options).generate(&schema()).unwrap_err();
    assert!(matches!(err, ProtolaneError::Configuration(_)));
}

// ============================================================================
// Messages
// ============================================================================

#[test]
fn test_field_attributes() {
    let output = generate(GeneratorOptions::default());
    let echo = parse(&output, "echo.v1");
    let request = find_struct(&echo.items, "EchoRequest").unwrap();

    assert_eq!(prost_attr(field(request, "text")), "#[prost(string,tag=\"1\")]");
    assert_eq!(prost_attr(field(request, "id")), "#[prost(int64,tag=\"2\")]");
    assert_eq!(
        prost_attr(field(request, "samples")),
        "#[prost(int32,repeated,tag=\"3\")]"
    );
    assert_eq!(
        prost_attr(field(request, "raw")),
        "#[prost(int32,repeated,packed=\"false\",tag=\"4\")]"
    );
    assert_eq!(
        prost_attr(field(request, "tags")),
        "#[prost(map=\"string,message\",tag=\"5\")]"
    );
    assert_eq!(
        prost_attr(field(request, "level")),
        "#[prost(enumeration=\"Level\",tag=\"6\")]"
    );
    assert_eq!(
        prost_attr(field(request, "note")),
        "#[prost(string,optional,tag=\"7\")]"
    );
    assert_eq!(
        prost_attr(field(request, "blob")),
        "#[prost(bytes=\"vec\",tag=\"8\")]"
    );
}

#[test]
fn test_field_types() {
    let output = generate(GeneratorOptions::default());
    let echo = parse(&output, "echo.v1");
    let request = find_struct(&echo.items, "EchoRequest").unwrap();

    assert_eq!(compact(&field(request, "id").ty), "i64");
    assert_eq!(
        compact(&field(request, "tags").ty),
        "::std::collections::HashMap<::prost::alloc::string::String,Tag>"
    );
    assert_eq!(compact(&field(request, "level").ty), "i32");
    assert_eq!(
        compact(&field(request, "note").ty),
        "::core::option::Option<::prost::alloc::string::String>"
    );

    // Map entries are folded into the map field, never emitted.
    assert!(find_mod(&echo.items, "echo_request").is_none());
    assert!(find_struct(&echo.items, "TagsEntry").is_none());
}

#[test]
fn test_recursive_field_is_boxed() {
    let output = generate(GeneratorOptions::default());
    let echo = parse(&output, "echo.v1");
    let node = find_struct(&echo.items, "Node").unwrap();

    assert_eq!(
        compact(&field(node, "next").ty),
        "::core::option::Option<::prost::alloc::boxed::Box<Node>>"
    );
    assert!(prost_attr(field(node, "next")).contains("boxed"));
    assert_eq!(
        compact(&field(node, "children").ty),
        "::prost::alloc::vec::Vec<Node>"
    );
    assert_eq!(
        compact(&field(node, "inner").ty),
        "::core::option::Option<node::Inner>"
    );
}

#[test]
fn test_nested_types_live_in_owner_module() {
    let output = generate(GeneratorOptions::default());
    let echo = parse(&output, "echo.v1");
    let node = find_mod(&echo.items, "node").unwrap();

    let inner = find_struct(node, "Inner").unwrap();
    assert_eq!(
        prost_attr(field(inner, "kind")),
        "#[prost(enumeration=\"super::node::Kind\",tag=\"1\")]"
    );

    let kind = find_enum(node, "Kind").unwrap();
    let variants: Vec<_> = kind.variants.iter().map(|v| v.ident.to_string()).collect();
    assert_eq!(variants, vec!["Unspecified", "Leaf"]);
}

#[test]
fn test_cross_package_reference_climbs_to_root() {
    let output = generate(GeneratorOptions::default());
    let other = parse(&output, "other");
    let wrapper = find_struct(&other.items, "Wrapper").unwrap();

    assert_eq!(
        compact(&field(wrapper, "reply").ty),
        "::core::option::Option<super::echo::v1::EchoReply>"
    );
}

#[test]
fn test_versioned_package_paths_keep_segment_spelling() {
    let relay = FileDecl::new("relay.proto", "relay", Syntax::Proto3)
        .import("echo.proto")
        .message(
            MessageDecl::new("Forward")
                .field(FieldDescriptor::named("reply", 1, FieldKind::Message, "echo.v1.EchoReply"))
                .field(FieldDescriptor::named("level", 2, FieldKind::Enum, "echo.v1.Level")),
        )
        .service(ServiceDescriptor::new("Relay").method(MethodDescriptor::new(
            "Send",
            "echo.v1.EchoRequest",
            "Forward",
            MethodCardinality::Unary,
        )));
    let schema = SchemaSet::new(vec![echo_file(), relay]).unwrap();
    let output = Generator::default().generate(&schema).unwrap();
    let relay = parse(&output, "relay");

    let forward = find_struct(&relay.items, "Forward").unwrap();
    assert_eq!(
        compact(&field(forward, "reply").ty),
        "::core::option::Option<super::echo::v1::EchoReply>"
    );
    assert_eq!(
        prost_attr(field(forward, "level")),
        "#[prost(enumeration=\"super::echo::v1::Level\",tag=\"2\")]"
    );

    let client = impls_for(&relay.items, "RelayClient");
    let send = client[0]
        .items
        .iter()
        .find_map(|item| match item {
            syn::ImplItem::Fn(f) if f.sig.ident == "send" => Some(f),
            _ => None,
        })
        .unwrap();
    let request = send
        .sig
        .inputs
        .iter()
        .find_map(|input| match input {
            syn::FnArg::Typed(arg) if compact(&arg.pat) == "request" => Some(compact(&arg.ty)),
            _ => None,
        })
        .unwrap();
    assert_eq!(request, "&super::echo::v1::EchoRequest");
}

#[test]
fn test_underscore_field_name_gets_a_usable_identifier() {
    let file = FileDecl::new("under.proto", "under", Syntax::Proto3).message(
        MessageDecl::new("Slot")
            .field(FieldDescriptor::scalar("_", 1, FieldKind::Int32))
            .field(FieldDescriptor::scalar("value", 2, FieldKind::Int32)),
    );
    let schema = SchemaSet::new(vec![file]).unwrap();
    let output = Generator::default().generate(&schema).unwrap();
    assert!(output.is_success());

    let under = parse(&output, "under");
    let slot = find_struct(&under.items, "Slot").unwrap();
    assert_eq!(prost_attr(field(slot, "__")), "#[prost(int32,tag=\"1\")]");
    // The keyed form still uses the schema name.
    let keyed = compact(impls_for(&under.items, "Slot")[0]);
    assert!(keyed.contains("\"_\".to_string()"));
}

#[test]
fn test_names_that_are_not_identifiers_are_rejected_at_load() {
    let unnamed = FileDecl::new("unnamed.proto", "bad", Syntax::Proto3)
        .message(MessageDecl::new("Slot").field(FieldDescriptor::scalar("", 1, FieldKind::Int32)));
    assert!(matches!(
        SchemaSet::new(vec![unnamed]),
        Err(ProtolaneError::InvalidSchema(ref message)) if message.contains("bad.Slot")
    ));

    let dashed = FileDecl::new("dashed.proto", "bad", Syntax::Proto3)
        .enum_decl(EnumDecl::new("Mode").value("MODE-ON", 0));
    assert!(matches!(
        SchemaSet::new(vec![dashed]),
        Err(ProtolaneError::InvalidSchema(_))
    ));
}

#[test]
fn test_empty_message_keyed_impl_binds_nothing_it_reads() {
    let file = FileDecl::new("empty.proto", "empty", Syntax::Proto3)
        .message(MessageDecl::new("Nothing"));
    let schema = SchemaSet::new(vec![file]).unwrap();
    let output = Generator::default().generate(&schema).unwrap();
    let empty = parse(&output, "empty");

    let keyed = compact(impls_for(&empty.items, "Nothing")[0]);
    assert!(keyed.contains("let_object="));
    assert!(!keyed.contains("let_=&object"));
}

#[test]
fn test_enum_names_round_trip() {
    let output = generate(GeneratorOptions::default());
    let echo = parse(&output, "echo.v1");
    let level = find_enum(&echo.items, "Level").unwrap();

    let variants: Vec<_> = level.variants.iter().map(|v| v.ident.to_string()).collect();
    assert_eq!(variants, vec!["Unspecified", "High"]);

    let methods: Vec<String> = impls_for(&echo.items, "Level")
        .iter()
        .flat_map(|i| &i.items)
        .filter_map(|item| match item {
            syn::ImplItem::Fn(f) => Some(f.sig.ident.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(methods, vec!["as_str_name", "from_str_name"]);
}

#[test]
fn test_keyed_impls_follow_option() {
    let keyed = |options| {
        let output = generate(options);
        let echo = parse(&output, "echo.v1");
        impls_for(&echo.items, "EchoRequest").iter().any(|i| {
            i.trait_
                .as_ref()
                .is_some_and(|(_, path, _)| compact(path).ends_with("keyed::Keyed"))
        })
    };

    assert!(keyed(GeneratorOptions::default()));
    assert!(!keyed(GeneratorOptions {
        keyed: false,
        ..GeneratorOptions::default()
    }));
}

// ============================================================================
// Clients
// ============================================================================

#[test]
fn test_client_binds_unary_and_server_streaming() {
    let output = generate(GeneratorOptions::default());
    let echo = parse(&output, "echo.v1");
    assert!(find_struct(&echo.items, "EchoServiceClient").is_some());

    let client = impls_for(&echo.items, "EchoServiceClient");
    assert_eq!(client.len(), 1);

    let mut consts = Vec::new();
    let mut methods = Vec::new();
    for item in &client[0].items {
        match item {
            syn::ImplItem::Const(c) => consts.push(c.ident.to_string()),
            syn::ImplItem::Fn(f) => methods.push(f.sig.ident.to_string()),
            _ => {}
        }
    }

    assert_eq!(
        consts,
        vec!["SERVICE_ID", "ECHO_PATH", "WATCH_PATH", "UPLOAD_PATH", "CHAT_PATH"]
    );
    assert_eq!(methods, vec!["new", "with_transport", "echo", "watch"]);
}

#[test]
fn test_streaming_request_methods_are_reported() {
    let output = generate(GeneratorOptions::default());

    let reported: Vec<_> = output
        .unsupported
        .iter()
        .map(|m| (m.path.as_str(), m.cardinality))
        .collect();
    assert_eq!(
        reported,
        vec![
            ("/echo.v1.EchoService/Upload", MethodCardinality::ClientStreaming),
            ("/echo.v1.EchoService/Chat", MethodCardinality::BidiStreaming),
        ]
    );
}

#[test]
fn test_client_uses_configured_runtime_path() {
    let output = generate(GeneratorOptions {
        runtime_crate: "crate::rt".to_string(),
        ..GeneratorOptions::default()
    });
    let echo = parse(&output, "echo.v1");
    let client = find_struct(&echo.items, "EchoServiceClient").unwrap();
    assert_eq!(compact(&field(client, "inner").ty), "crate::rt::ServiceClient");
}

#[test]
fn test_service_bindings() {
    let schema = SchemaSet::new(vec![echo_file()]).unwrap();
    let bindings = service_bindings(&schema).unwrap();
    assert_eq!(bindings.len(), 1);

    let service = &bindings[0];
    assert_eq!(service.service_id, "echo.v1.EchoService");

    let calls: Vec<_> = service
        .methods
        .iter()
        .map(|m| (m.path.as_str(), m.call))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("/echo.v1.EchoService/Echo", CallStyle::Unary),
            ("/echo.v1.EchoService/Watch", CallStyle::ServerStream),
            ("/echo.v1.EchoService/Upload", CallStyle::Unsupported),
            ("/echo.v1.EchoService/Chat", CallStyle::Unsupported),
        ]
    );
    assert!(service
        .methods
        .iter()
        .all(|m| m.settings.registry_key == "echo.v1.EchoService"));

    let reply = schema.message_by_name("echo.v1.EchoReply").unwrap();
    assert_eq!(service.methods[1].response, reply);
}

#[test]
fn test_enum_as_method_type_is_rejected() {
    let file = FileDecl::new("bad.proto", "bad", Syntax::Proto3)
        .enum_decl(EnumDecl::new("Mood").value("MOOD_OK", 0))
        .message(MessageDecl::new("Ping"))
        .service(ServiceDescriptor::new("Moody").method(MethodDescriptor::new(
            "Feel",
            "Ping",
            "Mood",
            MethodCardinality::Unary,
        )));
    let schema = SchemaSet::new(vec![file]).unwrap();

    let err = service_bindings(&schema).unwrap_err();
    assert!(matches!(err, ProtolaneError::InvalidSchema(_)));
}
