//! Tests for field classification.

use protolane::schema::{
    EnumDecl, FieldDescriptor, FieldKind, FileDecl, MessageDecl, Syntax,
};
use protolane::{
    DataType, FieldClassifier, FieldShape, MapKey, MessageId, ProtolaneError, SchemaSet,
    TypeResolver,
};

fn schema_with(syntax: Syntax, message: MessageDecl) -> SchemaSet {
    let file = FileDecl::new("stats.proto", "stats", syntax)
        .enum_decl(EnumDecl::new("Level").value("LEVEL_LOW", 0).value("LEVEL_HIGH", 1))
        .message(MessageDecl::new("Point").field(FieldDescriptor::scalar("x", 1, FieldKind::Int32)))
        .message(message);
    SchemaSet::new(vec![file]).unwrap()
}

fn classify_in(schema: &SchemaSet, message: &str, field: &str) -> Result<FieldShape, ProtolaneError> {
    let resolver = TypeResolver::new(schema).unwrap();
    let classifier = FieldClassifier::new(&resolver);
    let id: MessageId = schema.message_by_name(message).unwrap();
    let field = schema.message(id).field(field).unwrap();
    classifier.classify(id, field)
}

// ============================================================================
// Maps
// ============================================================================

#[test]
fn test_map_of_repeated_int32() {
    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Report")
            .field(FieldDescriptor::named("scores", 1, FieldKind::Message, "ScoresEntry").repeated())
            .nested(MessageDecl::map_entry(
                "ScoresEntry",
                FieldDescriptor::scalar("key", 1, FieldKind::String),
                FieldDescriptor::scalar("value", 2, FieldKind::Int32).repeated(),
            )),
    );

    let shape = classify_in(&schema, "stats.Report", "scores").unwrap();
    assert!(shape.is_map);
    assert_eq!(shape.map_key, Some(MapKey::String));
    assert_eq!(
        shape.map_value,
        Some(DataType::Sequence(Box::new(DataType::Number)))
    );
    assert_eq!(
        shape.target_type.describe(),
        "mapping from string to sequence of number"
    );
    assert!(!shape.is_packed);

    let resolver = TypeResolver::new(&schema).unwrap();
    let classifier = FieldClassifier::new(&resolver);
    let report = schema.message_by_name("stats.Report").unwrap();
    let field = schema.message(report).field("scores").unwrap();
    assert!(classifier.is_map(report, field).unwrap());
}

#[test]
fn test_integer_keys_and_message_values() {
    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Grid")
            .field(FieldDescriptor::named("cells", 1, FieldKind::Message, "CellsEntry").repeated())
            .nested(MessageDecl::map_entry(
                "CellsEntry",
                FieldDescriptor::scalar("key", 1, FieldKind::Uint64),
                FieldDescriptor::named("value", 2, FieldKind::Message, "Point"),
            )),
    );

    let shape = classify_in(&schema, "stats.Grid", "cells").unwrap();
    assert_eq!(shape.map_key, Some(MapKey::Number));
    assert_eq!(shape.target_type.to_string(), "map<number, Point>");
}

#[test]
fn test_float_map_key_is_unsupported() {
    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Weights")
            .field(FieldDescriptor::named("by_ratio", 1, FieldKind::Message, "ByRatioEntry").repeated())
            .nested(MessageDecl::map_entry(
                "ByRatioEntry",
                FieldDescriptor::scalar("key", 1, FieldKind::Float),
                FieldDescriptor::scalar("value", 2, FieldKind::String),
            )),
    );

    let err = classify_in(&schema, "stats.Weights", "by_ratio").unwrap_err();
    assert!(matches!(err, ProtolaneError::UnsupportedFieldType { .. }));
    assert!(err.is_generation_error());
}

#[test]
fn test_entry_without_flag_is_plain_message() {
    // Same shape as a map entry, but not marked as one.
    let mut entry = MessageDecl::map_entry(
        "PairsEntry",
        FieldDescriptor::scalar("key", 1, FieldKind::String),
        FieldDescriptor::scalar("value", 2, FieldKind::String),
    );
    entry.map_entry = false;

    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Pairs")
            .field(FieldDescriptor::named("pairs", 1, FieldKind::Message, "PairsEntry").repeated())
            .nested(entry),
    );

    let shape = classify_in(&schema, "stats.Pairs", "pairs").unwrap();
    assert!(!shape.is_map);
    assert_eq!(shape.target_type.to_string(), "Pairs.PairsEntry[]");
}

#[test]
fn test_flagged_entry_with_extra_field_is_not_a_map() {
    let entry = MessageDecl::map_entry(
        "OddEntry",
        FieldDescriptor::scalar("key", 1, FieldKind::String),
        FieldDescriptor::scalar("value", 2, FieldKind::String),
    )
    .field(FieldDescriptor::scalar("extra", 3, FieldKind::Bool));

    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Odd")
            .field(FieldDescriptor::named("odd", 1, FieldKind::Message, "OddEntry").repeated())
            .nested(entry),
    );

    let shape = classify_in(&schema, "stats.Odd", "odd").unwrap();
    assert!(!shape.is_map);
}

// ============================================================================
// Packing
// ============================================================================

fn packing_message() -> MessageDecl {
    MessageDecl::new("Samples")
        .field(FieldDescriptor::scalar("implicit", 1, FieldKind::Int32).repeated())
        .field(FieldDescriptor::scalar("off", 2, FieldKind::Int32).repeated().packed(false))
        .field(FieldDescriptor::scalar("on", 3, FieldKind::Double).repeated().packed(true))
        .field(FieldDescriptor::scalar("names", 4, FieldKind::String).repeated())
        .field(FieldDescriptor::scalar("single", 5, FieldKind::Int32))
        .field(FieldDescriptor::named("levels", 6, FieldKind::Enum, "Level").repeated())
}

#[test]
fn test_proto3_packs_by_default() {
    let schema = schema_with(Syntax::Proto3, packing_message());
    let packed = |field| classify_in(&schema, "stats.Samples", field).unwrap().is_packed;

    assert!(packed("implicit"));
    assert!(!packed("off"), "explicit packed=false wins");
    assert!(packed("on"));
    assert!(!packed("names"), "strings are never packed");
    assert!(!packed("single"), "singular fields are never packed");
    assert!(packed("levels"), "enums are packable");
}

#[test]
fn test_proto2_packs_only_when_asked() {
    let schema = schema_with(Syntax::Proto2, packing_message());
    let packed = |field| classify_in(&schema, "stats.Samples", field).unwrap().is_packed;

    assert!(!packed("implicit"));
    assert!(!packed("off"));
    assert!(packed("on"));
}

// ============================================================================
// Scalars and named types
// ============================================================================

#[test]
fn test_target_types() {
    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Row")
            .field(FieldDescriptor::scalar("id", 1, FieldKind::Int64))
            .field(FieldDescriptor::scalar("count", 2, FieldKind::Uint32))
            .field(FieldDescriptor::scalar("ok", 3, FieldKind::Bool))
            .field(FieldDescriptor::scalar("blob", 4, FieldKind::Bytes))
            .field(FieldDescriptor::named("level", 5, FieldKind::Enum, "Level"))
            .field(FieldDescriptor::named("points", 6, FieldKind::Message, "Point").repeated())
            .field(FieldDescriptor::scalar("ratios", 7, FieldKind::Float).repeated()),
    );
    let target = |field| {
        classify_in(&schema, "stats.Row", field)
            .unwrap()
            .target_type
            .to_string()
    };

    assert_eq!(target("id"), "string");
    assert_eq!(target("count"), "number");
    assert_eq!(target("ok"), "bool");
    assert_eq!(target("blob"), "bytes");
    assert_eq!(target("level"), "Level");
    assert_eq!(target("points"), "Point[]");
    assert_eq!(target("ratios"), "number[]");
}

#[test]
fn test_group_fields_are_unsupported() {
    let schema = schema_with(
        Syntax::Proto2,
        MessageDecl::new("Legacy").field(FieldDescriptor::named(
            "result",
            1,
            FieldKind::Group,
            "Result",
        )),
    );

    let err = classify_in(&schema, "stats.Legacy", "result").unwrap_err();
    match err {
        ProtolaneError::UnsupportedFieldType { message, field, kind } => {
            assert_eq!(message, "stats.Legacy");
            assert_eq!(field, "result");
            assert_eq!(kind, "group");
        }
        other => panic!("expected unsupported field, got {other:?}"),
    }
}

#[test]
fn test_kind_mismatch_is_invalid_schema() {
    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Wrong").field(FieldDescriptor::named(
            "level",
            1,
            FieldKind::Message,
            "Level",
        )),
    );

    let err = classify_in(&schema, "stats.Wrong", "level").unwrap_err();
    assert!(matches!(err, ProtolaneError::InvalidSchema(_)));
}

#[test]
fn test_classification_is_pure() {
    let schema = schema_with(
        Syntax::Proto3,
        MessageDecl::new("Row").field(FieldDescriptor::named("at", 1, FieldKind::Message, "Point")),
    );
    assert_eq!(
        classify_in(&schema, "stats.Row", "at").unwrap(),
        classify_in(&schema, "stats.Row", "at").unwrap()
    );
}
