//! Rust spellings of protobuf names.

use convert_case::{Case, Casing};
use proc_macro2::{Ident, Span, TokenStream};
use quote::{format_ident, quote};

use crate::schema::{SchemaSet, TypeHandle};

/// Strict and reserved keywords that need the raw form.
const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized",
    "use", "virtual", "where", "while", "yield",
];

/// An identifier, escaped when it collides with a keyword. `self`,
/// `super`, `crate` and `Self` cannot be raw and get a `_` suffix.
pub fn ident(name: &str) -> Ident {
    match name {
        "self" | "super" | "crate" | "Self" => format_ident!("{}_", name),
        _ if KEYWORDS.contains(&name) => Ident::new_raw(name, Span::call_site()),
        _ => Ident::new(name, Span::call_site()),
    }
}

/// `name` in `case`, still a usable identifier. Names made only of
/// underscores convert to nothing and keep one more underscore than they
/// had; a leading digit gets an underscore in front.
fn converted(name: &str, case: Case) -> String {
    let converted = name.to_case(case);
    if converted.is_empty() {
        format!("_{name}")
    } else if converted.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{converted}")
    } else {
        converted
    }
}

pub fn type_ident(name: &str) -> Ident {
    ident(&converted(name, Case::Pascal))
}

pub fn field_ident(name: &str) -> Ident {
    ident(&converted(name, Case::Snake))
}

pub fn module_ident(name: &str) -> Ident {
    ident(&converted(name, Case::Snake))
}

/// Client method name. `new` and `with_transport` are taken by the
/// constructors.
pub fn method_ident(name: &str) -> Ident {
    let snake = converted(name, Case::Snake);
    match snake.as_str() {
        "new" | "with_transport" => format_ident!("{}_", snake),
        _ => ident(&snake),
    }
}

/// `SayHello` -> `SAY_HELLO_PATH`.
pub fn path_const_ident(method: &str) -> Ident {
    format_ident!("{}_PATH", method.to_case(Case::UpperSnake))
}

/// Variant name for an enum value, without the enum-name prefix protobuf
/// style guides ask for (`COLOR_RED` in `Color` -> `Red`).
pub fn variant_ident(enum_name: &str, value: &str) -> Ident {
    let prefix = format!("{}_", enum_name.to_case(Case::UpperSnake));
    let stripped = value
        .strip_prefix(&prefix)
        .filter(|rest| rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
        .unwrap_or(value);
    type_ident(stripped)
}

/// Output file for a package: `<package>.rs`, `_.rs` for the root package.
pub fn package_file_name(package: &str) -> String {
    if package.is_empty() {
        "_.rs".to_string()
    } else {
        format!("{package}.rs")
    }
}

fn package_modules(package: &str) -> impl Iterator<Item = Ident> + '_ {
    package
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(ident)
}

/// Path segments from a module inside `from_package`, nested `depth`
/// messages deep, to the generated type for `target`.
///
/// Packages are laid out as nested modules (`a.b` -> `a::b`), so crossing
/// packages climbs to the common root first. Package segments keep their
/// spelling (`echo.v1` -> `echo::v1`) to match how the output is mounted.
pub fn type_path(
    schema: &SchemaSet,
    target: TypeHandle,
    from_package: &str,
    depth: usize,
) -> Vec<Ident> {
    let target_package = &schema.file(schema.declaring_file(target)).package;
    let mut segments = Vec::new();

    let climb = if target_package == from_package {
        depth
    } else {
        depth + package_modules(from_package).count()
    };
    segments.extend(std::iter::repeat_with(|| format_ident!("super")).take(climb));
    if target_package != from_package {
        segments.extend(package_modules(target_package));
    }

    let chain = schema.nesting_chain(target);
    if let Some((name, owners)) = chain.split_last() {
        segments.extend(owners.iter().map(|owner| module_ident(owner)));
        segments.push(type_ident(name));
    }
    segments
}

pub fn path_tokens(segments: &[Ident]) -> TokenStream {
    quote!(#(#segments)::*)
}

/// String form, as prost attributes (`enumeration = "..."`) expect.
pub fn path_string(segments: &[Ident]) -> String {
    segments
        .iter()
        .map(Ident::to_string)
        .collect::<Vec<_>>()
        .join("::")
}
