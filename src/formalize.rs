//! Schema formalization
//!
//! Turns any user-authored shorthand into a sealed [`CanonicalSchema`]:
//! expands shortcuts, checks each declarator against the whitelist for its
//! node type, compiles patterns and ranges, resolves implicit `required`
//! bottom-up, and attaches the original fragment for error reporting.
//! Formalizing an already-canonical schema returns it unchanged.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaError;
use crate::schema::{
    value_text, CanonicalNode, CanonicalSchema, DefaultValue, MatchSpec, RawNode, RawSchema,
    Required, SchemaType, SubSchema, TypeBody,
};
use crate::tools;

/// Normalize a schema into its canonical form.
pub fn formalize(schema: impl Into<RawSchema>) -> Result<CanonicalSchema, SchemaError> {
    let canonical = formalize_raw(schema.into())?;
    debug!(
        kind = canonical.kind().map(|k| k.name()).unwrap_or("any"),
        required = canonical.required(),
        "formalized schema"
    );
    Ok(canonical)
}

/// Parse a schema from its JSON form and normalize it.
pub fn formalize_value(value: &Value) -> Result<CanonicalSchema, SchemaError> {
    formalize(RawSchema::from_value(value)?)
}

fn formalize_raw(raw: RawSchema) -> Result<CanonicalSchema, SchemaError> {
    // The pre-expansion schema is what error reports carry.
    let source = raw.clone();
    match raw {
        RawSchema::Canonical(schema) => Ok(schema),
        RawSchema::Type(kind) => formalize_node(RawNode::typed(kind), source),
        RawSchema::Keys(fields) => {
            let node = RawNode {
                kind: Some(SchemaType::Object),
                schema: Some(SubSchema::Fields(fields)),
                ..Default::default()
            };
            formalize_node(node, source)
        }
        RawSchema::Elements(mut items) => {
            if items.len() != 1 {
                return Err(SchemaError::new(
                    source,
                    "Array must have exactly one schema.",
                ));
            }
            let node = RawNode {
                kind: Some(SchemaType::Array),
                schema: items.pop().map(|item| SubSchema::Item(Box::new(item))),
                ..Default::default()
            };
            formalize_node(node, source)
        }
        RawSchema::Node(node) => formalize_node(*node, source),
        RawSchema::Other(Value::Null) => Err(SchemaError::new(source, "No schema provided.")),
        RawSchema::Other(value) => {
            let message = format!("Cannot validate schema of type {}.", value_text(&value));
            Err(SchemaError::new(RawSchema::Other(value), message))
        }
    }
}

fn formalize_node(node: RawNode, source: RawSchema) -> Result<CanonicalSchema, SchemaError> {
    check_whitelist(&node, &source)?;

    if let Some(values) = &node.allowed {
        if values.is_empty() {
            return Err(SchemaError::new(
                source,
                "Validator 'enum' must have at least one item.",
            ));
        }
    }

    let default = normalize_default(&node, &source)?;

    // Children formalize depth-first; a required child promotes a parent
    // whose own `required` is still implicit.
    let mut child_required = false;
    let body = match node.kind {
        None => TypeBody::Any,
        Some(SchemaType::Object) => {
            let mut fields = IndexMap::new();
            if let Some(sub) = node.schema {
                let raw_fields = match sub {
                    SubSchema::Fields(raw_fields) => raw_fields,
                    SubSchema::Item(_) => {
                        return Err(SchemaError::new(source, "Object schemas must be an object."));
                    }
                };
                for (key, child) in raw_fields {
                    let child = formalize_raw(child)?;
                    child_required = child_required || child.required();
                    fields.insert(key, child);
                }
            }
            TypeBody::Object {
                fields,
                unknown_keys: node.unknown_keys,
            }
        }
        Some(SchemaType::Array) => {
            let item = match node.schema {
                None => None,
                Some(SubSchema::Item(item)) => Some(formalize_raw(*item)?),
                // A field map in element position is the plain-mapping
                // shorthand for an Object element schema.
                Some(SubSchema::Fields(fields)) => Some(formalize_raw(RawSchema::Keys(fields))?),
            };
            if let Some(item) = &item {
                child_required = item.required();
            }
            let len = match node.len {
                None => None,
                Some(spec) => Some(
                    spec.to_ranges()
                        .map_err(|err| SchemaError::new(source.clone(), err.to_string()))?,
                ),
            };
            TypeBody::Array {
                item,
                len,
                unique: node.unique.unwrap_or(false),
            }
        }
        Some(SchemaType::String) => {
            let pattern = match node.pattern {
                None => None,
                Some(MatchSpec::Pattern(re)) => Some(re),
                Some(MatchSpec::Source(text)) => Some(compile_pattern(&text, &source)?),
            };
            TypeBody::Str {
                pattern,
                trim: node.trim.unwrap_or(false),
                allowed: node.allowed,
            }
        }
        Some(SchemaType::Number) => {
            let range = match node.range {
                None => None,
                Some(spec) => Some(
                    spec.to_ranges()
                        .map_err(|err| SchemaError::new(source.clone(), err.to_string()))?,
                ),
            };
            TypeBody::Num { range }
        }
        Some(SchemaType::Boolean) => TypeBody::Bool,
        Some(SchemaType::Date) => TypeBody::Date,
    };

    let required = match node.required {
        Required::Yes => true,
        Required::No => false,
        Required::Implicit => child_required,
    };

    Ok(CanonicalSchema::seal(CanonicalNode {
        required,
        allow_null: node.allow_null.unwrap_or(false),
        default,
        errors: node.errors,
        custom: node.custom,
        body,
        source,
    }))
}

/// Reject declarators that are not legal for the node's type.
fn check_whitelist(node: &RawNode, source: &RawSchema) -> Result<(), SchemaError> {
    let unknown = |name: &str| {
        Err(SchemaError::new(
            source.clone(),
            format!("Validator '{}' is unknown in this context.", name),
        ))
    };
    let object = matches!(node.kind, Some(SchemaType::Object));
    let array = matches!(node.kind, Some(SchemaType::Array));
    let string = matches!(node.kind, Some(SchemaType::String));
    let number = matches!(node.kind, Some(SchemaType::Number));

    if node.schema.is_some() && !object && !array {
        return unknown("schema");
    }
    if node.unknown_keys.is_some() && !object {
        return unknown("unknownKeys");
    }
    if node.len.is_some() && !array {
        return unknown("len");
    }
    if node.unique.is_some() && !array {
        return unknown("unique");
    }
    if node.pattern.is_some() && !string {
        return unknown("match");
    }
    if node.trim.is_some() && !string {
        return unknown("trim");
    }
    if node.allowed.is_some() && !string {
        return unknown("enum");
    }
    if node.range.is_some() && !number {
        return unknown("range");
    }
    Ok(())
}

/// Normalize the default declarator; a string default on a Date node must
/// parse, and is stored in its normalized form.
fn normalize_default(
    node: &RawNode,
    source: &RawSchema,
) -> Result<Option<DefaultValue>, SchemaError> {
    match (&node.kind, &node.default) {
        (Some(SchemaType::Date), Some(DefaultValue::Literal(Value::String(text)))) => {
            match tools::parse_iso_date(text) {
                Some(date) => Ok(Some(DefaultValue::Literal(Value::String(
                    tools::format_iso_date(&date),
                )))),
                None => Err(SchemaError::new(
                    source.clone(),
                    "Validator 'default' must be an ISO-8601 date string.",
                )),
            }
        }
        _ => Ok(node.default.clone()),
    }
}

/// Compile a `match` source string, honoring the `/body/flags` form.
fn compile_pattern(text: &str, source: &RawSchema) -> Result<Regex, SchemaError> {
    let expression = sugared_pattern(text).unwrap_or_else(|| text.to_string());
    Regex::new(&expression).map_err(|_| {
        SchemaError::new(
            source.clone(),
            "Validator 'match' must be a valid regular expression.",
        )
    })
}

/// Recognize `/body/flags` and translate the flags to inline modifiers.
fn sugared_pattern(text: &str) -> Option<String> {
    if !text.starts_with('/') || text.len() < 2 {
        return None;
    }
    let close = text.rfind('/')?;
    if close == 0 {
        return None;
    }
    let flags = &text[close + 1..];
    if !flags.chars().all(|c| matches!(c, 'i' | 'g' | 'm')) {
        return None;
    }
    let body = &text[1..close];
    let inline: String = flags.chars().filter(|c| matches!(c, 'i' | 'm')).collect();
    if inline.is_empty() {
        Some(body.to_string())
    } else {
        Some(format!("(?{}){}", inline, body))
    }
}
