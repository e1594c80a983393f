//! Error types for schema formalization and data validation

use std::fmt;

use thiserror::Error;

use crate::path::KeyPath;
use crate::schema::RawSchema;

/// Boxed error type accepted from user-supplied custom validators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The closed set of rules a validation failure can be attributed to.
///
/// The rule name is what the `errors` declarator keys on, so callers can
/// localize or replace the message for any individual rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Value was absent but the schema requires one.
    Required,
    /// Value was an explicit null and the schema does not allow it.
    AllowNull,
    /// Value is not of the schema's declared type.
    Type,
    /// An object carried a key the schema does not declare.
    UnknownKeys,
    /// Array length fell outside the declared range.
    Len,
    /// Array contained two structurally equal elements.
    Unique,
    /// String did not match the declared pattern.
    Match,
    /// String was not one of the declared enum values.
    Enum,
    /// Number fell outside the declared range.
    Range,
    /// A custom validator rejected the value.
    Custom,
}

impl Rule {
    /// The declarator-facing name of this rule.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::AllowNull => "allowNull",
            Rule::Type => "type",
            Rule::UnknownKeys => "unknownKeys",
            Rule::Len => "len",
            Rule::Unique => "unique",
            Rule::Match => "match",
            Rule::Enum => "enum",
            Rule::Range => "range",
            Rule::Custom => "custom",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A malformed schema, reported while formalizing or compiling.
///
/// Never raised during data validation; an author mistake, not a data
/// mistake.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SchemaError {
    /// The schema fragment that could not be normalized, when one exists.
    pub schema: Option<RawSchema>,
    /// Human-readable description of the problem.
    pub message: String,
}

impl SchemaError {
    /// Create a schema error for a fragment.
    pub fn new(schema: impl Into<Option<RawSchema>>, message: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            message: message.into(),
        }
    }
}

/// A single point-of-failure description for a failing validation run.
///
/// Exactly one of these is produced per failing call: validation stops at
/// the first violated rule anywhere in the tree.
#[derive(Debug, Clone, Error)]
#[error("{}", render_at_path(.key_path, .message))]
pub struct ValidationError {
    /// Where in the input the failing value sits.
    pub key_path: KeyPath,
    /// The original, non-formalized schema fragment at the failing node.
    pub schema: RawSchema,
    /// The violated rule.
    pub rule: Rule,
    /// The failure message (built-in default or the schema's override).
    pub message: String,
}

impl ValidationError {
    /// Create a validation error.
    pub fn new(
        key_path: KeyPath,
        schema: RawSchema,
        rule: Rule,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key_path,
            schema,
            rule,
            message: message.into(),
        }
    }

    /// Wrap an error raised by a custom validator, preserving its message.
    pub fn from_error(key_path: KeyPath, schema: RawSchema, rule: Rule, err: BoxError) -> Self {
        Self::new(key_path, schema, rule, err.to_string())
    }
}

fn render_at_path(key_path: &KeyPath, message: &str) -> String {
    if key_path.is_root() {
        message.to_string()
    } else {
        format!("{}: {}", key_path, message)
    }
}

/// Union of the two error families, for one-shot validate helpers that may
/// fail either way.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
