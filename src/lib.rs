//! Declarative validation, coercion and sanitization for JSON-like data
//!
//! A schema is declared once — as JSON, or through the builder API when it
//! needs custom validator or default-value closures — then turned into a
//! reusable validator by a two-stage pipeline:
//!
//! 1. **Formalize**: arbitrary shorthand (bare types, one-element arrays,
//!    plain mappings) normalizes into a sealed canonical tree; malformed
//!    schemas are rejected here, never at validation time.
//! 2. **Compile**: the canonical tree compiles once into a single closure
//!    graph, so repeated validation pays no tree-walking cost.
//!
//! Each validation run either produces a sanitized value (unknown keys
//! handled, strings trimmed, numbers and booleans and dates coerced,
//! defaults filled in) or stops at the first failure with a structured
//! [`ValidationError`] carrying the key path and the violated rule.
//!
//! The same compiled routine runs strictly synchronously or deferred
//! through a host-driven [`TaskQueue`], which is what lets custom
//! validators and defaults do asynchronous work without changing
//! validation semantics.
//!
//! ```
//! use serde_json::json;
//! use strainer::{RawNode, RawSchema, SchemaType};
//!
//! let schema = RawSchema::object([
//!     ("name", RawNode::typed(SchemaType::String).required(true)),
//!     ("age", RawNode::typed(SchemaType::Number).range("0-150")),
//! ]);
//! let validator = strainer::compile(schema).unwrap();
//!
//! let clean = validator.validate(&json!({"name": "Ann", "age": "30"})).unwrap();
//! assert_eq!(clean, json!({"name": "Ann", "age": 30}));
//!
//! let err = validator.validate(&json!({"age": 30})).unwrap_err();
//! assert_eq!(err.key_path.segments(), ["name"]);
//! ```

pub mod compile;
pub mod error;
pub mod exec;
pub mod formalize;
pub mod path;
pub mod schema;
pub mod tools;

pub use compile::{compile, Validator};
pub use error::{BoxError, Error, Rule, SchemaError, ValidationError};
pub use exec::{Exec, TaskQueue};
pub use formalize::{formalize, formalize_value};
pub use path::KeyPath;
pub use schema::{
    CanonicalSchema, CustomReply, CustomValidator, DefaultReply, DefaultValue, MatchSpec,
    RangeSpec, RawNode, RawSchema, Required, SchemaType, SubSchema, UnknownKeys,
};

use serde_json::Value;

/// One-shot helper: compile (formalizing first) and validate in one call.
///
/// For repeated validation against the same schema, [`compile`] once and
/// reuse the [`Validator`].
pub fn validate(data: &Value, schema: impl Into<RawSchema>) -> Result<Value, Error> {
    let validator = compile(schema)?;
    Ok(validator.validate(data)?)
}
