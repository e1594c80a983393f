//! Schema data model
//!
//! Two layers, following the shape of the validation pipeline:
//!
//! - [`RawSchema`] is what users author: shorthand forms, a JSON intake
//!   path, and a builder API ([`RawNode`]) for attaching Rust closures as
//!   custom validators and default values.
//! - [`CanonicalSchema`] is what the compiler consumes: sealed, immutable,
//!   reference-counted, with every declarator resolved (patterns compiled,
//!   ranges parsed, `required` a plain bool).

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{BoxError, Rule, SchemaError};
use crate::tools::Ranges;

/// Marker used when rendering a non-serializable schema member for
/// diagnostics.
pub const NOT_SERIALIZABLE: &str = "<function>";

/// The closed set of supported schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Date,
}

impl SchemaType {
    /// The declarator-facing name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            SchemaType::Object => "Object",
            SchemaType::Array => "Array",
            SchemaType::String => "String",
            SchemaType::Number => "Number",
            SchemaType::Boolean => "Boolean",
            SchemaType::Date => "Date",
        }
    }

    /// Resolve a type name; anything outside the six supported names is a
    /// formalization-time error, never a run-time one.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Object" => Some(SchemaType::Object),
            "Array" => Some(SchemaType::Array),
            "String" => Some(SchemaType::String),
            "Number" => Some(SchemaType::Number),
            "Boolean" => Some(SchemaType::Boolean),
            "Date" => Some(SchemaType::Date),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The three-state `required` declarator.
///
/// `Implicit` (the default) resolves during formalization: required if and
/// only if some descendant is required. Canonical nodes never carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Required {
    Yes,
    No,
    #[default]
    Implicit,
}

/// Policy for object keys the schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeys {
    /// Copy undeclared keys into the sanitized output.
    Allow,
    /// Fail with rule `unknownKeys` on the first undeclared key.
    #[default]
    Deny,
    /// Drop undeclared keys from the sanitized output.
    Remove,
}

impl UnknownKeys {
    /// The declarator-facing name of this policy.
    pub fn name(&self) -> &'static str {
        match self {
            UnknownKeys::Allow => "allow",
            UnknownKeys::Deny => "deny",
            UnknownKeys::Remove => "remove",
        }
    }

    /// Resolve a policy name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "allow" => Some(UnknownKeys::Allow),
            "deny" => Some(UnknownKeys::Deny),
            "remove" => Some(UnknownKeys::Remove),
            _ => None,
        }
    }
}

/// A not-yet-parsed `len`/`range` declarator: a number or a range string.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeSpec {
    Number(f64),
    Text(String),
}

impl RangeSpec {
    pub(crate) fn to_ranges(&self) -> Result<Ranges, crate::tools::RangeError> {
        match self {
            RangeSpec::Number(n) => Ranges::from_number(*n),
            RangeSpec::Text(spec) => Ranges::parse(spec),
        }
    }
}

impl From<&str> for RangeSpec {
    fn from(spec: &str) -> Self {
        RangeSpec::Text(spec.to_string())
    }
}

impl From<String> for RangeSpec {
    fn from(spec: String) -> Self {
        RangeSpec::Text(spec)
    }
}

impl From<f64> for RangeSpec {
    fn from(n: f64) -> Self {
        RangeSpec::Number(n)
    }
}

impl From<i32> for RangeSpec {
    fn from(n: i32) -> Self {
        RangeSpec::Number(n as f64)
    }
}

impl From<i64> for RangeSpec {
    fn from(n: i64) -> Self {
        RangeSpec::Number(n as f64)
    }
}

impl From<u64> for RangeSpec {
    fn from(n: u64) -> Self {
        RangeSpec::Number(n as f64)
    }
}

impl From<usize> for RangeSpec {
    fn from(n: usize) -> Self {
        RangeSpec::Number(n as f64)
    }
}

/// A not-yet-compiled `match` declarator: a compiled pattern or a pattern
/// source string. A source of the form `/body/flags` compiles with the
/// given flags (`i`, `m`; a JavaScript-style `g` is accepted and ignored).
#[derive(Debug, Clone)]
pub enum MatchSpec {
    Pattern(Regex),
    Source(String),
}

impl From<&str> for MatchSpec {
    fn from(source: &str) -> Self {
        MatchSpec::Source(source.to_string())
    }
}

impl From<String> for MatchSpec {
    fn from(source: String) -> Self {
        MatchSpec::Source(source)
    }
}

impl From<Regex> for MatchSpec {
    fn from(pattern: Regex) -> Self {
        MatchSpec::Pattern(pattern)
    }
}

/// Reply continuation handed to a deferred default-value function.
pub type DefaultReply = Box<dyn FnOnce(Value)>;

/// The `default` declarator: a literal, a function, or a deferred function
/// that produces its value through a reply continuation.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Call(Arc<dyn Fn() -> Value + Send + Sync>),
    Deferred(Arc<dyn Fn(DefaultReply) + Send + Sync>),
}

impl DefaultValue {
    /// Whether this default can appear in a serialized schema.
    pub fn is_literal(&self) -> bool {
        matches!(self, DefaultValue::Literal(_))
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Call(_) => f.write_str(NOT_SERIALIZABLE),
            DefaultValue::Deferred(_) => f.write_str(NOT_SERIALIZABLE),
        }
    }
}

impl From<Value> for DefaultValue {
    fn from(value: Value) -> Self {
        DefaultValue::Literal(value)
    }
}

/// Reply continuation handed to a deferred custom validator.
///
/// `Ok(Some(v))` replaces the running value, `Ok(None)` keeps it, `Err`
/// fails the run with rule `custom`.
pub type CustomReply = Box<dyn FnOnce(Result<Option<Value>, BoxError>)>;

/// One entry of the `custom` chain.
#[derive(Clone)]
pub enum CustomValidator {
    /// Synchronous transform: value and schema in, optional replacement
    /// out; an error fails the run with rule `custom`.
    Call(Arc<CustomCallFn>),
    /// Deferred transform with the same semantics, delivered through a
    /// reply continuation.
    Deferred(Arc<CustomDeferredFn>),
}

/// Signature of a synchronous custom validator.
pub type CustomCallFn =
    dyn Fn(Option<&Value>, &CanonicalSchema) -> Result<Option<Value>, BoxError> + Send + Sync;

/// Signature of a deferred custom validator.
pub type CustomDeferredFn = dyn Fn(Option<Value>, &CanonicalSchema, CustomReply) + Send + Sync;

impl CustomValidator {
    /// Wrap a synchronous custom validator.
    pub fn call<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &CanonicalSchema) -> Result<Option<Value>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        CustomValidator::Call(Arc::new(f))
    }

    /// Wrap a deferred custom validator.
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(Option<Value>, &CanonicalSchema, CustomReply) + Send + Sync + 'static,
    {
        CustomValidator::Deferred(Arc::new(f))
    }
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(NOT_SERIALIZABLE)
    }
}

/// The `schema` declarator: a field map on Object nodes, an element schema
/// on Array nodes.
#[derive(Debug, Clone)]
pub enum SubSchema {
    Fields(IndexMap<String, RawSchema>),
    Item(Box<RawSchema>),
}

/// The explicit declarator form of a schema node.
///
/// All fields are public; the builder methods mirror the declarator names
/// for fluent construction. Type-specific declarators on the wrong node
/// type are rejected at formalization, not here.
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    pub kind: Option<SchemaType>,
    pub required: Required,
    pub default: Option<DefaultValue>,
    pub allow_null: Option<bool>,
    pub errors: IndexMap<String, String>,
    pub custom: Vec<CustomValidator>,
    pub schema: Option<SubSchema>,
    pub unknown_keys: Option<UnknownKeys>,
    pub len: Option<RangeSpec>,
    pub unique: Option<bool>,
    /// The `match` declarator.
    pub pattern: Option<MatchSpec>,
    pub trim: Option<bool>,
    /// The `enum` declarator.
    pub allowed: Option<Vec<String>>,
    pub range: Option<RangeSpec>,
}

impl RawNode {
    /// A node of the given type with no declarators.
    pub fn typed(kind: SchemaType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// A type-less node: only `required`/`default`/`custom` run.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Set `required` explicitly.
    pub fn required(mut self, yes: bool) -> Self {
        self.required = if yes { Required::Yes } else { Required::No };
        self
    }

    /// Reset `required` to the implicit state.
    pub fn required_implicit(mut self) -> Self {
        self.required = Required::Implicit;
        self
    }

    /// Set a literal default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// Set a default computed at validation time.
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Call(Arc::new(f)));
        self
    }

    /// Set a default resolved through a reply continuation.
    pub fn default_deferred<F>(mut self, f: F) -> Self
    where
        F: Fn(DefaultReply) + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Deferred(Arc::new(f)));
        self
    }

    /// Set `allowNull`.
    pub fn allow_null(mut self, yes: bool) -> Self {
        self.allow_null = Some(yes);
        self
    }

    /// Override the message for one rule.
    pub fn error_message(mut self, rule: Rule, message: impl Into<String>) -> Self {
        self.errors.insert(rule.name().to_string(), message.into());
        self
    }

    /// Append a synchronous custom validator.
    pub fn custom<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>, &CanonicalSchema) -> Result<Option<Value>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.custom.push(CustomValidator::call(f));
        self
    }

    /// Append a deferred custom validator.
    pub fn custom_deferred<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<Value>, &CanonicalSchema, CustomReply) + Send + Sync + 'static,
    {
        self.custom.push(CustomValidator::deferred(f));
        self
    }

    /// Set the full field map of an Object node.
    pub fn fields<K, S, I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<RawSchema>,
    {
        self.schema = Some(SubSchema::Fields(
            fields
                .into_iter()
                .map(|(k, s)| (k.into(), s.into()))
                .collect(),
        ));
        self
    }

    /// Append one field to an Object node.
    pub fn field(mut self, key: impl Into<String>, schema: impl Into<RawSchema>) -> Self {
        let mut fields = match self.schema.take() {
            Some(SubSchema::Fields(fields)) => fields,
            _ => IndexMap::new(),
        };
        fields.insert(key.into(), schema.into());
        self.schema = Some(SubSchema::Fields(fields));
        self
    }

    /// Set the element schema of an Array node.
    pub fn items(mut self, schema: impl Into<RawSchema>) -> Self {
        self.schema = Some(SubSchema::Item(Box::new(schema.into())));
        self
    }

    /// Set the `unknownKeys` policy.
    pub fn unknown_keys(mut self, policy: UnknownKeys) -> Self {
        self.unknown_keys = Some(policy);
        self
    }

    /// Set the `len` range of an Array node.
    pub fn len(mut self, spec: impl Into<RangeSpec>) -> Self {
        self.len = Some(spec.into());
        self
    }

    /// Require array elements to be pairwise structurally unequal.
    pub fn unique(mut self, yes: bool) -> Self {
        self.unique = Some(yes);
        self
    }

    /// Set the `match` pattern of a String node.
    pub fn match_pattern(mut self, spec: impl Into<MatchSpec>) -> Self {
        self.pattern = Some(spec.into());
        self
    }

    /// Strip surrounding whitespace before further String checks.
    pub fn trim(mut self, yes: bool) -> Self {
        self.trim = Some(yes);
        self
    }

    /// Set the `enum` values of a String node.
    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the `range` of a Number node.
    pub fn range(mut self, spec: impl Into<RangeSpec>) -> Self {
        self.range = Some(spec.into());
        self
    }

    fn to_debug_value(&self) -> Value {
        let mut out = Map::new();
        if let Some(kind) = self.kind {
            out.insert("type".to_string(), Value::String(kind.name().to_string()));
        }
        match self.required {
            Required::Yes => {
                out.insert("required".to_string(), Value::Bool(true));
            }
            Required::No => {
                out.insert("required".to_string(), Value::Bool(false));
            }
            Required::Implicit => {}
        }
        match &self.default {
            Some(DefaultValue::Literal(value)) => {
                out.insert("default".to_string(), value.clone());
            }
            Some(_) => {
                out.insert(
                    "default".to_string(),
                    Value::String(NOT_SERIALIZABLE.to_string()),
                );
            }
            None => {}
        }
        if let Some(allow_null) = self.allow_null {
            out.insert("allowNull".to_string(), Value::Bool(allow_null));
        }
        if !self.errors.is_empty() {
            out.insert(
                "errors".to_string(),
                Value::Object(
                    self.errors
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
        }
        if !self.custom.is_empty() {
            out.insert(
                "custom".to_string(),
                Value::Array(
                    self.custom
                        .iter()
                        .map(|_| Value::String(NOT_SERIALIZABLE.to_string()))
                        .collect(),
                ),
            );
        }
        match &self.schema {
            Some(SubSchema::Fields(fields)) => {
                out.insert(
                    "schema".to_string(),
                    Value::Object(
                        fields
                            .iter()
                            .map(|(k, s)| (k.clone(), s.to_debug_value()))
                            .collect(),
                    ),
                );
            }
            Some(SubSchema::Item(item)) => {
                out.insert("schema".to_string(), item.to_debug_value());
            }
            None => {}
        }
        if let Some(policy) = self.unknown_keys {
            out.insert(
                "unknownKeys".to_string(),
                Value::String(policy.name().to_string()),
            );
        }
        if let Some(len) = &self.len {
            out.insert("len".to_string(), range_spec_value(len));
        }
        if let Some(unique) = self.unique {
            out.insert("unique".to_string(), Value::Bool(unique));
        }
        match &self.pattern {
            Some(MatchSpec::Pattern(re)) => {
                out.insert("match".to_string(), Value::String(re.as_str().to_string()));
            }
            Some(MatchSpec::Source(source)) => {
                out.insert("match".to_string(), Value::String(source.clone()));
            }
            None => {}
        }
        if let Some(trim) = self.trim {
            out.insert("trim".to_string(), Value::Bool(trim));
        }
        if let Some(values) = &self.allowed {
            out.insert(
                "enum".to_string(),
                Value::Array(
                    values
                        .iter()
                        .map(|v| Value::String(v.clone()))
                        .collect(),
                ),
            );
        }
        if let Some(range) = &self.range {
            out.insert("range".to_string(), range_spec_value(range));
        }
        Value::Object(out)
    }
}

fn range_spec_value(spec: &RangeSpec) -> Value {
    match spec {
        RangeSpec::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        RangeSpec::Text(text) => Value::String(text.clone()),
    }
}

/// A user-authored schema in any of its shorthand forms.
#[derive(Debug, Clone)]
pub enum RawSchema {
    /// Bare type shorthand: `"String"` stands for `{type: String}`.
    Type(SchemaType),
    /// Sequence shorthand: a one-element sequence stands for an Array node
    /// with that element schema.
    Elements(Vec<RawSchema>),
    /// Plain-mapping shorthand: a mapping with no `type`/`custom` key
    /// stands for an Object node with the mapping as its fields.
    Keys(IndexMap<String, RawSchema>),
    /// The explicit declarator form.
    Node(Box<RawNode>),
    /// An already-formalized schema; formalizing again is a no-op.
    Canonical(CanonicalSchema),
    /// Not a legal schema; kept verbatim so formalization can report it.
    Other(Value),
}

impl RawSchema {
    /// Object-shorthand constructor.
    pub fn object<K, S, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<RawSchema>,
    {
        RawSchema::Keys(
            fields
                .into_iter()
                .map(|(k, s)| (k.into(), s.into()))
                .collect(),
        )
    }

    /// Array-shorthand constructor.
    pub fn array(item: impl Into<RawSchema>) -> Self {
        RawSchema::Elements(vec![item.into()])
    }

    /// Parse a schema from its JSON form.
    ///
    /// Custom validators and computed defaults cannot be expressed in
    /// JSON; attach them through [`RawNode`] instead.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        match value {
            Value::String(name) => match SchemaType::from_name(name) {
                Some(kind) => Ok(RawSchema::Type(kind)),
                None => Ok(RawSchema::Other(value.clone())),
            },
            Value::Array(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(RawSchema::from_value(item)?);
                }
                Ok(RawSchema::Elements(parsed))
            }
            Value::Object(map) => {
                if !map.contains_key("type") && !map.contains_key("custom") {
                    let mut fields = IndexMap::new();
                    for (key, child) in map {
                        fields.insert(key.clone(), RawSchema::from_value(child)?);
                    }
                    return Ok(RawSchema::Keys(fields));
                }
                parse_node(value, map).map(|node| RawSchema::Node(Box::new(node)))
            }
            _ => Ok(RawSchema::Other(value.clone())),
        }
    }

    /// Render the schema for diagnostics. Never fails: closures and other
    /// non-serializable members render as explicit markers instead of
    /// being dropped.
    pub fn to_debug_value(&self) -> Value {
        match self {
            RawSchema::Type(kind) => Value::String(kind.name().to_string()),
            RawSchema::Elements(items) => {
                Value::Array(items.iter().map(RawSchema::to_debug_value).collect())
            }
            RawSchema::Keys(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, s)| (k.clone(), s.to_debug_value()))
                    .collect(),
            ),
            RawSchema::Node(node) => node.to_debug_value(),
            RawSchema::Canonical(schema) => schema.to_debug_value(),
            RawSchema::Other(value) => value.clone(),
        }
    }
}

impl From<SchemaType> for RawSchema {
    fn from(kind: SchemaType) -> Self {
        RawSchema::Type(kind)
    }
}

impl From<RawNode> for RawSchema {
    fn from(node: RawNode) -> Self {
        RawSchema::Node(Box::new(node))
    }
}

impl From<CanonicalSchema> for RawSchema {
    fn from(schema: CanonicalSchema) -> Self {
        RawSchema::Canonical(schema)
    }
}

impl<'de> Deserialize<'de> for RawSchema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        RawSchema::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_node(whole: &Value, map: &Map<String, Value>) -> Result<RawNode, SchemaError> {
    let fragment = || RawSchema::Other(whole.clone());
    let invalid = |message: String| SchemaError::new(RawSchema::Other(whole.clone()), message);

    let kind = match map.get("type") {
        None => None,
        Some(Value::String(name)) => match SchemaType::from_name(name) {
            Some(kind) => Some(kind),
            None => {
                return Err(invalid(format!("Cannot validate schema of type {}.", name)));
            }
        },
        Some(other) => {
            return Err(invalid(format!(
                "Cannot validate schema of type {}.",
                value_text(other)
            )));
        }
    };

    let mut node = RawNode {
        kind,
        ..Default::default()
    };

    for (key, value) in map {
        match key.as_str() {
            "type" => {}
            "required" => match value {
                Value::Bool(yes) => {
                    node.required = if *yes { Required::Yes } else { Required::No };
                }
                Value::String(text) if text == "implicit" => {
                    node.required = Required::Implicit;
                }
                Value::String(_) => {
                    return Err(invalid(
                        "Validator 'required' must be a Boolean or String of value 'implicit'."
                            .to_string(),
                    ));
                }
                _ => {
                    return Err(invalid(
                        "Validator 'required' must be of type(s) Boolean, String.".to_string(),
                    ));
                }
            },
            "default" => {
                node.default = Some(DefaultValue::Literal(value.clone()));
            }
            "allowNull" => match value {
                Value::Bool(yes) => node.allow_null = Some(*yes),
                _ => {
                    return Err(invalid(
                        "Validator 'allowNull' must be of type(s) Boolean.".to_string(),
                    ));
                }
            },
            "errors" => match value {
                Value::Object(overrides) => {
                    let mut errors = IndexMap::new();
                    for (rule, message) in overrides {
                        match message {
                            Value::String(text) => {
                                errors.insert(rule.clone(), text.clone());
                            }
                            _ => {
                                return Err(invalid(
                                    "Validator 'errors' must be an object of strings.".to_string(),
                                ));
                            }
                        }
                    }
                    node.errors = errors;
                }
                _ => {
                    return Err(invalid(
                        "Validator 'errors' must be of type(s) Object.".to_string(),
                    ));
                }
            },
            "custom" => {
                return Err(invalid(
                    "Validator 'custom' must be a function or array of functions.".to_string(),
                ));
            }
            "schema" => match kind {
                Some(SchemaType::Object) => match value {
                    Value::Object(children) => {
                        let mut fields = IndexMap::new();
                        for (field, child) in children {
                            fields.insert(field.clone(), RawSchema::from_value(child)?);
                        }
                        node.schema = Some(SubSchema::Fields(fields));
                    }
                    _ => {
                        return Err(SchemaError::new(
                            fragment(),
                            "Object schemas must be an object.",
                        ));
                    }
                },
                Some(SchemaType::Array) => {
                    node.schema = Some(SubSchema::Item(Box::new(RawSchema::from_value(value)?)));
                }
                _ => {
                    return Err(invalid(
                        "Validator 'schema' is unknown in this context.".to_string(),
                    ));
                }
            },
            "unknownKeys" => match value {
                Value::String(name) => match UnknownKeys::from_name(name) {
                    Some(policy) => node.unknown_keys = Some(policy),
                    None => {
                        return Err(invalid(
                            "Validator 'unknownKeys' must have value 'allow', 'deny' or 'remove'."
                                .to_string(),
                        ));
                    }
                },
                _ => {
                    return Err(invalid(
                        "Validator 'unknownKeys' must be of type(s) String.".to_string(),
                    ));
                }
            },
            "len" => {
                node.len = Some(parse_range_spec(value).ok_or_else(|| {
                    invalid("Validator 'len' must be of type(s) String, Number.".to_string())
                })?);
            }
            "unique" => match value {
                Value::Bool(yes) => node.unique = Some(*yes),
                _ => {
                    return Err(invalid(
                        "Validator 'unique' must be of type(s) Boolean.".to_string(),
                    ));
                }
            },
            "match" => match value {
                Value::String(source) => {
                    node.pattern = Some(MatchSpec::Source(source.clone()));
                }
                _ => {
                    return Err(invalid(
                        "Validator 'match' must be of type(s) RegExp, String.".to_string(),
                    ));
                }
            },
            "trim" => match value {
                Value::Bool(yes) => node.trim = Some(*yes),
                _ => {
                    return Err(invalid(
                        "Validator 'trim' must be of type(s) Boolean.".to_string(),
                    ));
                }
            },
            "enum" => match value {
                Value::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(text) => values.push(text.clone()),
                            _ => {
                                return Err(invalid(
                                    "Validator 'enum' must be an array of strings.".to_string(),
                                ));
                            }
                        }
                    }
                    node.allowed = Some(values);
                }
                _ => {
                    return Err(invalid(
                        "Validator 'enum' must be of type(s) Array.".to_string(),
                    ));
                }
            },
            "range" => {
                node.range = Some(parse_range_spec(value).ok_or_else(|| {
                    invalid("Validator 'range' must be of type(s) String, Number.".to_string())
                })?);
            }
            other => {
                return Err(invalid(format!(
                    "Validator '{}' is unknown in this context.",
                    other
                )));
            }
        }
    }

    Ok(node)
}

fn parse_range_spec(value: &Value) -> Option<RangeSpec> {
    match value {
        Value::Number(n) => n.as_f64().map(RangeSpec::Number),
        Value::String(text) => Some(RangeSpec::Text(text.clone())),
        _ => None,
    }
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The sealed, canonical form of a schema node.
///
/// Produced once by the formalizer, compiled once, then reused for the
/// process lifetime. Cheap to clone (`Arc`-shared) and immutable: no
/// validator can mutate it, and concurrent validation runs share it
/// without locking.
#[derive(Debug, Clone)]
pub struct CanonicalSchema {
    node: Arc<CanonicalNode>,
}

#[derive(Debug)]
pub(crate) struct CanonicalNode {
    pub(crate) required: bool,
    pub(crate) allow_null: bool,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) errors: IndexMap<String, String>,
    pub(crate) custom: Vec<CustomValidator>,
    pub(crate) body: TypeBody,
    /// The original, non-formalized schema, retained for error reporting.
    pub(crate) source: RawSchema,
}

/// Type-specific state of a canonical node, with every declarator already
/// compiled.
#[derive(Debug)]
pub(crate) enum TypeBody {
    /// Type-less pass-through node.
    Any,
    Object {
        fields: IndexMap<String, CanonicalSchema>,
        unknown_keys: Option<UnknownKeys>,
    },
    Array {
        item: Option<CanonicalSchema>,
        len: Option<Ranges>,
        unique: bool,
    },
    Str {
        pattern: Option<Regex>,
        trim: bool,
        allowed: Option<Vec<String>>,
    },
    Num {
        range: Option<Ranges>,
    },
    Bool,
    Date,
}

impl CanonicalSchema {
    pub(crate) fn seal(node: CanonicalNode) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    /// A pass-through node accepting any present value; what an Array with
    /// no element schema validates its elements against.
    pub(crate) fn passthrough() -> Self {
        Self::seal(CanonicalNode {
            required: false,
            allow_null: false,
            default: None,
            errors: IndexMap::new(),
            custom: Vec::new(),
            body: TypeBody::Any,
            source: RawSchema::Node(Box::new(RawNode::default())),
        })
    }

    /// The node's type, or `None` for a pass-through node.
    pub fn kind(&self) -> Option<SchemaType> {
        match &self.node.body {
            TypeBody::Any => None,
            TypeBody::Object { .. } => Some(SchemaType::Object),
            TypeBody::Array { .. } => Some(SchemaType::Array),
            TypeBody::Str { .. } => Some(SchemaType::String),
            TypeBody::Num { .. } => Some(SchemaType::Number),
            TypeBody::Bool => Some(SchemaType::Boolean),
            TypeBody::Date => Some(SchemaType::Date),
        }
    }

    /// Resolved `required`: never "implicit" after formalization.
    pub fn required(&self) -> bool {
        self.node.required
    }

    /// Whether an explicit null is accepted in place of a value.
    pub fn allow_null(&self) -> bool {
        self.node.allow_null
    }

    /// The default, when one is declared.
    pub fn default(&self) -> Option<&DefaultValue> {
        self.node.default.as_ref()
    }

    /// The custom chain, in declared order.
    pub fn custom(&self) -> &[CustomValidator] {
        &self.node.custom
    }

    /// Per-rule message overrides.
    pub fn errors(&self) -> &IndexMap<String, String> {
        &self.node.errors
    }

    /// The original, non-formalized schema this node was built from.
    pub fn source(&self) -> &RawSchema {
        &self.node.source
    }

    /// The declared fields of an Object node.
    pub fn fields(&self) -> Option<&IndexMap<String, CanonicalSchema>> {
        match &self.node.body {
            TypeBody::Object { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// The element schema of an Array node.
    pub fn item(&self) -> Option<&CanonicalSchema> {
        match &self.node.body {
            TypeBody::Array { item, .. } => item.as_ref(),
            _ => None,
        }
    }

    /// Whether two handles point at the same sealed node.
    pub fn same(&self, other: &CanonicalSchema) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    pub(crate) fn body(&self) -> &TypeBody {
        &self.node.body
    }

    pub(crate) fn message_for(&self, rule: Rule, fallback: &str) -> String {
        self.node
            .errors
            .get(rule.name())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Serialize to the plain structural form.
    ///
    /// Patterns render as their source text and ranges as their source
    /// spec; re-formalizing the result reconstructs an equivalent schema.
    /// Fails deliberately when any custom validator or computed default is
    /// present, rather than silently dropping behavior.
    pub fn to_value(&self) -> Result<Value, SchemaError> {
        let node = &self.node;
        if !node.custom.is_empty() {
            return Err(self.not_serializable());
        }
        let mut out = Map::new();
        if let Some(kind) = self.kind() {
            out.insert("type".to_string(), Value::String(kind.name().to_string()));
        }
        out.insert("required".to_string(), Value::Bool(node.required));
        if node.allow_null {
            out.insert("allowNull".to_string(), Value::Bool(true));
        }
        match &node.default {
            None => {}
            Some(DefaultValue::Literal(value)) => {
                out.insert("default".to_string(), value.clone());
            }
            Some(_) => return Err(self.not_serializable()),
        }
        if !node.errors.is_empty() {
            out.insert(
                "errors".to_string(),
                Value::Object(
                    node.errors
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
        }
        match &node.body {
            TypeBody::Any | TypeBody::Bool | TypeBody::Date => {}
            TypeBody::Object {
                fields,
                unknown_keys,
            } => {
                let mut children = Map::new();
                for (field, child) in fields {
                    children.insert(field.clone(), child.to_value()?);
                }
                out.insert("schema".to_string(), Value::Object(children));
                if let Some(policy) = unknown_keys {
                    out.insert(
                        "unknownKeys".to_string(),
                        Value::String(policy.name().to_string()),
                    );
                }
            }
            TypeBody::Array { item, len, unique } => {
                if let Some(item) = item {
                    out.insert("schema".to_string(), item.to_value()?);
                }
                if let Some(len) = len {
                    out.insert("len".to_string(), Value::String(len.source().to_string()));
                }
                if *unique {
                    out.insert("unique".to_string(), Value::Bool(true));
                }
            }
            TypeBody::Str {
                pattern,
                trim,
                allowed,
            } => {
                if let Some(re) = pattern {
                    out.insert("match".to_string(), Value::String(re.as_str().to_string()));
                }
                if *trim {
                    out.insert("trim".to_string(), Value::Bool(true));
                }
                if let Some(values) = allowed {
                    out.insert(
                        "enum".to_string(),
                        Value::Array(
                            values
                                .iter()
                                .map(|v| Value::String(v.clone()))
                                .collect(),
                        ),
                    );
                }
            }
            TypeBody::Num { range } => {
                if let Some(range) = range {
                    out.insert(
                        "range".to_string(),
                        Value::String(range.source().to_string()),
                    );
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Diagnostic rendering; like [`to_value`](Self::to_value) but never
    /// fails, tagging non-serializable members with explicit markers.
    pub fn to_debug_value(&self) -> Value {
        match self.to_value() {
            Ok(value) => value,
            Err(_) => self.node.source.to_debug_value(),
        }
    }

    fn not_serializable(&self) -> SchemaError {
        SchemaError::new(
            self.node.source.clone(),
            "Validators with functions cannot be transformed into JSON.",
        )
    }
}

impl Serialize for CanonicalSchema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let value = self.to_value().map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}
