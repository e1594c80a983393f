//! Schema compilation
//!
//! Translates a canonical schema into one executable validation routine
//! ahead of time: each node compiles to a closure, child closures are
//! spliced into their parent, and the result is a single top-level routine
//! with no per-call tree traversal. Non-serializable schema members
//! (custom validators, computed defaults) ride along as `Arc` captures
//! inside the closure graph; literal state (ranges, enums, patterns) is
//! embedded directly.
//!
//! Every compiled routine follows the execution protocol in [`crate::exec`]:
//! continuations carry a result-or-error and thread the sync/deferred
//! marker through unchanged, so the same compiled routine serves both
//! modes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Rule, SchemaError, ValidationError};
use crate::exec::{Exec, TaskQueue};
use crate::formalize::formalize;
use crate::path::KeyPath;
use crate::schema::{
    CanonicalSchema, CustomValidator, DefaultValue, RawSchema, TypeBody, UnknownKeys,
};
use crate::tools;
use crate::tools::Ranges;

/// Completion callback of a compiled routine. `Ok(None)` means the value
/// is absent from the sanitized output (optional and not supplied).
pub type Reply = Box<dyn FnOnce(Result<Option<Value>, ValidationError>)>;

/// One compiled node: the closure validating a single value against one
/// schema node, children already spliced in.
#[derive(Clone)]
struct Step(Arc<dyn Fn(Option<Value>, KeyPath, Exec, Reply) + Send + Sync>);

impl Step {
    fn new(f: impl Fn(Option<Value>, KeyPath, Exec, Reply) + Send + Sync + 'static) -> Self {
        Step(Arc::new(f))
    }

    fn run(&self, value: Option<Value>, path: KeyPath, exec: Exec, reply: Reply) {
        (self.0)(value, path, exec, reply)
    }
}

/// Completion callback of a type body; bodies only see present, non-null
/// values and always produce one.
type BodyReply = Box<dyn FnOnce(Result<Value, ValidationError>)>;

#[derive(Clone)]
struct TypeStep(Arc<dyn Fn(Value, KeyPath, Exec, BodyReply) + Send + Sync>);

impl TypeStep {
    fn new(f: impl Fn(Value, KeyPath, Exec, BodyReply) + Send + Sync + 'static) -> Self {
        TypeStep(Arc::new(f))
    }

    fn run(&self, value: Value, path: KeyPath, exec: Exec, reply: BodyReply) {
        (self.0)(value, path, exec, reply)
    }
}

/// A compiled, reusable validator.
///
/// Compilation happens once; the validator is then shared freely — it holds
/// only read-only state, so concurrent runs with different data are
/// independent and need no locking.
pub struct Validator {
    root: Step,
    schema: CanonicalSchema,
}

/// Compile a schema into a [`Validator`], formalizing first when the input
/// is not already canonical.
pub fn compile(schema: impl Into<RawSchema>) -> Result<Validator, SchemaError> {
    let canonical = formalize(schema)?;
    let root = compile_node(&canonical);
    debug!(
        kind = canonical.kind().map(|k| k.name()).unwrap_or("any"),
        "compiled validator"
    );
    Ok(Validator {
        root,
        schema: canonical,
    })
}

impl Validator {
    /// The canonical schema this validator was compiled from.
    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    /// Validate synchronously: every continuation runs on the calling
    /// stack.
    ///
    /// A deferred hook that does not invoke its reply before returning
    /// cannot complete a synchronous run; that is reported as a
    /// `custom`-rule error and any late reply is ignored.
    pub fn validate(&self, data: &Value) -> Result<Value, ValidationError> {
        self.run_sync(Some(data), KeyPath::root())
            .map(|out| out.unwrap_or(Value::Null))
    }

    /// Validate synchronously, exposing absent input (defaults apply) and
    /// absent output (optional value not supplied).
    pub fn validate_option(&self, data: Option<&Value>) -> Result<Option<Value>, ValidationError> {
        self.run_sync(data, KeyPath::root())
    }

    /// Validate synchronously with a caller-supplied root path, so errors
    /// report e.g. `body.name` when validating a request body.
    pub fn validate_at(&self, data: &Value, path: KeyPath) -> Result<Value, ValidationError> {
        self.run_sync(Some(data), path)
            .map(|out| out.unwrap_or(Value::Null))
    }

    /// Schedule a validation run on the host's task queue. Continuations
    /// run one per queue turn; `on_done` fires with the outcome once the
    /// run completes.
    pub fn validate_deferred<F>(&self, data: Option<&Value>, queue: &Rc<TaskQueue>, on_done: F)
    where
        F: FnOnce(Result<Option<Value>, ValidationError>) + 'static,
    {
        self.validate_deferred_at(data, KeyPath::root(), queue, on_done);
    }

    /// [`validate_deferred`](Self::validate_deferred) with a
    /// caller-supplied root path.
    pub fn validate_deferred_at<F>(
        &self,
        data: Option<&Value>,
        path: KeyPath,
        queue: &Rc<TaskQueue>,
        on_done: F,
    ) where
        F: FnOnce(Result<Option<Value>, ValidationError>) + 'static,
    {
        let root = self.root.clone();
        let data = data.cloned();
        let exec = Exec::Deferred(Rc::clone(queue));
        let run_exec = exec.clone();
        exec.step(move || root.run(data, path, run_exec, Box::new(on_done)));
    }

    /// Validate through a private task queue, draining it to completion.
    /// Semantically equivalent to [`validate`](Self::validate); only the
    /// scheduling differs.
    pub fn validate_queued(&self, data: &Value) -> Result<Value, ValidationError> {
        let queue = Rc::new(TaskQueue::new());
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        self.validate_deferred(Some(data), &queue, move |res| {
            *slot.borrow_mut() = Some(res);
        });
        queue.drain();
        let outcome = result.borrow_mut().take();
        match outcome {
            Some(res) => res.map(|out| out.unwrap_or(Value::Null)),
            None => Err(self.stalled(KeyPath::root())),
        }
    }

    fn run_sync(
        &self,
        data: Option<&Value>,
        path: KeyPath,
    ) -> Result<Option<Value>, ValidationError> {
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        self.root.run(
            data.cloned(),
            path.clone(),
            Exec::Sync,
            Box::new(move |res| {
                *slot.borrow_mut() = Some(res);
            }),
        );
        let outcome = result.borrow_mut().take();
        match outcome {
            Some(res) => res,
            None => Err(self.stalled(path)),
        }
    }

    fn stalled(&self, path: KeyPath) -> ValidationError {
        ValidationError::new(
            path,
            self.schema.source().clone(),
            Rule::Custom,
            "Validator did not complete synchronously.",
        )
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("schema", &self.schema)
            .finish()
    }
}

fn fail(node: &CanonicalSchema, path: &KeyPath, rule: Rule, fallback: &str) -> ValidationError {
    ValidationError::new(
        path.clone(),
        node.source().clone(),
        rule,
        node.message_for(rule, fallback),
    )
}

/// Compile one schema node: the missing/null prelude wrapping the
/// type-specific body, funneling every success through the custom chain.
fn compile_node(schema: &CanonicalSchema) -> Step {
    let body = compile_body(schema);
    let node = schema.clone();
    Step::new(move |value, path, exec, reply| match value {
        None => resolve_missing(&node, path, exec, reply),
        Some(Value::Null) => {
            if node.allow_null() {
                complete(&node, Some(Value::Null), path, exec, reply);
            } else {
                reply(Err(fail(&node, &path, Rule::AllowNull, "Data cannot be null.")));
            }
        }
        Some(value) => match &body {
            None => complete(&node, Some(value), path, exec, reply),
            Some(body) => {
                let after = node.clone();
                let after_path = path.clone();
                let after_exec = exec.clone();
                body.run(
                    value,
                    path,
                    exec,
                    Box::new(move |res| match res {
                        Err(err) => reply(Err(err)),
                        Ok(valid) => complete(&after, Some(valid), after_path, after_exec, reply),
                    }),
                );
            }
        },
    })
}

/// Resolve an absent value: default, required failure, or empty success.
fn resolve_missing(node: &CanonicalSchema, path: KeyPath, exec: Exec, reply: Reply) {
    match node.default() {
        Some(DefaultValue::Literal(value)) => {
            let value = value.clone();
            complete(node, Some(value), path, exec, reply);
        }
        Some(DefaultValue::Call(f)) => {
            let value = f();
            complete(node, Some(value), path, exec, reply);
        }
        Some(DefaultValue::Deferred(f)) => {
            let after = node.clone();
            f(Box::new(move |value| {
                complete(&after, Some(value), path, exec, reply);
            }));
        }
        None => {
            if node.required() {
                reply(Err(fail(node, &path, Rule::Required, "Data is required.")));
            } else {
                complete(node, None, path, exec, reply);
            }
        }
    }
}

/// Run the custom chain, then deliver the final value.
fn complete(node: &CanonicalSchema, value: Option<Value>, path: KeyPath, exec: Exec, reply: Reply) {
    if node.custom().is_empty() {
        return reply(Ok(value));
    }
    let node = node.clone();
    let step_exec = exec.clone();
    step_exec.step(move || run_custom(node, 0, value, path, exec, reply));
}

fn run_custom(
    node: CanonicalSchema,
    idx: usize,
    value: Option<Value>,
    path: KeyPath,
    exec: Exec,
    reply: Reply,
) {
    if idx >= node.custom().len() {
        return reply(Ok(value));
    }
    let entry = node.custom()[idx].clone();
    match entry {
        CustomValidator::Call(f) => match f(value.as_ref(), &node) {
            Ok(replacement) => {
                let next = replacement.or(value);
                let step_exec = exec.clone();
                step_exec.step(move || run_custom(node, idx + 1, next, path, exec, reply));
            }
            Err(err) => reply(Err(ValidationError::from_error(
                path,
                node.source().clone(),
                Rule::Custom,
                err,
            ))),
        },
        CustomValidator::Deferred(f) => {
            let passed = value.clone();
            let after = node.clone();
            let after_exec = exec.clone();
            f(
                passed,
                &node,
                Box::new(move |res| match res {
                    Ok(replacement) => {
                        let next = replacement.or(value);
                        let step_exec = after_exec.clone();
                        step_exec
                            .step(move || run_custom(after, idx + 1, next, path, after_exec, reply));
                    }
                    Err(err) => reply(Err(ValidationError::from_error(
                        path,
                        after.source().clone(),
                        Rule::Custom,
                        err,
                    ))),
                }),
            );
        }
    }
}

/// Compile the type-specific body, or `None` for a pass-through node.
fn compile_body(schema: &CanonicalSchema) -> Option<TypeStep> {
    match schema.body() {
        TypeBody::Any => None,
        TypeBody::Object {
            fields,
            unknown_keys,
        } => Some(compile_object(schema, fields, unknown_keys.unwrap_or_default())),
        TypeBody::Array { item, len, unique } => {
            Some(compile_array(schema, item.as_ref(), len.clone(), *unique))
        }
        TypeBody::Str {
            pattern,
            trim,
            allowed,
        } => {
            let node = schema.clone();
            let pattern = pattern.clone();
            let trim = *trim;
            let allowed = allowed.clone();
            Some(TypeStep::new(move |value, path, _exec, reply| {
                let text = match value {
                    Value::String(text) => text,
                    _ => {
                        return reply(Err(fail(&node, &path, Rule::Type, "Is not of type String.")));
                    }
                };
                let text = if trim { text.trim().to_string() } else { text };
                if let Some(re) = &pattern {
                    if !re.is_match(&text) {
                        let message = format!("Does not match expression {}.", re.as_str());
                        return reply(Err(fail(&node, &path, Rule::Match, &message)));
                    }
                }
                if let Some(values) = &allowed {
                    if !values.iter().any(|v| v == &text) {
                        let message = enum_message(values);
                        return reply(Err(fail(&node, &path, Rule::Enum, &message)));
                    }
                }
                reply(Ok(Value::String(text)))
            }))
        }
        TypeBody::Num { range } => {
            let node = schema.clone();
            let range = range.clone();
            Some(TypeStep::new(move |value, path, _exec, reply| {
                let parsed = match &value {
                    Value::Number(n) => n.as_f64().map(|f| (value.clone(), f)),
                    Value::String(text) => match text.trim().parse::<f64>() {
                        Ok(f) if f.is_finite() => Some((number_value(f), f)),
                        _ => None,
                    },
                    _ => None,
                };
                let (out, numeric) = match parsed {
                    Some(pair) => pair,
                    None => {
                        return reply(Err(fail(&node, &path, Rule::Type, "Is not of type Number.")));
                    }
                };
                if let Some(ranges) = &range {
                    if !ranges.contains(numeric) {
                        let message = format!("Not within range of {}.", ranges.source());
                        return reply(Err(fail(&node, &path, Rule::Range, &message)));
                    }
                }
                reply(Ok(out))
            }))
        }
        TypeBody::Bool => {
            let node = schema.clone();
            Some(TypeStep::new(move |value, path, _exec, reply| {
                // Falsy values pass through without coercion.
                if is_falsy(&value) {
                    return reply(Ok(value));
                }
                match &value {
                    Value::String(text) if text.eq_ignore_ascii_case("true") => {
                        reply(Ok(Value::Bool(true)))
                    }
                    Value::String(text) if text.eq_ignore_ascii_case("false") => {
                        reply(Ok(Value::Bool(false)))
                    }
                    Value::Bool(_) => reply(Ok(value)),
                    _ => reply(Err(fail(&node, &path, Rule::Type, "Is not of type Boolean."))),
                }
            }))
        }
        TypeBody::Date => {
            let node = schema.clone();
            Some(TypeStep::new(move |value, path, _exec, reply| match &value {
                Value::String(text) => match tools::parse_iso_date(text) {
                    Some(date) => reply(Ok(Value::String(tools::format_iso_date(&date)))),
                    None => reply(Err(fail(
                        &node,
                        &path,
                        Rule::Type,
                        "Date string must be in ISO-8601 format.",
                    ))),
                },
                _ => reply(Err(fail(&node, &path, Rule::Type, "Is not of type Date."))),
            }))
        }
    }
}

fn compile_object(
    schema: &CanonicalSchema,
    fields: &indexmap::IndexMap<String, CanonicalSchema>,
    unknown_keys: UnknownKeys,
) -> TypeStep {
    let children: Arc<Vec<(String, Step)>> = Arc::new(
        fields
            .iter()
            .map(|(key, child)| (key.clone(), compile_node(child)))
            .collect(),
    );
    let node = schema.clone();
    TypeStep::new(move |value, path, exec, reply| {
        let input = match value {
            Value::Object(map) => map,
            _ => {
                return reply(Err(fail(&node, &path, Rule::Type, "Is not of type Object.")));
            }
        };
        let mut acc = Map::new();
        match unknown_keys {
            UnknownKeys::Deny => {
                for key in input.keys() {
                    if !children.iter().any(|(declared, _)| declared == key) {
                        return reply(Err(fail(
                            &node,
                            &path.child(key),
                            Rule::UnknownKeys,
                            "Unknown key.",
                        )));
                    }
                }
            }
            UnknownKeys::Allow => {
                for (key, value) in &input {
                    if !children.iter().any(|(declared, _)| declared == key) {
                        acc.insert(key.clone(), value.clone());
                    }
                }
            }
            UnknownKeys::Remove => {}
        }
        let run_children = Arc::clone(&children);
        let step_exec = exec.clone();
        step_exec.step(move || run_fields(run_children, 0, input, acc, path, exec, reply));
    })
}

/// Validate declared fields in schema declaration order, merging each
/// success into the accumulator; the accumulator — not the input — is what
/// propagates onward.
fn run_fields(
    children: Arc<Vec<(String, Step)>>,
    idx: usize,
    input: Map<String, Value>,
    acc: Map<String, Value>,
    path: KeyPath,
    exec: Exec,
    reply: BodyReply,
) {
    if idx >= children.len() {
        return reply(Ok(Value::Object(acc)));
    }
    let (key, step) = children[idx].clone();
    let child_value = input.get(&key).cloned();
    let child_path = path.child(&key);
    let next_exec = exec.clone();
    step.run(
        child_value,
        child_path,
        exec,
        Box::new(move |res| match res {
            Err(err) => reply(Err(err)),
            Ok(valid) => {
                let mut acc = acc;
                if let Some(valid) = valid {
                    acc.insert(key, valid);
                }
                let step_exec = next_exec.clone();
                step_exec
                    .step(move || run_fields(children, idx + 1, input, acc, path, next_exec, reply));
            }
        }),
    );
}

fn compile_array(
    schema: &CanonicalSchema,
    item: Option<&CanonicalSchema>,
    len: Option<Ranges>,
    unique: bool,
) -> TypeStep {
    let element = match item {
        Some(item) => compile_node(item),
        None => compile_node(&CanonicalSchema::passthrough()),
    };
    let node = schema.clone();
    TypeStep::new(move |value, path, exec, reply| {
        let elements = match value {
            Value::Array(elements) => elements,
            _ => {
                return reply(Err(fail(&node, &path, Rule::Type, "Is not of type Array.")));
            }
        };
        let element = element.clone();
        let node = node.clone();
        let len = len.clone();
        let acc = Vec::with_capacity(elements.len());
        let step_exec = exec.clone();
        step_exec.step(move || {
            run_elements(element, node, len, unique, elements, 0, acc, path, exec, reply)
        });
    })
}

/// Validate elements in index order into the accumulator, then check `len`
/// and `unique` against the accumulator.
#[allow(clippy::too_many_arguments)]
fn run_elements(
    element: Step,
    node: CanonicalSchema,
    len: Option<Ranges>,
    unique: bool,
    elements: Vec<Value>,
    idx: usize,
    acc: Vec<Value>,
    path: KeyPath,
    exec: Exec,
    reply: BodyReply,
) {
    if idx >= elements.len() {
        if let Some(ranges) = &len {
            if !ranges.contains(acc.len() as f64) {
                let message = format!(
                    "Array length is not within range of '{}'.",
                    ranges.source()
                );
                return reply(Err(fail(&node, &path, Rule::Len, &message)));
            }
        }
        if unique && !tools::unique(&acc) {
            return reply(Err(fail(&node, &path, Rule::Unique, "Array is not unique.")));
        }
        return reply(Ok(Value::Array(acc)));
    }
    let value = elements[idx].clone();
    let child_path = path.index(idx);
    let runner = element.clone();
    let next_exec = exec.clone();
    runner.run(
        Some(value),
        child_path,
        exec,
        Box::new(move |res| match res {
            Err(err) => reply(Err(err)),
            Ok(valid) => {
                let mut acc = acc;
                acc.push(valid.unwrap_or(Value::Null));
                let step_exec = next_exec.clone();
                step_exec.step(move || {
                    run_elements(
                        element, node, len, unique, elements, idx + 1, acc, path, next_exec, reply,
                    )
                });
            }
        }),
    );
}

/// Emit the integral form when the parse is whole, so `"30"` coerces to
/// `30` rather than `30.0`.
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::Number(serde_json::Number::from(f as i64))
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Bool(false) => true,
        Value::String(text) => text.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Render the enum failure message: `Possible values are 'a', 'b' and 'c'.`
fn enum_message(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
    let listed = match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => {
            format!("{} and {}", rest.join(", "), last)
        }
        Some((last, _)) => last.clone(),
        None => String::new(),
    };
    format!("Possible values are {}.", listed)
}
