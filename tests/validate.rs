//! Validation Tests
//!
//! End-to-end behavior of compiled validators: coercion per type,
//! missing/null handling, unknown-key policy, custom chains, and the
//! sync/deferred duality of a single compiled routine.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use strainer::{
    compile, KeyPath, RawNode, RawSchema, Rule, SchemaType, TaskQueue, UnknownKeys, Validator,
};

fn person_schema() -> RawSchema {
    RawSchema::object([
        ("name", RawNode::typed(SchemaType::String).required(true)),
        ("age", RawNode::typed(SchemaType::Number).range("0-150")),
    ])
}

// =============================================================================
// End-to-end
// =============================================================================

#[test]
fn test_sanitizes_and_coerces() {
    let validator = compile(person_schema()).unwrap();
    let clean = validator
        .validate(&json!({"name": "Ann", "age": "30"}))
        .unwrap();
    assert_eq!(clean, json!({"name": "Ann", "age": 30}));
}

#[test]
fn test_missing_required_field_fails_at_its_path() {
    let validator = compile(person_schema()).unwrap();
    let err = validator.validate(&json!({"age": 30})).unwrap_err();
    assert_eq!(err.rule, Rule::Required);
    assert_eq!(err.key_path.segments(), ["name"]);
    assert_eq!(err.message, "Data is required.");
}

#[test]
fn test_optional_missing_field_is_omitted() {
    let validator = compile(person_schema()).unwrap();
    let clean = validator.validate(&json!({"name": "Ann"})).unwrap();
    assert_eq!(clean, json!({"name": "Ann"}));
}

#[test]
fn test_one_shot_helper() {
    let clean = strainer::validate(&json!({"name": "Ann"}), person_schema()).unwrap();
    assert_eq!(clean, json!({"name": "Ann"}));
}

// =============================================================================
// Object
// =============================================================================

#[test]
fn test_non_object_fails_type() {
    let validator = compile(person_schema()).unwrap();
    let err = validator.validate(&json!("nope")).unwrap_err();
    assert_eq!(err.rule, Rule::Type);
    assert_eq!(err.message, "Is not of type Object.");
}

#[test]
fn test_unknown_key_denied_by_default() {
    let validator = compile(person_schema()).unwrap();
    let err = validator
        .validate(&json!({"name": "Ann", "extra": 1}))
        .unwrap_err();
    assert_eq!(err.rule, Rule::UnknownKeys);
    assert_eq!(err.key_path.segments(), ["extra"]);
    assert_eq!(err.message, "Unknown key.");
}

#[test]
fn test_unknown_keys_allow_copies_them() {
    let schema = RawNode::typed(SchemaType::Object)
        .unknown_keys(UnknownKeys::Allow)
        .field("name", RawNode::typed(SchemaType::String));
    let validator = compile(schema).unwrap();
    let clean = validator
        .validate(&json!({"name": "Ann", "extra": 1}))
        .unwrap();
    assert_eq!(clean, json!({"name": "Ann", "extra": 1}));
}

#[test]
fn test_unknown_keys_remove_drops_them() {
    let schema = RawNode::typed(SchemaType::Object)
        .unknown_keys(UnknownKeys::Remove)
        .field("name", RawNode::typed(SchemaType::String));
    let validator = compile(schema).unwrap();
    let clean = validator
        .validate(&json!({"name": "Ann", "extra": 1}))
        .unwrap();
    assert_eq!(clean, json!({"name": "Ann"}));
}

#[test]
fn test_nested_error_paths() {
    let schema = RawSchema::object([(
        "user",
        RawSchema::object([("name", RawNode::typed(SchemaType::String).required(true))]),
    )]);
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!({"user": {}})).unwrap_err();
    assert_eq!(err.key_path.segments(), ["user", "name"]);
    assert_eq!(err.rule, Rule::Required);
}

#[test]
fn test_fields_validate_in_declaration_order() {
    // Both fields are invalid; the first declared one reports.
    let schema = RawSchema::object([
        ("first", RawNode::typed(SchemaType::Number)),
        ("second", RawNode::typed(SchemaType::Number)),
    ]);
    let validator = compile(schema).unwrap();
    let err = validator
        .validate(&json!({"second": "x", "first": "y"}))
        .unwrap_err();
    assert_eq!(err.key_path.segments(), ["first"]);
}

// =============================================================================
// Array
// =============================================================================

#[test]
fn test_array_elements_coerce_in_order() {
    let validator = compile(RawSchema::array(SchemaType::Number)).unwrap();
    let clean = validator.validate(&json!(["1", 2, "3"])).unwrap();
    assert_eq!(clean, json!([1, 2, 3]));
}

#[test]
fn test_non_array_fails_type() {
    let validator = compile(RawSchema::array(SchemaType::Number)).unwrap();
    let err = validator.validate(&json!({"0": 1})).unwrap_err();
    assert_eq!(err.rule, Rule::Type);
    assert_eq!(err.message, "Is not of type Array.");
}

#[test]
fn test_element_failure_reports_index() {
    let validator = compile(RawSchema::array(SchemaType::Number)).unwrap();
    let err = validator.validate(&json!([1, "two", 3])).unwrap_err();
    assert_eq!(err.key_path.segments(), ["1"]);
    assert_eq!(err.rule, Rule::Type);
}

#[test]
fn test_array_len_checks_the_accumulator() {
    let schema = RawNode::typed(SchemaType::Array)
        .items(SchemaType::Number)
        .len("2-3");
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!([1, 2])).is_ok());
    let err = validator.validate(&json!([1])).unwrap_err();
    assert_eq!(err.rule, Rule::Len);
    assert_eq!(err.message, "Array length is not within range of '2-3'.");
}

#[test]
fn test_array_len_from_number() {
    let schema = RawNode::typed(SchemaType::Array)
        .items(SchemaType::Number)
        .len(2);
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!([1, 2])).is_ok());
    assert_eq!(
        validator.validate(&json!([1])).unwrap_err().rule,
        Rule::Len
    );
}

#[test]
fn test_unique_rejects_structural_duplicates() {
    let schema = RawNode::typed(SchemaType::Array).unique(true);
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!([{"a": 1}, {"a": 2}])).is_ok());
    let err = validator
        .validate(&json!([{"a": 1}, {"a": 1}]))
        .unwrap_err();
    assert_eq!(err.rule, Rule::Unique);
    assert_eq!(err.message, "Array is not unique.");
}

#[test]
fn test_unique_compares_coerced_elements() {
    // "1" and 1 both coerce to the number 1 before the uniqueness check.
    let schema = RawNode::typed(SchemaType::Array)
        .items(SchemaType::Number)
        .unique(true);
    let validator = compile(schema).unwrap();
    assert_eq!(
        validator.validate(&json!(["1", 1])).unwrap_err().rule,
        Rule::Unique
    );
}

#[test]
fn test_array_without_element_schema_passes_values_through() {
    let validator = compile(RawNode::typed(SchemaType::Array)).unwrap();
    let clean = validator.validate(&json!([1, "two", true])).unwrap();
    assert_eq!(clean, json!([1, "two", true]));
}

// =============================================================================
// String
// =============================================================================

#[test]
fn test_string_type_check() {
    let validator = compile(SchemaType::String).unwrap();
    assert_eq!(validator.validate(&json!("ok")).unwrap(), json!("ok"));
    let err = validator.validate(&json!(5)).unwrap_err();
    assert_eq!(err.message, "Is not of type String.");
}

#[test]
fn test_trim_applies_before_match() {
    let schema = RawNode::typed(SchemaType::String)
        .trim(true)
        .match_pattern("^[0-9]+$");
    let validator = compile(schema).unwrap();
    assert_eq!(validator.validate(&json!("  42  ")).unwrap(), json!("42"));
}

#[test]
fn test_match_failure() {
    let schema = RawNode::typed(SchemaType::String).match_pattern("^[0-9]+$");
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!("abc")).unwrap_err();
    assert_eq!(err.rule, Rule::Match);
    assert_eq!(err.message, "Does not match expression ^[0-9]+$.");
}

#[test]
fn test_match_flagged_pattern() {
    let schema = RawNode::typed(SchemaType::String).match_pattern("/^abc$/i");
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!("ABC")).is_ok());
    assert!(validator.validate(&json!("abd")).is_err());
}

#[test]
fn test_enum_membership() {
    let schema = RawNode::typed(SchemaType::String).enum_values(["red", "green", "blue"]);
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!("green")).is_ok());
    let err = validator.validate(&json!("yellow")).unwrap_err();
    assert_eq!(err.rule, Rule::Enum);
    assert_eq!(
        err.message,
        "Possible values are 'red', 'green' and 'blue'."
    );
}

// =============================================================================
// Number
// =============================================================================

#[test]
fn test_number_coercion() {
    let validator = compile(SchemaType::Number).unwrap();
    assert_eq!(validator.validate(&json!("30")).unwrap(), json!(30));
    assert_eq!(validator.validate(&json!("2.5")).unwrap(), json!(2.5));
    assert_eq!(validator.validate(&json!(7)).unwrap(), json!(7));
    assert_eq!(validator.validate(&json!(" 42 ")).unwrap(), json!(42));
}

#[test]
fn test_number_rejects_garbage() {
    let validator = compile(SchemaType::Number).unwrap();
    for bad in [json!("abc"), json!(""), json!(true), json!([1])] {
        let err = validator.validate(&bad).unwrap_err();
        assert_eq!(err.rule, Rule::Type);
        assert_eq!(err.message, "Is not of type Number.");
    }
}

#[test]
fn test_number_range() {
    let schema = RawNode::typed(SchemaType::Number).range("0-150");
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!(150)).is_ok());
    let err = validator.validate(&json!(151)).unwrap_err();
    assert_eq!(err.rule, Rule::Range);
    assert_eq!(err.message, "Not within range of 0-150.");
}

#[test]
fn test_number_open_ended_range() {
    let schema = RawNode::typed(SchemaType::Number).range("-2,4-6,8,10-");
    let validator = compile(schema).unwrap();
    assert!(validator.validate(&json!(2)).is_ok());
    assert!(validator.validate(&json!(3)).is_err());
    assert!(validator.validate(&json!(100)).is_ok());
}

// =============================================================================
// Boolean
// =============================================================================

#[test]
fn test_boolean_string_coercion() {
    let validator = compile(SchemaType::Boolean).unwrap();
    assert_eq!(validator.validate(&json!("true")).unwrap(), json!(true));
    assert_eq!(validator.validate(&json!("FALSE")).unwrap(), json!(false));
    assert_eq!(validator.validate(&json!(true)).unwrap(), json!(true));
}

#[test]
fn test_boolean_falsy_values_pass_through() {
    let validator = compile(SchemaType::Boolean).unwrap();
    assert_eq!(validator.validate(&json!(false)).unwrap(), json!(false));
    assert_eq!(validator.validate(&json!(0)).unwrap(), json!(0));
    assert_eq!(validator.validate(&json!("")).unwrap(), json!(""));
}

#[test]
fn test_boolean_rejects_other_values() {
    let validator = compile(SchemaType::Boolean).unwrap();
    let err = validator.validate(&json!(1)).unwrap_err();
    assert_eq!(err.rule, Rule::Type);
    assert_eq!(err.message, "Is not of type Boolean.");
}

// =============================================================================
// Date
// =============================================================================

#[test]
fn test_date_parses_and_normalizes() {
    let validator = compile(SchemaType::Date).unwrap();
    assert_eq!(
        validator.validate(&json!("2020-01-15")).unwrap(),
        json!("2020-01-15T00:00:00Z")
    );
    assert_eq!(
        validator.validate(&json!("2020-01-15T10:30:00Z")).unwrap(),
        json!("2020-01-15T10:30:00Z")
    );
}

#[test]
fn test_unparseable_date_string() {
    let validator = compile(SchemaType::Date).unwrap();
    let err = validator.validate(&json!("tomorrow")).unwrap_err();
    assert_eq!(err.rule, Rule::Type);
    assert_eq!(err.message, "Date string must be in ISO-8601 format.");
}

#[test]
fn test_non_string_date() {
    let validator = compile(SchemaType::Date).unwrap();
    let err = validator.validate(&json!(1579046400)).unwrap_err();
    assert_eq!(err.message, "Is not of type Date.");
}

// =============================================================================
// Missing and Null
// =============================================================================

#[test]
fn test_null_rejected_unless_allowed() {
    let validator = compile(SchemaType::String).unwrap();
    let err = validator.validate(&json!(null)).unwrap_err();
    assert_eq!(err.rule, Rule::AllowNull);
    assert_eq!(err.message, "Data cannot be null.");

    let validator = compile(RawNode::typed(SchemaType::String).allow_null(true)).unwrap();
    assert_eq!(validator.validate(&json!(null)).unwrap(), json!(null));
}

#[test]
fn test_absent_input_resolves_default() {
    let schema = RawNode::typed(SchemaType::String).default_value("fallback");
    let validator = compile(schema).unwrap();
    let clean = validator.validate_option(None).unwrap();
    assert_eq!(clean, Some(json!("fallback")));
}

#[test]
fn test_absent_field_resolves_default() {
    let schema = RawSchema::object([(
        "role",
        RawNode::typed(SchemaType::String).default_value("member"),
    )]);
    let validator = compile(schema).unwrap();
    let clean = validator.validate(&json!({})).unwrap();
    assert_eq!(clean, json!({"role": "member"}));
}

#[test]
fn test_computed_default() {
    let schema = RawSchema::object([(
        "attempts",
        RawNode::typed(SchemaType::Number).default_with(|| json!(3)),
    )]);
    let validator = compile(schema).unwrap();
    let clean = validator.validate(&json!({})).unwrap();
    assert_eq!(clean, json!({"attempts": 3}));
}

#[test]
fn test_deferred_default() {
    let schema = RawSchema::object([(
        "token",
        RawNode::typed(SchemaType::String).default_deferred(|reply| reply(json!("issued"))),
    )]);
    let validator = compile(schema).unwrap();
    let clean = validator.validate_queued(&json!({})).unwrap();
    assert_eq!(clean, json!({"token": "issued"}));
}

#[test]
fn test_null_does_not_resolve_default() {
    let schema = RawNode::typed(SchemaType::String).default_value("fallback");
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!(null)).unwrap_err();
    assert_eq!(err.rule, Rule::AllowNull);
}

#[test]
fn test_absent_root_without_default() {
    let validator = compile(RawNode::typed(SchemaType::String).required(true)).unwrap();
    let err = validator.validate_option(None).unwrap_err();
    assert_eq!(err.rule, Rule::Required);
    assert!(err.key_path.is_root());

    let validator = compile(SchemaType::String).unwrap();
    assert_eq!(validator.validate_option(None).unwrap(), None);
}

// =============================================================================
// Custom Chain
// =============================================================================

#[test]
fn test_custom_transform_replaces_value() {
    let schema = RawNode::typed(SchemaType::String)
        .custom(|value, _schema| {
            let text = value.and_then(Value::as_str).unwrap_or_default();
            Ok(Some(json!(text.to_uppercase())))
        });
    let validator = compile(schema).unwrap();
    assert_eq!(validator.validate(&json!("abc")).unwrap(), json!("ABC"));
}

#[test]
fn test_custom_returning_none_keeps_value() {
    let schema = RawNode::typed(SchemaType::String).custom(|_value, _schema| Ok(None));
    let validator = compile(schema).unwrap();
    assert_eq!(validator.validate(&json!("abc")).unwrap(), json!("abc"));
}

#[test]
fn test_custom_error_is_wrapped() {
    let schema =
        RawNode::typed(SchemaType::Number).custom(|_value, _schema| Err("not a prime".into()));
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!(4)).unwrap_err();
    assert_eq!(err.rule, Rule::Custom);
    assert_eq!(err.message, "not a prime");
}

#[test]
fn test_custom_chain_runs_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&seen);
    let second = Arc::clone(&seen);
    let schema = RawNode::passthrough()
        .custom(move |_value, _schema| {
            first.lock().unwrap().push(1);
            Ok(None)
        })
        .custom(move |_value, _schema| {
            second.lock().unwrap().push(2);
            Ok(None)
        });
    let validator = compile(schema).unwrap();
    validator.validate(&json!("x")).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_custom_chain_short_circuits() {
    let reached = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&reached);
    let schema = RawNode::passthrough()
        .custom(|_value, _schema| Err("first failure".into()))
        .custom(move |_value, _schema| {
            *flag.lock().unwrap() = true;
            Ok(None)
        });
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!("x")).unwrap_err();
    assert_eq!(err.message, "first failure");
    assert!(!*reached.lock().unwrap());
}

#[test]
fn test_custom_runs_for_absent_value() {
    // A pass-through node's custom chain sees the absent value and may
    // supply one.
    let schema = RawNode::passthrough().custom(|value, _schema| {
        assert!(value.is_none());
        Ok(Some(json!("supplied")))
    });
    let validator = compile(schema).unwrap();
    assert_eq!(
        validator.validate_option(None).unwrap(),
        Some(json!("supplied"))
    );
}

#[test]
fn test_deferred_custom_validator() {
    let schema = RawNode::typed(SchemaType::Number).custom_deferred(|value, _schema, reply| {
        let doubled = value
            .as_ref()
            .and_then(Value::as_f64)
            .map(|n| json!(n * 2.0));
        reply(Ok(doubled));
    });
    let validator = compile(schema).unwrap();
    assert_eq!(validator.validate_queued(&json!(21)).unwrap(), json!(42.0));
}

#[test]
fn test_deferred_custom_error() {
    let schema = RawNode::typed(SchemaType::Number)
        .custom_deferred(|_value, _schema, reply| reply(Err("rejected downstream".into())));
    let validator = compile(schema).unwrap();
    let err = validator.validate_queued(&json!(1)).unwrap_err();
    assert_eq!(err.rule, Rule::Custom);
    assert_eq!(err.message, "rejected downstream");
}

#[test]
fn test_object_custom_sees_the_accumulator() {
    // The custom chain receives the sanitized accumulator, not the input.
    let schema = RawNode::typed(SchemaType::Object)
        .unknown_keys(UnknownKeys::Remove)
        .field("kept", RawNode::typed(SchemaType::String))
        .custom(|value, _schema| {
            let keys: Vec<String> = value
                .and_then(Value::as_object)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            assert_eq!(keys, ["kept"]);
            Ok(None)
        });
    let validator = compile(schema).unwrap();
    validator
        .validate(&json!({"kept": "yes", "dropped": "no"}))
        .unwrap();
}

// =============================================================================
// Message Overrides
// =============================================================================

#[test]
fn test_error_message_override() {
    let schema = RawSchema::object([(
        "name",
        RawNode::typed(SchemaType::String)
            .required(true)
            .error_message(Rule::Required, "Name please."),
    )]);
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!({})).unwrap_err();
    assert_eq!(err.rule, Rule::Required);
    assert_eq!(err.message, "Name please.");
}

#[test]
fn test_error_message_override_from_json() {
    let validator = compile(
        RawSchema::from_value(&json!({
            "type": "Number",
            "range": "0-10",
            "errors": {"range": "Keep it small."}
        }))
        .unwrap(),
    )
    .unwrap();
    let err = validator.validate(&json!(11)).unwrap_err();
    assert_eq!(err.message, "Keep it small.");
}

// =============================================================================
// Root Paths and Error Reporting
// =============================================================================

#[test]
fn test_validate_at_prefixes_the_path() {
    let validator = compile(person_schema()).unwrap();
    let err = validator
        .validate_at(&json!({"age": 1}), KeyPath::from_segments(["body"]))
        .unwrap_err();
    assert_eq!(err.key_path.segments(), ["body", "name"]);
    assert_eq!(err.to_string(), "body.name: Data is required.");
}

#[test]
fn test_error_carries_the_original_fragment() {
    let validator = compile(person_schema()).unwrap();
    let err = validator.validate(&json!({"age": 1})).unwrap_err();
    // The failing node's fragment is the non-formalized schema.
    assert_eq!(
        err.schema.to_debug_value(),
        json!({"type": "String", "required": true})
    );
}

// =============================================================================
// Sync / Deferred Duality
// =============================================================================

fn assert_both_modes_agree(validator: &Validator, data: &Value) {
    let sync = validator.validate(data);
    let queued = validator.validate_queued(data);
    match (sync, queued) {
        (Ok(a), Ok(b)) => assert_eq!(a, b),
        (Err(a), Err(b)) => {
            assert_eq!(a.rule, b.rule);
            assert_eq!(a.key_path, b.key_path);
            assert_eq!(a.message, b.message);
        }
        (a, b) => panic!("modes disagree: sync {:?}, queued {:?}", a, b),
    }
}

#[test]
fn test_modes_agree_across_inputs() {
    let schema = RawSchema::object([
        ("name", RawNode::typed(SchemaType::String).required(true)),
        ("age", RawNode::typed(SchemaType::Number).range("0-150")),
        (
            "tags",
            RawNode::typed(SchemaType::Array)
                .items(SchemaType::String)
                .unique(true),
        ),
    ]);
    let validator = compile(schema).unwrap();
    let inputs = [
        json!({"name": "Ann", "age": "30", "tags": ["a", "b"]}),
        json!({"name": "Ann"}),
        json!({"age": 200}),
        json!({"name": "Ann", "tags": ["a", "a"]}),
        json!({"name": 5}),
        json!("not an object"),
    ];
    for input in &inputs {
        assert_both_modes_agree(&validator, input);
    }
}

#[test]
fn test_deferred_run_waits_for_queue_turns() {
    let validator = compile(person_schema()).unwrap();
    let queue = Rc::new(TaskQueue::new());
    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    let data = json!({"name": "Ann"});
    validator.validate_deferred(Some(&data), &queue, move |res| {
        *slot.borrow_mut() = Some(res);
    });
    // Nothing has run yet: the first step itself is queued.
    assert!(result.borrow().is_none());
    queue.drain();
    let outcome = result.borrow_mut().take().unwrap().unwrap();
    assert_eq!(outcome, Some(json!({"name": "Ann"})));
}

#[test]
fn test_deferred_hook_that_never_replies_stalls_sync_mode() {
    let schema = RawNode::typed(SchemaType::Number).custom_deferred(|_value, _schema, reply| {
        // Dropping the reply without invoking it.
        drop(reply);
    });
    let validator = compile(schema).unwrap();
    let err = validator.validate(&json!(1)).unwrap_err();
    assert_eq!(err.rule, Rule::Custom);
    assert_eq!(err.message, "Validator did not complete synchronously.");
}

#[test]
fn test_validator_is_reusable() {
    let validator = compile(person_schema()).unwrap();
    for _ in 0..3 {
        assert!(validator.validate(&json!({"name": "Ann"})).is_ok());
        assert!(validator.validate(&json!({})).is_err());
    }
}
