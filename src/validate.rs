//! Structural validator: check a JSON document against a schema without
//! compiling a grammar.
//!
//! The validator mirrors the lowering engine's dispatch order so the two
//! agree on what a schema means: a document the validator accepts is one the
//! compiled grammar can produce. Unresolvable `$ref` pointers fail open on
//! both sides.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::schema::{AdditionalProperties, Defs, ImmutableType, Schema, StringFormat};
use crate::scope::MAX_NESTING_SCOPE;

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-(0[1-9]|1[012])-(0[1-9]|[12]\d|3[01])$").unwrap()
});
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([01]\d|2[0-3]):[0-5]\d:[0-5]\d(\.\d{3})?(Z|[+-]([01]\d|2[0-3]):[0-5]\d)$")
        .unwrap()
});
static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}-(0[1-9]|1[012])-(0[1-9]|[12]\d|3[01])T([01]\d|2[0-3]):[0-5]\d:[0-5]\d(\.\d{3})?(Z|[+-]([01]\d|2[0-3]):[0-5]\d)$",
    )
    .unwrap()
});

/// Validation failure, carrying the offending value and the schema that
/// rejected it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub value: Value,
    pub schema: Schema,
}

/// Validate `value` against `schema`.
pub fn validate(value: &Value, schema: &Schema) -> Result<(), ValidationError> {
    check(value, schema, &Defs::new(), 0).map_err(|Technical(detail)| ValidationError {
        message: format!("Value does not conform to the schema: {detail}"),
        value: value.clone(),
        schema: schema.clone(),
    })
}

/// Internal failure detail, later wrapped into the public error.
struct Technical(String);

fn fail<T>(detail: String) -> Result<T, Technical> {
    Err(Technical(detail))
}

fn check(
    value: &Value,
    schema: &Schema,
    defs: &Defs,
    depth: u32,
) -> Result<(), Technical> {
    if depth >= MAX_NESTING_SCOPE {
        return fail(
            "maximum nesting scope exceeded while validating (possible causes: circular \
             `$ref` references, pathologically deep nesting)"
            .to_string(),
        );
    }
    let merged = merge_defs(defs, schema);
    let defs = merged.as_ref();

    match schema {
        Schema::Ref { pointer, .. } => {
            let target = pointer
                .strip_prefix("#/$defs/")
                .and_then(|name| defs.get(name));
            match target {
                Some(target) => check(value, target, defs, depth + 1),
                None => {
                    // Fail-open, matching the compiler's wildcard substitution.
                    log::warn!(
                        "failed to resolve $ref {pointer:?} during validation; \
                         accepting any value"
                    );
                    Ok(())
                }
            }
        }

        Schema::OneOf { alternatives, .. } => {
            for alternative in alternatives {
                if check(value, alternative, defs, depth + 1).is_ok() {
                    return Ok(());
                }
            }
            fail(format!(
                "Expected one of {} schemas but got {}",
                alternatives.len(),
                render(value)
            ))
        }

        Schema::Const { value: literal } => {
            if literal.matches(value) {
                Ok(())
            } else {
                fail(format!(
                    "Expected {} but got {}",
                    literal.json_text(),
                    render(value)
                ))
            }
        }

        Schema::Enum { values } => {
            if values.iter().any(|literal| literal.matches(value)) {
                Ok(())
            } else {
                let expected: Vec<String> =
                    values.iter().map(|l| l.json_text()).collect();
                fail(format!(
                    "Expected one of [{}] but got {}",
                    expected.join(", "),
                    render(value)
                ))
            }
        }

        Schema::Object {
            properties,
            additional_properties,
            min_properties,
            max_properties,
            ..
        } => {
            let Value::Object(entries) = value else {
                return fail(type_mismatch("object", value));
            };

            let missing: Vec<&str> = properties
                .keys()
                .filter(|key| !entries.contains_key(key.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return fail(format!("Missing keys: {}", quoted_list(&missing)));
            }

            let extra: Vec<&str> = entries
                .keys()
                .filter(|key| !properties.contains_key(key.as_str()))
                .map(String::as_str)
                .collect();
            match additional_properties {
                AdditionalProperties::None if !extra.is_empty() => {
                    return fail(format!("Unexpected keys: {}", quoted_list(&extra)));
                }
                AdditionalProperties::None | AdditionalProperties::Any => {}
                AdditionalProperties::Schema(extra_schema) => {
                    for key in &extra {
                        check(&entries[*key], extra_schema, defs, depth + 1)?;
                    }
                }
            }

            // With extras forbidden the entry count is fixed by the declared
            // properties, so count bounds only bind when extras are allowed.
            // The max bound is clamped the way the compiler clamps it.
            if !matches!(additional_properties, AdditionalProperties::None) {
                let floor = min_properties
                    .unwrap_or(0)
                    .max(properties.len() as i64);
                check_count(
                    entries.len() as i64,
                    *min_properties,
                    max_properties.map(|m| m.max(floor)),
                    "properties",
                )?;
            }

            for (key, prop_schema) in properties {
                check(&entries[key.as_str()], prop_schema, defs, depth + 1)?;
            }
            Ok(())
        }

        Schema::Array { items, prefix_items, min_items, max_items, .. } => {
            let Value::Array(elements) = value else {
                return fail(type_mismatch("array", value));
            };

            if elements.len() < prefix_items.len() {
                return fail(format!(
                    "Expected at least {} items but got {}",
                    prefix_items.len(),
                    elements.len()
                ));
            }
            let floor = min_items.unwrap_or(0).max(prefix_items.len() as i64);
            check_count(
                elements.len() as i64,
                *min_items,
                max_items.map(|m| m.max(floor)),
                "items",
            )?;

            for (element, prefix_schema) in elements.iter().zip(prefix_items) {
                check(element, prefix_schema, defs, depth + 1)?;
            }
            if let Some(item_schema) = items {
                for element in elements.iter().skip(prefix_items.len()) {
                    check(element, item_schema, defs, depth + 1)?;
                }
            }
            Ok(())
        }

        Schema::String { min_length, max_length } => {
            let Value::String(text) = value else {
                return fail(type_mismatch("string", value));
            };
            let chars = text.chars().count() as i64;
            let min = min_length.unwrap_or(0).max(0);
            check_count(
                chars,
                Some(min),
                max_length.map(|m| m.max(min)),
                "characters",
            )
        }

        Schema::Format { format } => {
            let Value::String(text) = value else {
                return fail(type_mismatch("string", value));
            };
            let regex: &Regex = match format {
                StringFormat::Date => &DATE_RE,
                StringFormat::Time => &TIME_RE,
                StringFormat::DateTime => &DATE_TIME_RE,
            };
            if regex.is_match(text) {
                Ok(())
            } else {
                fail(format!(
                    "Expected a string with format {:?} but got {}",
                    format.keyword(),
                    render(value)
                ))
            }
        }

        Schema::Basic { types } => {
            let matched = if types.is_empty() {
                // an empty type set compiles to `null`
                value.is_null()
            } else {
                types.iter().any(|t| type_accepts(*t, value))
            };
            if matched {
                Ok(())
            } else {
                let expected: Vec<&str> = if types.is_empty() {
                    vec!["null"]
                } else {
                    types.iter().map(|t| t.keyword()).collect()
                };
                match expected.as_slice() {
                    [only] => fail(type_mismatch(*only, value)),
                    many => fail(format!(
                        "Expected one of types [{}] but got type \"{}\"",
                        quoted_list(many),
                        type_of(value)
                    )),
                }
            }
        }
    }
}

/// Overlay a node's local `$defs` on the inherited ones; locals shadow.
fn merge_defs<'a>(inherited: &'a Defs, schema: &Schema) -> Cow<'a, Defs> {
    match schema.local_defs() {
        None => Cow::Borrowed(inherited),
        Some(local) if local.is_empty() => Cow::Borrowed(inherited),
        Some(local) => {
            let mut merged = inherited.clone();
            for (name, def) in local {
                merged.insert(name.clone(), def.clone());
            }
            Cow::Owned(merged)
        }
    }
}

fn type_accepts(type_: ImmutableType, value: &Value) -> bool {
    match type_ {
        ImmutableType::String => value.is_string(),
        ImmutableType::Number => value.is_number(),
        ImmutableType::Integer => value
            .as_f64()
            .is_some_and(|f| f.is_finite() && f.fract() == 0.0),
        ImmutableType::Boolean => value.is_boolean(),
        ImmutableType::Null => value.is_null(),
    }
}

fn check_count(
    actual: i64,
    min: Option<i64>,
    max: Option<i64>,
    noun: &str,
) -> Result<(), Technical> {
    match (min, max) {
        (Some(min), Some(max)) if min == max && actual != min => fail(format!(
            "Expected exactly {min} {noun} but got {actual}"
        )),
        (Some(min), _) if actual < min => fail(format!(
            "Expected at least {min} {noun} but got {actual}"
        )),
        (_, Some(max)) if actual > max => fail(format!(
            "Expected at most {max} {noun} but got {actual}"
        )),
        _ => Ok(()),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn quoted_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|item| format!("{item:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn type_mismatch(expected: &str, value: &Value) -> String {
    format!(
        "Expected type {:?} but got type {:?} ({})",
        expected,
        type_of(value),
        render(value)
    )
}

/// Compact rendering of a value for error messages, truncated past 100 chars.
fn render(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= 100 {
        return text;
    }
    let prefix: String = text.chars().take(100).collect();
    format!("{prefix}...")
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(v: Value) -> Schema {
        Schema::from_value(&v).expect("schema classifies")
    }

    fn accepts(schema_doc: Value, value: Value) -> bool {
        validate(&value, &schema(schema_doc)).is_ok()
    }

    fn rejection(schema_doc: Value, value: Value) -> String {
        validate(&value, &schema(schema_doc))
            .expect_err("value should be rejected")
            .message
    }

    #[test]
    fn enum_accepts_members_and_rejects_outsiders() {
        let doc = json!({"enum": [1, 2, 3]});
        assert!(accepts(doc.clone(), json!(2)));
        assert!(!accepts(doc, json!(5)));
    }

    #[test]
    fn numeric_literal_equality_is_js_style() {
        assert!(accepts(json!({"const": 2}), json!(2.0)));
        assert!(accepts(json!({"enum": [2.0]}), json!(2)));
        assert!(!accepts(json!({"const": 2}), json!("2")));
    }

    #[test]
    fn one_of_accepts_any_alternative_and_aggregates_failure() {
        let doc = json!({"oneOf": [{"type": "integer"}, {"type": "string"}]});
        assert!(accepts(doc.clone(), json!(3)));
        assert!(accepts(doc.clone(), json!("three")));
        let message = rejection(doc, json!(true));
        assert!(message.contains("Expected one of 2 schemas but got true"), "{message}");
    }

    #[test]
    fn undeclared_object_keys_are_rejected_by_default() {
        let doc = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}}
        });
        assert!(accepts(doc.clone(), json!({"name": "ada"})));
        let message = rejection(doc, json!({"name": "ada", "age": 36}));
        assert!(message.contains("Unexpected keys: \"age\""), "{message}");
    }

    #[test]
    fn missing_declared_keys_are_reported() {
        let doc = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
        });
        let message = rejection(doc, json!({"name": "ada"}));
        assert!(message.contains("Missing keys: \"age\""), "{message}");
    }

    #[test]
    fn additional_properties_schema_constrains_extras() {
        let doc = json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}},
            "additionalProperties": {"type": "number"}
        });
        assert!(accepts(doc.clone(), json!({"id": 1, "score": 9.5})));
        assert!(!accepts(doc.clone(), json!({"id": 1, "score": "high"})));
        let open = json!({"type": "object", "additionalProperties": true});
        assert!(accepts(open, json!({"anything": [1, {"goes": null}]})));
    }

    #[test]
    fn property_count_bounds_are_enforced() {
        let doc = json!({
            "type": "object",
            "additionalProperties": true,
            "minProperties": 1,
            "maxProperties": 2
        });
        assert!(!accepts(doc.clone(), json!({})));
        assert!(accepts(doc.clone(), json!({"a": 1, "b": 2})));
        let message = rejection(doc, json!({"a": 1, "b": 2, "c": 3}));
        assert!(message.contains("Expected at most 2 properties but got 3"), "{message}");
    }

    #[test]
    fn array_bounds_and_prefix_positions_are_checked() {
        let doc = json!({
            "type": "array",
            "prefixItems": [{"type": "string"}, {"type": "integer"}],
            "items": {"type": "boolean"},
            "minItems": 2,
            "maxItems": 4
        });
        assert!(accepts(doc.clone(), json!(["a", 1])));
        assert!(accepts(doc.clone(), json!(["a", 1, true, false])));
        assert!(!accepts(doc.clone(), json!(["a"])));
        assert!(!accepts(doc.clone(), json!([1, "a"])));
        assert!(!accepts(doc.clone(), json!(["a", 1, "not-bool"])));
        let message = rejection(doc, json!(["a", 1, true, false, true]));
        assert!(message.contains("Expected at most 4 items but got 5"), "{message}");
    }

    // Inverted declared bounds clamp max up to the effective minimum, the
    // same correction the grammar applies, so the validator accepts exactly
    // what the grammar produces.
    #[test]
    fn inverted_array_bounds_clamp_max_up_to_min() {
        let doc = json!({"type": "array", "minItems": 3, "maxItems": 2});
        assert!(accepts(doc.clone(), json!([1, 2, 3])));
        assert!(!accepts(doc.clone(), json!([1, 2])));
        assert!(!accepts(doc, json!([1, 2, 3, 4])));
    }

    #[test]
    fn inverted_object_bounds_clamp_max_up_to_min() {
        let doc = json!({
            "type": "object",
            "additionalProperties": true,
            "minProperties": 3,
            "maxProperties": 2
        });
        assert!(accepts(doc.clone(), json!({"a": 1, "b": 2, "c": 3})));
        assert!(!accepts(doc, json!({"a": 1, "b": 2})));
    }

    #[test]
    fn exact_count_bounds_use_the_exactly_wording() {
        let doc = json!({"type": "array", "minItems": 2, "maxItems": 2});
        let message = rejection(doc, json!([1]));
        assert!(message.contains("Expected exactly 2 items but got 1"), "{message}");
    }

    #[test]
    fn string_length_is_counted_in_characters() {
        let doc = json!({"type": "string", "minLength": 5, "maxLength": 5});
        assert!(accepts(doc.clone(), json!("héllo")));
        assert!(!accepts(doc, json!("hell")));
    }

    #[test]
    fn date_format_matches_calendar_shaped_strings_only() {
        let doc = json!({"type": "string", "format": "date"});
        assert!(accepts(doc.clone(), json!("2024-02-29")));
        assert!(!accepts(doc.clone(), json!("2024-13-01")));
        assert!(!accepts(doc.clone(), json!("2024-2-9")));
        assert!(!accepts(doc, json!(20240229)));
    }

    #[test]
    fn time_and_date_time_formats_accept_offsets_and_millis() {
        let time = json!({"type": "string", "format": "time"});
        assert!(accepts(time.clone(), json!("23:59:59Z")));
        assert!(accepts(time.clone(), json!("08:30:00.250+02:00")));
        assert!(!accepts(time, json!("24:00:00Z")));

        let date_time = json!({"type": "string", "format": "date-time"});
        assert!(accepts(date_time.clone(), json!("2024-06-01T12:00:00Z")));
        assert!(!accepts(date_time, json!("2024-06-01 12:00:00Z")));
    }

    #[test]
    fn integer_type_accepts_whole_floats_and_rejects_fractions() {
        let doc = json!({"type": "integer"});
        assert!(accepts(doc.clone(), json!(2)));
        assert!(accepts(doc.clone(), json!(2.0)));
        assert!(!accepts(doc.clone(), json!(2.5)));
        assert!(!accepts(doc, json!("2")));
    }

    #[test]
    fn empty_type_set_only_accepts_null() {
        let doc = json!({"type": []});
        assert!(accepts(doc.clone(), json!(null)));
        assert!(!accepts(doc, json!(0)));
    }

    #[test]
    fn self_referential_defs_validate_recursively() {
        let doc = json!({
            "$ref": "#/$defs/node",
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "integer"},
                        "next": {"oneOf": [{"$ref": "#/$defs/node"}, {"type": "null"}]}
                    }
                }
            }
        });
        assert!(accepts(
            doc.clone(),
            json!({"value": 1, "next": {"value": 2, "next": null}})
        ));
        assert!(!accepts(
            doc,
            json!({"value": 1, "next": {"value": "two", "next": null}})
        ));
    }

    #[test]
    fn unresolved_ref_fails_open() {
        let doc = json!({"$ref": "#/$defs/missing"});
        assert!(accepts(doc.clone(), json!({"anything": true})));
        assert!(accepts(doc, json!(null)));
    }

    #[test]
    fn local_defs_shadow_inherited_ones() {
        let doc = json!({
            "type": "object",
            "properties": {
                "outer": {"$ref": "#/$defs/node"},
                "holder": {
                    "type": "object",
                    "properties": {"inner": {"$ref": "#/$defs/node"}},
                    "$defs": {"node": {"type": "boolean"}}
                }
            },
            "$defs": {"node": {"type": "string"}}
        });
        assert!(accepts(
            doc.clone(),
            json!({"outer": "text", "holder": {"inner": true}})
        ));
        assert!(!accepts(doc, json!({"outer": true, "holder": {"inner": true}})));
    }

    #[test]
    fn cyclic_ref_without_progress_is_rejected_not_a_stack_overflow() {
        let doc = json!({
            "$ref": "#/$defs/loop",
            "$defs": {"loop": {"$ref": "#/$defs/loop"}}
        });
        let message = rejection(doc, json!(1));
        assert!(message.contains("maximum nesting scope exceeded"), "{message}");
    }
}
