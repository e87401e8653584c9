//! Schema-driven data sanitization.
//!
//! [`sanitize`] walks a schema tree and a candidate value in lock-step,
//! validating and coercing as it goes, and returns a **new** validated
//! value. Callers reattach the result themselves - there is no in-place
//! mutation contract.
//!
//! Sanitization is idempotent: running it again over its own output
//! yields an equal value (dates normalize to ISO-8601 UTC on the first
//! pass and then stay fixed).

use crate::error::{CoreError, CoreResult};
use crate::paths;
use crate::schema::{FieldSchema, FieldType, RelationMode};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

/// Sanitizes `value` against `schema`, returning the validated value.
///
/// `path` is the dotted location of `value` for error reporting; pass
/// `""` for the root.
///
/// # Errors
///
/// Returns [`CoreError::DataValidation`] naming the full dotted path of
/// the first offending property.
pub fn sanitize(schema: &FieldSchema, value: &Value, path: &str) -> CoreResult<Value> {
    sanitize_entry(schema, Some(value), path)
}

/// Sanitizes a possibly-absent property (`None` = key not present).
pub(crate) fn sanitize_entry(
    schema: &FieldSchema,
    value: Option<&Value>,
    path: &str,
) -> CoreResult<Value> {
    let is_nil = matches!(value, None | Some(Value::Null));
    if is_nil {
        if let Some(default) = &schema.default {
            // Defaults are deep-cloned per document, then coerced like any
            // other candidate value.
            return sanitize_value(schema, default, path);
        }
        // With no default to substitute, an explicit null date is rejected
        // even when empty values are allowed.
        if schema.field_type == FieldType::Date && matches!(value, Some(Value::Null)) {
            return Err(CoreError::data_validation(path, "date cannot be null"));
        }
        if schema.allow_empty {
            return Ok(Value::Null);
        }
        return Err(CoreError::data_validation(path, "missing required value"));
    }

    // is_nil was false, so value is present and non-null.
    match value {
        Some(v) => sanitize_value(schema, v, path),
        None => Err(CoreError::data_validation(path, "missing required value")),
    }
}

fn sanitize_value(schema: &FieldSchema, value: &Value, path: &str) -> CoreResult<Value> {
    match schema.field_type {
        FieldType::String => sanitize_string(value, path),
        FieldType::Integer => sanitize_integer(value, path),
        FieldType::Number => sanitize_number(value, path),
        FieldType::Boolean => sanitize_boolean(value, path),
        FieldType::Date => sanitize_date(value, path),
        FieldType::Enum => sanitize_enum(schema, value, path),
        FieldType::Array => sanitize_array(schema, value, path),
        FieldType::Object => sanitize_object(schema, value, path),
        FieldType::Relation => sanitize_relation(schema, value, path),
    }
}

fn sanitize_string(value: &Value, path: &str) -> CoreResult<Value> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err(CoreError::data_validation(path, "value is not string-like")),
    }
}

fn sanitize_integer(value: &Value, path: &str) -> CoreResult<Value> {
    match value {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(value.clone());
            }
            match n.as_f64() {
                // `as` saturates, so the range check must come first.
                Some(f)
                    if f.is_finite()
                        && f.fract() == 0.0
                        && f >= i64::MIN as f64
                        && f < i64::MAX as f64 =>
                {
                    Ok(Value::from(f as i64))
                }
                _ => Err(CoreError::data_validation(path, "value is not an integer")),
            }
        }
        Value::String(s) => match s.parse::<i64>() {
            Ok(i) => Ok(Value::from(i)),
            Err(_) => Err(CoreError::data_validation(
                path,
                format!("{s} does not parse as a base-10 integer"),
            )),
        },
        _ => Err(CoreError::data_validation(path, "value is not an integer")),
    }
}

fn sanitize_number(value: &Value, path: &str) -> CoreResult<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => match s.parse::<f64>() {
            Ok(f) if f.is_finite() => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| CoreError::data_validation(path, "value is not a number")),
            _ => Err(CoreError::data_validation(
                path,
                format!("{s} does not parse as a number"),
            )),
        },
        _ => Err(CoreError::data_validation(path, "value is not a number")),
    }
}

fn sanitize_boolean(value: &Value, path: &str) -> CoreResult<Value> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Ok(Value::Bool(true)),
            Some(f) if f == 0.0 => Ok(Value::Bool(false)),
            _ => Err(CoreError::data_validation(path, "value is not a boolean")),
        },
        _ => Err(CoreError::data_validation(path, "value is not a boolean")),
    }
}

fn sanitize_date(value: &Value, path: &str) -> CoreResult<Value> {
    let parsed: DateTime<Utc> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                CoreError::data_validation(path, format!("{s} is not a valid date"))
            })?,
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| CoreError::data_validation(path, "value is not a valid date"))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| CoreError::data_validation(path, "value is not a valid date"))?
        }
        _ => return Err(CoreError::data_validation(path, "value is not a valid date")),
    };
    Ok(Value::String(
        parsed.to_rfc3339_opts(SecondsFormat::Millis, true),
    ))
}

fn sanitize_enum(schema: &FieldSchema, value: &Value, path: &str) -> CoreResult<Value> {
    if schema.enum_values.iter().any(|v| v == value) {
        Ok(value.clone())
    } else {
        Err(CoreError::data_validation(
            path,
            format!("{value} is not one of the declared enum values"),
        ))
    }
}

fn sanitize_array(schema: &FieldSchema, value: &Value, path: &str) -> CoreResult<Value> {
    let items = schema.items.as_ref().ok_or_else(|| {
        CoreError::schema_validation(path, "array declares no item schema")
    })?;
    match value {
        Value::Array(elements) => {
            let mut out = Vec::with_capacity(elements.len());
            for (i, element) in elements.iter().enumerate() {
                out.push(sanitize(items, element, &format!("{path}[{i}]"))?);
            }
            Ok(Value::Array(out))
        }
        _ => Err(CoreError::data_validation(path, "value is not an array")),
    }
}

fn sanitize_object(schema: &FieldSchema, value: &Value, path: &str) -> CoreResult<Value> {
    let map = match value {
        Value::Object(map) => map,
        _ => return Err(CoreError::data_validation(path, "value is not an object")),
    };

    let mut out = Map::new();
    for (name, child) in &schema.children {
        let entry = map.get(name);
        let sanitized = sanitize_entry(child, entry, &paths::join(path, name))?;
        // Absent optional keys stay absent; explicit nulls are kept.
        if sanitized.is_null() && entry.is_none() {
            continue;
        }
        out.insert(name.clone(), sanitized);
    }

    if schema.include_unlisted {
        for (name, v) in map {
            if !schema.children.contains_key(name) {
                out.insert(name.clone(), v.clone());
            }
        }
    }

    Ok(Value::Object(out))
}

fn sanitize_relation(schema: &FieldSchema, value: &Value, path: &str) -> CoreResult<Value> {
    let spec = schema.relation.as_ref().ok_or_else(|| {
        CoreError::schema_validation(path, "relation declares no target model")
    })?;
    let map = match value {
        Value::Object(map) => map,
        _ => {
            return Err(CoreError::data_validation(
                path,
                format!("expected an association with model {}", spec.target),
            ));
        }
    };
    match spec.mode {
        RelationMode::ByReference => {
            match map.get(&spec.id_property) {
                Some(Value::String(s)) if !s.is_empty() => Ok(value.clone()),
                _ => Err(CoreError::data_validation(
                    path,
                    format!(
                        "by-reference association is missing the {} pointer",
                        spec.id_property
                    ),
                )),
            }
        }
        RelationMode::Embedded => match map.get("_type") {
            Some(Value::String(t)) if *t == spec.target => Ok(value.clone()),
            _ => Err(CoreError::data_validation(
                path,
                format!("embedded association is not a {} instance", spec.target),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationSpec;
    use serde_json::json;

    fn person_schema() -> FieldSchema {
        FieldSchema::object()
            .field("name", FieldSchema::string())
            .field("age", FieldSchema::integer().allow_empty())
            .field("score", FieldSchema::number().allow_empty())
            .field("active", FieldSchema::boolean().default_value(json!(true)))
            .field("joined", FieldSchema::date().allow_empty())
            .field(
                "role",
                FieldSchema::enumeration(vec![json!("admin"), json!("user")])
                    .default_value(json!("user")),
            )
            .field(
                "tags",
                FieldSchema::array_of(FieldSchema::string()).allow_empty(),
            )
    }

    #[test]
    fn applies_defaults_for_missing_values() {
        let out = sanitize(&person_schema(), &json!({"name": "ada"}), "").unwrap();
        assert_eq!(out["active"], json!(true));
        assert_eq!(out["role"], json!("user"));
    }

    #[test]
    fn missing_required_value_names_path() {
        let err = sanitize(&person_schema(), &json!({}), "").unwrap_err();
        match err {
            CoreError::DataValidation { path, .. } => assert_eq!(path, "name"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_error_paths_are_dotted() {
        let schema = FieldSchema::object().field(
            "address",
            FieldSchema::object().field("city", FieldSchema::string()),
        );
        let err = sanitize(&schema, &json!({"address": {}}), "").unwrap_err();
        assert!(err.to_string().contains("address.city"));
    }

    #[test]
    fn string_coercion() {
        let schema = FieldSchema::string();
        assert_eq!(sanitize(&schema, &json!("x"), "").unwrap(), json!("x"));
        assert_eq!(sanitize(&schema, &json!(4), "").unwrap(), json!("4"));
        assert_eq!(sanitize(&schema, &json!(true), "").unwrap(), json!("true"));
        assert!(sanitize(&schema, &json!({}), "").is_err());
    }

    #[test]
    fn integer_rejects_trailing_garbage() {
        let schema = FieldSchema::integer();
        let err = sanitize(&schema, &json!("3a"), "").unwrap_err();
        assert!(matches!(err, CoreError::DataValidation { .. }));
    }

    #[test]
    fn integer_coerces_integral_float() {
        let schema = FieldSchema::integer();
        assert_eq!(sanitize(&schema, &json!(4.0), "").unwrap(), json!(4));
        assert!(sanitize(&schema, &json!(4.5), "").is_err());
    }

    #[test]
    fn integer_rejects_out_of_range_float() {
        let schema = FieldSchema::integer();
        assert!(sanitize(&schema, &json!(1e30), "").is_err());
        assert!(sanitize(&schema, &json!(-1e30), "").is_err());
    }

    #[test]
    fn integer_accepts_numeric_strings() {
        let schema = FieldSchema::integer();
        assert_eq!(sanitize(&schema, &json!("42"), "").unwrap(), json!(42));
        assert_eq!(sanitize(&schema, &json!("-7"), "").unwrap(), json!(-7));
    }

    #[test]
    fn number_rejects_trailing_garbage() {
        let schema = FieldSchema::number();
        assert!(sanitize(&schema, &json!("1.5x"), "").is_err());
        assert_eq!(sanitize(&schema, &json!("1.5"), "").unwrap(), json!(1.5));
    }

    #[test]
    fn boolean_accepts_zero_and_one() {
        let schema = FieldSchema::boolean();
        assert_eq!(sanitize(&schema, &json!(1), "").unwrap(), json!(true));
        assert_eq!(sanitize(&schema, &json!(0), "").unwrap(), json!(false));
        assert!(sanitize(&schema, &json!(2), "").is_err());
        assert!(sanitize(&schema, &json!("true"), "").is_err());
    }

    #[test]
    fn date_normalizes_to_utc_millis() {
        let schema = FieldSchema::date();
        let out = sanitize(&schema, &json!("2020-06-01T12:00:00+02:00"), "").unwrap();
        assert_eq!(out, json!("2020-06-01T10:00:00.000Z"));
    }

    #[test]
    fn date_accepts_epoch_millis() {
        let schema = FieldSchema::date();
        let out = sanitize(&schema, &json!(0), "").unwrap();
        assert_eq!(out, json!("1970-01-01T00:00:00.000Z"));
    }

    #[test]
    fn date_rejects_explicit_null_even_when_empty_allowed() {
        let schema = FieldSchema::date().allow_empty();
        let err = sanitize(&schema, &json!(null), "when").unwrap_err();
        assert!(matches!(err, CoreError::DataValidation { .. }));
    }

    #[test]
    fn date_null_substitutes_declared_default() {
        let schema = FieldSchema::date().default_value(json!("2020-01-01T00:00:00Z"));
        let out = sanitize(&schema, &json!(null), "when").unwrap();
        assert_eq!(out, json!("2020-01-01T00:00:00.000Z"));
    }

    #[test]
    fn enum_requires_declared_value() {
        let schema = FieldSchema::enumeration(vec![json!("a"), json!("b")]);
        assert_eq!(sanitize(&schema, &json!("a"), "").unwrap(), json!("a"));
        assert!(sanitize(&schema, &json!("c"), "").is_err());
    }

    #[test]
    fn array_sanitizes_each_element() {
        let schema = FieldSchema::array_of(FieldSchema::integer());
        let out = sanitize(&schema, &json!([1, "2", 3.0]), "").unwrap();
        assert_eq!(out, json!([1, 2, 3]));

        let err = sanitize(&schema, &json!([1, "x"]), "nums").unwrap_err();
        assert!(err.to_string().contains("nums[1]"));
    }

    #[test]
    fn object_drops_unlisted_keys() {
        let schema = FieldSchema::object().field("name", FieldSchema::string());
        let out = sanitize(&schema, &json!({"name": "a", "extra": 1}), "").unwrap();
        assert_eq!(out, json!({"name": "a"}));
    }

    #[test]
    fn object_keeps_unlisted_keys_when_configured() {
        let schema = FieldSchema::object()
            .field("name", FieldSchema::string())
            .include_unlisted();
        let out = sanitize(&schema, &json!({"name": "a", "extra": 1}), "").unwrap();
        assert_eq!(out, json!({"name": "a", "extra": 1}));
    }

    #[test]
    fn relation_by_reference_requires_pointer() {
        let schema = FieldSchema::relation(RelationSpec::new("Owner", RelationMode::ByReference));
        let ok = sanitize(&schema, &json!({"id": "Owner_1"}), "").unwrap();
        assert_eq!(ok, json!({"id": "Owner_1"}));
        assert!(sanitize(&schema, &json!({"name": "x"}), "").is_err());
        assert!(sanitize(&schema, &json!("Owner_1"), "").is_err());
    }

    #[test]
    fn relation_embedded_requires_type_tag() {
        let schema = FieldSchema::relation(RelationSpec::new("Owner", RelationMode::Embedded));
        let ok = sanitize(&schema, &json!({"_type": "Owner", "name": "x"}), "").unwrap();
        assert_eq!(ok["_type"], json!("Owner"));
        assert!(sanitize(&schema, &json!({"_type": "Other"}), "").is_err());
        assert!(sanitize(&schema, &json!({"name": "x"}), "").is_err());
    }

    #[test]
    fn sanitize_is_idempotent() {
        let schema = person_schema();
        let input = json!({
            "name": "ada",
            "age": "36",
            "score": "1.5",
            "active": 1,
            "joined": "2020-06-01T12:00:00+02:00",
            "tags": ["a", 1],
        });
        let once = sanitize(&schema, &input, "").unwrap();
        let twice = sanitize(&schema, &once, "").unwrap();
        assert_eq!(once, twice);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn schema() -> FieldSchema {
            FieldSchema::object()
                .field("name", FieldSchema::string())
                .field("age", FieldSchema::integer().allow_empty())
                .field("active", FieldSchema::boolean().default_value(json!(false)))
        }

        proptest! {
            #[test]
            fn idempotent_over_valid_inputs(
                name in "[a-zA-Z]{1,16}",
                age in proptest::option::of(0i64..10_000),
                active in proptest::option::of(any::<bool>()),
            ) {
                let mut input = serde_json::Map::new();
                input.insert("name".into(), json!(name));
                if let Some(age) = age {
                    input.insert("age".into(), json!(age));
                }
                if let Some(active) = active {
                    input.insert("active".into(), json!(active));
                }
                let input = Value::Object(input);

                let once = sanitize(&schema(), &input, "").unwrap();
                let twice = sanitize(&schema(), &once, "").unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
