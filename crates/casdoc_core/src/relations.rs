//! Association normalization.
//!
//! In-memory instance data carries associations in canonical form:
//! by-reference values as `{ <idProperty>: "<key string>" }` pointers and
//! embedded values as type-tagged objects using the reserved `_id`/`_type`
//! names. This module lifts loose build input into that form and renames
//! the embedded tag fields when a relation declares custom serialized
//! names.

use crate::error::CoreResult;
use crate::model::ModelManager;
use crate::schema::{FieldSchema, FieldType, RelationMode};
use serde_json::{Map, Value};

/// Which way embedded tag fields are being renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagDirection {
    /// Canonical `_id`/`_type` to the relation's serialized names.
    Encode,
    /// Serialized names back to canonical `_id`/`_type`.
    Decode,
}

/// Normalizes association values in build input.
///
/// - A bare key string for a by-reference relation becomes a pointer
///   object.
/// - An embedded object gains its `_type` tag when absent and has custom
///   tag names folded back to `_id`/`_type`.
/// - Each relation's target model is resolved through the manager, so an
///   association to an unregistered model fails the build.
///
/// Values that do not look like associations are left for the sanitizer
/// to reject with a proper path.
pub(crate) fn lift(
    schema: &FieldSchema,
    value: &mut Value,
    manager: &ModelManager,
) -> CoreResult<()> {
    match schema.field_type {
        FieldType::Object => {
            if let Value::Object(map) = value {
                for (name, child) in &schema.children {
                    if let Some(slot) = map.get_mut(name) {
                        lift(child, slot, manager)?;
                    }
                }
            }
            Ok(())
        }
        FieldType::Array => {
            if let (Some(items), Value::Array(entries)) = (&schema.items, &mut *value) {
                for entry in entries {
                    lift(items, entry, manager)?;
                }
            }
            Ok(())
        }
        FieldType::Relation => lift_relation(schema, value, manager),
        _ => Ok(()),
    }
}

fn lift_relation(
    schema: &FieldSchema,
    value: &mut Value,
    manager: &ModelManager,
) -> CoreResult<()> {
    let Some(spec) = &schema.relation else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    // Unregistered targets fail here rather than at first traversal.
    manager.get(&spec.target)?;

    match spec.mode {
        RelationMode::ByReference => {
            if let Value::String(key) = value {
                let mut pointer = Map::new();
                pointer.insert(spec.id_property.clone(), Value::String(std::mem::take(key)));
                *value = Value::Object(pointer);
            }
        }
        RelationMode::Embedded => {
            if let Value::Object(map) = value {
                rename(map, &spec.id_field, "_id");
                rename(map, &spec.type_field, "_type");
                map.entry("_type".to_string())
                    .or_insert_with(|| Value::String(spec.target.clone()));
            }
        }
    }
    Ok(())
}

/// Renames embedded tag fields across a value tree for storage encoding
/// or decoding. Relations with the default tag names are untouched.
pub(crate) fn apply_tags(schema: &FieldSchema, value: &mut Value, direction: TagDirection) {
    match schema.field_type {
        FieldType::Object => {
            if let Value::Object(map) = value {
                for (name, child) in &schema.children {
                    if let Some(slot) = map.get_mut(name) {
                        apply_tags(child, slot, direction);
                    }
                }
            }
        }
        FieldType::Array => {
            if let (Some(items), Value::Array(entries)) = (&schema.items, &mut *value) {
                for entry in entries {
                    apply_tags(items, entry, direction);
                }
            }
        }
        FieldType::Relation => {
            let Some(spec) = &schema.relation else { return };
            if spec.mode != RelationMode::Embedded {
                return;
            }
            if let Value::Object(map) = value {
                match direction {
                    TagDirection::Encode => {
                        rename(map, "_id", &spec.id_field);
                        rename(map, "_type", &spec.type_field);
                    }
                    TagDirection::Decode => {
                        rename(map, &spec.id_field, "_id");
                        rename(map, &spec.type_field, "_type");
                    }
                }
            }
        }
        _ => {}
    }
}

fn rename(map: &mut Map<String, Value>, from: &str, to: &str) {
    if from == to {
        return;
    }
    if let Some(v) = map.remove(from) {
        map.insert(to.to_string(), v);
    }
}
