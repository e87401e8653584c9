//! Schema trees for model data.
//!
//! A [`FieldSchema`] describes one node of a model's data shape: its type,
//! default, emptiness policy, and - for containers - the schemas of its
//! items or children. Schemas are validated once at model registration
//! ([`FieldSchema::validate`]); malformed schemas fail registration with
//! [`CoreError::SchemaValidation`] rather than surfacing per-document.

use crate::error::{CoreError, CoreResult};
use crate::paths;
use serde_json::Value;
use std::collections::BTreeMap;

/// The type of one schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// String-like values, coerced via stringification.
    String,
    /// Base-10 integers; integral floats coerce, fractions reject.
    Integer,
    /// Floating-point numbers.
    Number,
    /// `true`/`false` or the integers `1`/`0`.
    Boolean,
    /// Date values, normalized to ISO-8601 UTC strings.
    Date,
    /// One of a declared list of values.
    Enum,
    /// An array of items sharing one item schema.
    Array,
    /// A plain key/value object with declared child schemas.
    Object,
    /// An association with another model's instances.
    Relation,
}

/// How a relation is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationMode {
    /// Serialized as an id pointer: `{ <idProperty>: "<key string>" }`.
    ByReference,
    /// Serialized as the full nested, type-tagged object graph.
    Embedded,
}

/// Declaration of an association with another model.
///
/// The target is named, not referenced: mutually recursive schemas resolve
/// through the [`crate::ModelManager`] on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    /// Name of the target model.
    pub target: String,
    /// Pointer or embedded serialization.
    pub mode: RelationMode,
    /// Property holding the key string in by-reference form.
    pub id_property: String,
    /// Serialized name of the inner `_id` field in embedded form.
    pub id_field: String,
    /// Serialized name of the inner `_type` field in embedded form.
    pub type_field: String,
}

impl RelationSpec {
    /// Creates a relation spec with default property names.
    #[must_use]
    pub fn new(target: impl Into<String>, mode: RelationMode) -> Self {
        Self {
            target: target.into(),
            mode,
            id_property: "id".to_string(),
            id_field: "_id".to_string(),
            type_field: "_type".to_string(),
        }
    }

    /// Sets the by-reference id property name.
    #[must_use]
    pub fn id_property(mut self, name: impl Into<String>) -> Self {
        self.id_property = name.into();
        self
    }

    /// Sets the serialized names of the embedded `_id`/`_type` fields.
    #[must_use]
    pub fn tag_fields(mut self, id_field: impl Into<String>, type_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self.type_field = type_field.into();
        self
    }
}

/// One node of a model's schema tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    /// The node's type.
    pub field_type: FieldType,
    /// Default substituted for nil values (deep-cloned per document).
    pub default: Option<Value>,
    /// Whether nil values are acceptable after default substitution.
    pub allow_empty: bool,
    /// Object only: keep keys not declared in `children`.
    pub include_unlisted: bool,
    /// Enum only: the declared values.
    pub enum_values: Vec<Value>,
    /// Array only: the item schema.
    pub items: Option<Box<FieldSchema>>,
    /// Object only: declared child schemas by key.
    pub children: BTreeMap<String, FieldSchema>,
    /// Relation only: the association declaration.
    pub relation: Option<RelationSpec>,
}

impl FieldSchema {
    fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            default: None,
            allow_empty: false,
            include_unlisted: false,
            enum_values: Vec::new(),
            items: None,
            children: BTreeMap::new(),
            relation: None,
        }
    }

    /// A string field.
    #[must_use]
    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    /// An integer field.
    #[must_use]
    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    /// A floating-point field.
    #[must_use]
    pub fn number() -> Self {
        Self::of(FieldType::Number)
    }

    /// A boolean field.
    #[must_use]
    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    /// A date field, normalized to ISO-8601 UTC.
    #[must_use]
    pub fn date() -> Self {
        Self::of(FieldType::Date)
    }

    /// An enum field over the declared values.
    #[must_use]
    pub fn enumeration(values: Vec<Value>) -> Self {
        let mut schema = Self::of(FieldType::Enum);
        schema.enum_values = values;
        schema
    }

    /// An array field whose items share `items`.
    #[must_use]
    pub fn array_of(items: FieldSchema) -> Self {
        let mut schema = Self::of(FieldType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    /// An empty object field; add children with [`FieldSchema::field`].
    #[must_use]
    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    /// A relation field.
    #[must_use]
    pub fn relation(spec: RelationSpec) -> Self {
        let mut schema = Self::of(FieldType::Relation);
        schema.relation = Some(spec);
        schema
    }

    /// Declares a child field (object schemas).
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, child: FieldSchema) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Allows nil values for this field.
    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Keeps undeclared keys (object schemas).
    #[must_use]
    pub fn include_unlisted(mut self) -> Self {
        self.include_unlisted = true;
        self
    }

    /// Validates this schema tree.
    ///
    /// Run once at model registration. Checks that every node's
    /// configuration matches its type and that declared defaults pass
    /// their own sanitizers, so malformed schemas fail fast.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaValidation`] naming the offending node.
    pub fn validate(&self) -> CoreResult<()> {
        self.validate_node("")
    }

    fn validate_node(&self, path: &str) -> CoreResult<()> {
        match self.field_type {
            FieldType::Enum => {
                if self.enum_values.is_empty() {
                    return Err(CoreError::schema_validation(
                        path,
                        "enum declares no values",
                    ));
                }
            }
            FieldType::Array => match &self.items {
                Some(items) => items.validate_node(&paths::join(path, "[]"))?,
                None => {
                    return Err(CoreError::schema_validation(
                        path,
                        "array declares no item schema",
                    ));
                }
            },
            FieldType::Object => {
                for (name, child) in &self.children {
                    child.validate_node(&paths::join(path, name))?;
                }
            }
            FieldType::Relation => match &self.relation {
                Some(spec) if !spec.target.is_empty() => {}
                _ => {
                    return Err(CoreError::schema_validation(
                        path,
                        "relation declares no target model",
                    ));
                }
            },
            _ => {}
        }

        if let Some(default) = &self.default {
            if self.field_type != FieldType::Relation {
                crate::sanitize::sanitize(self, default, path).map_err(|e| {
                    CoreError::schema_validation(path, format!("default value rejected: {e}"))
                })?;
            }
        }

        Ok(())
    }
}
