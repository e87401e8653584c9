//! Per-model behavior configuration.

use crate::key::{KeyOptions, DEFAULT_DELIMITER};
use std::time::Duration;

/// How primary keys for a model's documents are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryKeyKind {
    /// Random UUIDv4 ids (the default).
    #[default]
    Uuid,
    /// Monotonic integer ids from a per-model counter document.
    Counter,
}

/// A secondary index maintained as reference documents.
///
/// For every indexed instance a reference document is written whose key
/// joins the index's field values and whose payload is the instance's
/// primary key string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Name of the index, unique within the model.
    pub name: String,
    /// Field paths whose values form the reference key, in order.
    pub fields: Vec<String>,
    /// Whether an instance missing any indexed value fails the write.
    /// Optional indexes simply skip the reference document instead.
    pub required: bool,
}

impl IndexSpec {
    /// Creates a required index over the given field paths, named after
    /// them (`"email_realm"` for fields `email`, `realm`).
    #[must_use]
    pub fn on(fields: Vec<String>) -> Self {
        let name = fields.join("_");
        Self {
            name,
            fields,
            required: true,
        }
    }

    /// Creates a required single-field index.
    #[must_use]
    pub fn on_field(field: impl Into<String>) -> Self {
        Self::on(vec![field.into()])
    }

    /// Overrides the index name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Marks the index optional: instances without the indexed values are
    /// stored without a reference document.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Primary key layout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    /// Generation strategy.
    pub kind: PrimaryKeyKind,
    /// Key prefix; defaults to the model name when `None`.
    pub prefix: Option<String>,
    /// Delimiter between key parts.
    pub delimiter: String,
    /// Optional static suffix.
    pub postfix: Option<String>,
    /// When false, ids are lowercased before use.
    pub case_sensitive: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            kind: PrimaryKeyKind::Uuid,
            prefix: None,
            delimiter: DEFAULT_DELIMITER.to_string(),
            postfix: None,
            case_sensitive: true,
        }
    }
}

impl KeyConfig {
    /// Uses counter-generated ids.
    #[must_use]
    pub fn counter(mut self) -> Self {
        self.kind = PrimaryKeyKind::Counter;
        self
    }

    /// Overrides the key prefix (defaults to the model name).
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the delimiter between key parts.
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Sets a static key suffix.
    #[must_use]
    pub fn postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = Some(postfix.into());
        self
    }

    /// Lowercases ids before use.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub(crate) fn key_options(&self, model_name: &str) -> KeyOptions {
        let mut options =
            KeyOptions::new(self.prefix.clone().unwrap_or_else(|| model_name.to_string()))
                .delimiter(self.delimiter.clone());
        if let Some(postfix) = &self.postfix {
            options = options.postfix(postfix.clone());
        }
        if !self.case_sensitive {
            options = options.case_insensitive();
        }
        options
    }
}

/// Behavior configuration for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Primary key layout and generation.
    pub key: KeyConfig,
    /// Secondary indexes maintained as reference documents.
    pub indexes: Vec<IndexSpec>,
    /// Maintain creation/update timestamps on instance data.
    pub timestamps: bool,
    /// Use camelCase timestamp field names (`createdAt`) instead of
    /// snake_case (`created_at`).
    pub camel_case: bool,
    /// Soft-delete: destroy marks instances deleted instead of removing
    /// them, and reads skip marked instances.
    pub paranoid: bool,
    /// Default time-to-live applied to every stored document.
    pub ttl: Option<Duration>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            key: KeyConfig::default(),
            indexes: Vec::new(),
            timestamps: true,
            camel_case: false,
            paranoid: false,
            ttl: None,
        }
    }
}

impl ModelConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the primary key configuration.
    #[must_use]
    pub fn key(mut self, key: KeyConfig) -> Self {
        self.key = key;
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Enables or disables timestamp maintenance.
    #[must_use]
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Uses camelCase timestamp field names.
    #[must_use]
    pub fn camel_case(mut self) -> Self {
        self.camel_case = true;
        self
    }

    /// Enables soft-delete.
    #[must_use]
    pub fn paranoid(mut self) -> Self {
        self.paranoid = true;
        self
    }

    /// Sets a default time-to-live for stored documents.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub(crate) fn created_field(&self) -> &'static str {
        if self.camel_case {
            "createdAt"
        } else {
            "created_at"
        }
    }

    pub(crate) fn updated_field(&self) -> &'static str {
        if self.camel_case {
            "updatedAt"
        } else {
            "updated_at"
        }
    }

    pub(crate) fn deleted_field(&self) -> &'static str {
        if self.camel_case {
            "deletedAt"
        } else {
            "deleted_at"
        }
    }
}
