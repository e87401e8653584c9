//! Composite string keys for documents.
//!
//! A [`Key`] renders to `prefix + delimiter + id [+ delimiter + postfix]`
//! and parses back from that form. Three kinds exist:
//!
//! - [`KeyKind::Uuid`] - random UUIDv4 ids, generated with no I/O
//! - [`KeyKind::Counter`] - monotonic integer ids from an atomic counter
//!   document in the backend
//! - [`KeyKind::RefDoc`] - composite ids joined from indexed field values
//!   of the owning document; these keys additionally embed the joined
//!   field *names* between prefix and id so two indexes on the same model
//!   can never collide
//!
//! Once an id is assigned the key is generated and immutable for that
//! logical document version; [`Key::clone`] yields an independent copy
//! carrying the same options.

use crate::error::{CoreError, CoreResult};
use crate::paths;
use casdoc_storage::KvBackend;
use serde_json::Value;
use uuid::{Uuid, Variant};

/// Default delimiter between key parts.
pub const DEFAULT_DELIMITER: &str = "_";

/// Static formatting options shared by all key kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOptions {
    /// Static prefix, usually the model name.
    pub prefix: String,
    /// Delimiter between key parts.
    pub delimiter: String,
    /// Optional static suffix.
    pub postfix: Option<String>,
    /// When false, ids are lowercased before use.
    pub case_sensitive: bool,
}

impl KeyOptions {
    /// Creates options with the given prefix and defaults for the rest.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            postfix: None,
            case_sensitive: true,
        }
    }

    /// Sets the delimiter.
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Sets the static postfix.
    #[must_use]
    pub fn postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = Some(postfix.into());
        self
    }

    /// Makes ids case-insensitive (lowercased).
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

/// The kind of a key, determining its id grammar and generation strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// Random UUIDv4 id.
    Uuid,
    /// Monotonic integer id from a named counter document.
    Counter,
    /// Composite id joined from indexed field values of the owner.
    RefDoc {
        /// Name of the index this key belongs to.
        index: String,
        /// Field paths whose values form the id, in declared order.
        fields: Vec<String>,
    },
}

/// A composite string key identifying one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    kind: KeyKind,
    options: KeyOptions,
    id: Option<String>,
}

impl Key {
    /// Creates an ungenerated UUID key.
    #[must_use]
    pub fn uuid(options: KeyOptions) -> Self {
        Self {
            kind: KeyKind::Uuid,
            options,
            id: None,
        }
    }

    /// Creates an ungenerated counter key.
    #[must_use]
    pub fn counter(options: KeyOptions) -> Self {
        Self {
            kind: KeyKind::Counter,
            options,
            id: None,
        }
    }

    /// Creates an ungenerated reference-document key for an index.
    #[must_use]
    pub fn ref_doc(
        options: KeyOptions,
        index: impl Into<String>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            kind: KeyKind::RefDoc {
                index: index.into(),
                fields,
            },
            options,
            id: None,
        }
    }

    /// Returns the key kind.
    #[must_use]
    pub fn kind(&self) -> &KeyKind {
        &self.kind
    }

    /// Returns the formatting options.
    #[must_use]
    pub fn options(&self) -> &KeyOptions {
        &self.options
    }

    /// Returns the id, if generated.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns `true` once an id has been assigned.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.id.is_some()
    }

    /// Assigns an id, validating it against this kind's grammar.
    ///
    /// An empty id clears the key back to ungenerated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] when the id violates the grammar.
    pub fn set_id(&mut self, id: &str) -> CoreResult<()> {
        if id.is_empty() {
            self.id = None;
            return Ok(());
        }
        let id = if self.options.case_sensitive {
            id.to_string()
        } else {
            id.to_lowercase()
        };
        self.validate_id(&id)?;
        self.id = Some(id);
        Ok(())
    }

    /// Produces and assigns the id.
    ///
    /// - UUID keys draw a random v4, no I/O.
    /// - Counter keys atomically increment the `<prefix><delim>counter`
    ///   document in the backend (created at 1 when absent).
    /// - RefDoc keys join, in declared order, the stringified values found
    ///   at each field path on `owner`.
    ///
    /// A key that is already generated is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingIndexValue`] when a RefDoc field
    /// resolves to an empty value (recoverable for optional indexes), or a
    /// storage error from the counter round-trip.
    pub fn generate(&mut self, owner: &Value, backend: &dyn KvBackend) -> CoreResult<()> {
        if self.id.is_some() {
            return Ok(());
        }
        let id = match &self.kind {
            KeyKind::Uuid => Uuid::new_v4().to_string(),
            KeyKind::Counter => {
                let counter_key = format!(
                    "{}{}counter",
                    self.options.prefix, self.options.delimiter
                );
                backend.counter(&counter_key, 1, 1)?.to_string()
            }
            KeyKind::RefDoc { index, fields } => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    parts.push(index_value(owner, index, field)?);
                }
                parts.join(&self.options.delimiter)
            }
        };
        let id = if self.options.case_sensitive {
            id
        } else {
            id.to_lowercase()
        };
        self.id = Some(id);
        Ok(())
    }

    /// Renders the full key string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] when the id has not been generated yet.
    pub fn render(&self) -> CoreResult<String> {
        let id = self.id.as_deref().ok_or_else(|| {
            CoreError::key(format!(
                "key for prefix {} has no generated id",
                self.options.prefix
            ))
        })?;
        let d = &self.options.delimiter;
        let mut out = String::new();
        out.push_str(&self.options.prefix);
        out.push_str(d);
        if let KeyKind::RefDoc { fields, .. } = &self.kind {
            out.push_str(&fields.join(d));
            out.push_str(d);
        }
        out.push_str(id);
        if let Some(postfix) = &self.options.postfix {
            out.push_str(d);
            out.push_str(postfix);
        }
        Ok(out)
    }

    /// Parses a full key string, the strict inverse of [`Key::render`].
    ///
    /// Returns a new key carrying the same kind and options with the
    /// extracted id assigned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] when the string does not match this
    /// key's layout or the extracted id violates the grammar.
    pub fn parse(&self, s: &str) -> CoreResult<Key> {
        let d = &self.options.delimiter;
        let mut head = format!("{}{}", self.options.prefix, d);
        if let KeyKind::RefDoc { fields, .. } = &self.kind {
            head.push_str(&fields.join(d));
            head.push_str(d);
        }
        let rest = s
            .strip_prefix(&head)
            .ok_or_else(|| CoreError::key(format!("key {s} does not start with {head}")))?;
        let id = match &self.options.postfix {
            Some(postfix) => {
                let tail = format!("{d}{postfix}");
                rest.strip_suffix(&tail).ok_or_else(|| {
                    CoreError::key(format!("key {s} does not end with {tail}"))
                })?
            }
            None => rest,
        };
        if id.is_empty() {
            return Err(CoreError::key(format!("key {s} has an empty id")));
        }
        self.validate_id(id)?;
        let mut parsed = self.clone();
        parsed.id = Some(id.to_string());
        Ok(parsed)
    }

    fn validate_id(&self, id: &str) -> CoreResult<()> {
        match &self.kind {
            KeyKind::Uuid => {
                let parsed = Uuid::parse_str(id)
                    .map_err(|_| CoreError::key(format!("{id} is not a UUID")))?;
                let version = parsed.get_version_num();
                if parsed.get_variant() != Variant::RFC4122 || !(1..=5).contains(&version) {
                    return Err(CoreError::key(format!("{id} is not an RFC 4122 UUID")));
                }
                // Canonical UUIDs are lowercase hyphenated.
                if id != parsed.hyphenated().to_string() {
                    return Err(CoreError::key(format!("{id} is not in canonical form")));
                }
                Ok(())
            }
            KeyKind::Counter => {
                if !id.is_empty()
                    && id.bytes().all(|b| b.is_ascii_digit())
                    && id.parse::<u64>().is_ok()
                {
                    Ok(())
                } else {
                    Err(CoreError::key(format!("{id} is not a counter value")))
                }
            }
            KeyKind::RefDoc { .. } => {
                if id.is_empty() {
                    Err(CoreError::key("reference key id is empty".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Stringifies one indexed field value off the owner's data.
fn index_value(owner: &Value, index: &str, field: &str) -> CoreResult<String> {
    match paths::lookup(owner, field) {
        None | Some(Value::Null) => Err(CoreError::missing_index_value(index, field)),
        Some(Value::String(s)) if s.is_empty() => {
            Err(CoreError::missing_index_value(index, field))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(_) => Err(CoreError::key(format!(
            "field {field} of index {index} is not a scalar"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casdoc_storage::InMemoryBackend;
    use serde_json::json;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new()
    }

    #[test]
    fn uuid_generate_produces_v4() {
        let mut key = Key::uuid(KeyOptions::new("Test"));
        key.generate(&Value::Null, &backend()).unwrap();

        let id = key.id().unwrap();
        let parsed = Uuid::parse_str(id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(parsed.get_variant(), Variant::RFC4122);
    }

    #[test]
    fn uuid_render_and_parse_roundtrip() {
        let mut key = Key::uuid(KeyOptions::new("Test"));
        key.generate(&Value::Null, &backend()).unwrap();

        let rendered = key.render().unwrap();
        assert!(rendered.starts_with("Test_"));

        let parsed = Key::uuid(KeyOptions::new("Test")).parse(&rendered).unwrap();
        assert_eq!(parsed.id(), key.id());
    }

    #[test]
    fn uuid_parse_rejects_bad_shape() {
        let key = Key::uuid(KeyOptions::new("Test"));
        assert!(key.parse("Test_not-a-uuid").is_err());
        assert!(key.parse("Other_9e107d9d-4ca9-4ae5-89b9-ce1c60b1d1b7").is_err());
    }

    #[test]
    fn generated_key_is_immutable() {
        let mut key = Key::uuid(KeyOptions::new("Test"));
        key.generate(&Value::Null, &backend()).unwrap();
        let first = key.id().unwrap().to_string();
        key.generate(&Value::Null, &backend()).unwrap();
        assert_eq!(key.id().unwrap(), first);
    }

    #[test]
    fn set_id_validates_grammar() {
        let mut key = Key::uuid(KeyOptions::new("Test"));
        assert!(key.set_id("92d64e03-b1a5-4d5c-9b1a-6d1a2e3f4a5b").is_ok());
        assert!(key.is_generated());
        assert!(key.set_id("nope").is_err());
    }

    #[test]
    fn set_id_empty_clears() {
        let mut key = Key::counter(KeyOptions::new("Test"));
        key.set_id("7").unwrap();
        key.set_id("").unwrap();
        assert!(!key.is_generated());
        assert!(key.render().is_err());
    }

    #[test]
    fn counter_generate_increments_backend() {
        let backend = backend();
        let mut first = Key::counter(KeyOptions::new("Post"));
        first.generate(&Value::Null, &backend).unwrap();
        assert_eq!(first.id(), Some("1"));

        let mut second = Key::counter(KeyOptions::new("Post"));
        second.generate(&Value::Null, &backend).unwrap();
        assert_eq!(second.id(), Some("2"));

        assert_eq!(backend.raw("Post_counter").unwrap(), b"2");
    }

    #[test]
    fn counter_parse_rejects_non_digits() {
        let key = Key::counter(KeyOptions::new("Post"));
        assert!(key.parse("Post_12").is_ok());
        assert!(key.parse("Post_12a").is_err());
        assert!(key.parse("Post_-3").is_err());
    }

    #[test]
    fn refdoc_generate_joins_field_values() {
        let mut key = Key::ref_doc(
            KeyOptions::new("Client"),
            "name",
            vec!["name".to_string()],
        );
        key.generate(&json!({"name": "test"}), &backend()).unwrap();
        assert_eq!(key.render().unwrap(), "Client_name_test");
    }

    #[test]
    fn refdoc_multi_field_embeds_names_and_values() {
        let mut key = Key::ref_doc(
            KeyOptions::new("User"),
            "email_realm",
            vec!["email".to_string(), "realm".to_string()],
        );
        key.generate(&json!({"email": "a@b.c", "realm": "eu"}), &backend())
            .unwrap();
        assert_eq!(key.render().unwrap(), "User_email_realm_a@b.c_eu");
    }

    #[test]
    fn refdoc_missing_field_is_recoverable_error() {
        let mut key = Key::ref_doc(
            KeyOptions::new("Client"),
            "name",
            vec!["name".to_string()],
        );
        let err = key.generate(&json!({}), &backend()).unwrap_err();
        assert!(matches!(err, CoreError::MissingIndexValue { .. }));
        assert!(!key.is_generated());
    }

    #[test]
    fn refdoc_empty_string_counts_as_missing() {
        let mut key = Key::ref_doc(
            KeyOptions::new("Client"),
            "name",
            vec!["name".to_string()],
        );
        let err = key.generate(&json!({"name": ""}), &backend()).unwrap_err();
        assert!(matches!(err, CoreError::MissingIndexValue { .. }));
    }

    #[test]
    fn refdoc_numeric_and_bool_values_stringify() {
        let mut key = Key::ref_doc(
            KeyOptions::new("Flag"),
            "n_b",
            vec!["n".to_string(), "b".to_string()],
        );
        key.generate(&json!({"n": 7, "b": true}), &backend()).unwrap();
        assert_eq!(key.render().unwrap(), "Flag_n_b_7_true");
    }

    #[test]
    fn case_insensitive_lowercases_id() {
        let mut key = Key::ref_doc(
            KeyOptions::new("Client").case_insensitive(),
            "name",
            vec!["name".to_string()],
        );
        key.generate(&json!({"name": "TeSt"}), &backend()).unwrap();
        assert_eq!(key.render().unwrap(), "Client_name_test");
    }

    #[test]
    fn postfix_renders_and_parses() {
        let mut key = Key::counter(KeyOptions::new("Job").postfix("v2"));
        key.set_id("12").unwrap();
        let rendered = key.render().unwrap();
        assert_eq!(rendered, "Job_12_v2");

        let parsed = Key::counter(KeyOptions::new("Job").postfix("v2"))
            .parse(&rendered)
            .unwrap();
        assert_eq!(parsed.id(), Some("12"));

        // Missing postfix rejected.
        assert!(Key::counter(KeyOptions::new("Job").postfix("v2"))
            .parse("Job_12")
            .is_err());
    }

    #[test]
    fn refdoc_parse_requires_field_names_segment() {
        let template = Key::ref_doc(
            KeyOptions::new("Client"),
            "name",
            vec!["name".to_string()],
        );
        let parsed = template.parse("Client_name_test").unwrap();
        assert_eq!(parsed.id(), Some("test"));

        // A key for a different index on the same model never matches.
        let other = Key::ref_doc(
            KeyOptions::new("Client"),
            "email",
            vec!["email".to_string()],
        );
        assert!(other.parse("Client_name_test").is_err());
    }

    #[test]
    fn clone_is_independent() {
        let mut key = Key::counter(KeyOptions::new("Post"));
        let copy = key.clone();
        key.set_id("5").unwrap();
        assert!(key.is_generated());
        assert!(!copy.is_generated());
        assert_eq!(copy.options(), key.options());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn counter_roundtrip(id in 1u64..u64::MAX) {
                let mut key = Key::counter(KeyOptions::new("Seq"));
                key.set_id(&id.to_string()).unwrap();
                let rendered = key.render().unwrap();
                let parsed = Key::counter(KeyOptions::new("Seq")).parse(&rendered).unwrap();
                prop_assert_eq!(parsed.id(), key.id());
            }

            #[test]
            fn refdoc_roundtrip(value in "[a-z0-9@.]{1,24}") {
                let mut key = Key::ref_doc(
                    KeyOptions::new("Client"),
                    "name",
                    vec!["name".to_string()],
                );
                key.generate(&serde_json::json!({"name": value}), &InMemoryBackend::new()).unwrap();
                let rendered = key.render().unwrap();
                let template = Key::ref_doc(
                    KeyOptions::new("Client"),
                    "name",
                    vec!["name".to_string()],
                );
                let parsed = template.parse(&rendered).unwrap();
                prop_assert_eq!(parsed.id(), key.id());
            }

            #[test]
            fn uuid_roundtrip(_seed in any::<u8>()) {
                let mut key = Key::uuid(KeyOptions::new("Test"));
                key.generate(&Value::Null, &InMemoryBackend::new()).unwrap();
                let rendered = key.render().unwrap();
                let parsed = Key::uuid(KeyOptions::new("Test")).parse(&rendered).unwrap();
                prop_assert_eq!(parsed.id(), key.id());
            }
        }
    }
}
