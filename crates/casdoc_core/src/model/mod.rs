//! Models: named schemas bound to a backend.
//!
//! A [`Model`] ties together a name, a schema tree, behavior
//! configuration, and a hook registry, and is the factory for
//! [`Instance`]s. Models are created through [`ModelManager::register`]
//! and shared as `Arc<Model>`.

mod config;
mod manager;

pub use config::{IndexSpec, KeyConfig, ModelConfig, PrimaryKeyKind};
pub use manager::ModelManager;

use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::hooks::Hooks;
use crate::instance::Instance;
use crate::key::{Key, KeyOptions};
use crate::relations::{self, TagDirection};
use crate::sanitize;
use crate::schema::{FieldSchema, FieldType};
use casdoc_storage::{Cas, KvBackend};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Options for [`Model::build`] and [`Model::create`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Explicit id to assign instead of generating one at insert.
    pub id: Option<String>,
    /// Run the sanitizer over the input (on by default).
    pub sanitize: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            id: None,
            sanitize: true,
        }
    }
}

impl BuildOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Skips sanitization of the build input.
    #[must_use]
    pub fn skip_sanitize(mut self) -> Self {
        self.sanitize = false;
        self
    }
}

/// Options for reads.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Refresh the document's expiry while reading.
    pub touch: Option<Duration>,
    /// Take a write lock on the document while reading.
    pub lock: Option<Duration>,
    /// Under soft-delete, return marked instances instead of hiding them.
    pub with_deleted: bool,
}

impl GetOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes the document's expiry while reading.
    #[must_use]
    pub fn touch(mut self, expiry: Duration) -> Self {
        self.touch = Some(expiry);
        self
    }

    /// Takes a write lock on the document while reading.
    #[must_use]
    pub fn lock(mut self, lock_time: Duration) -> Self {
        self.lock = Some(lock_time);
        self
    }

    /// Includes soft-deleted instances.
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }
}

/// A named document model.
pub struct Model {
    name: String,
    schema: FieldSchema,
    config: ModelConfig,
    hooks: Hooks,
    backend: Arc<dyn KvBackend>,
    manager: Weak<ModelManager>,
}

impl Model {
    pub(crate) fn new(
        name: String,
        schema: FieldSchema,
        config: ModelConfig,
        backend: Arc<dyn KvBackend>,
        manager: Weak<ModelManager>,
    ) -> Self {
        Self {
            name,
            schema,
            config,
            hooks: Hooks::new(),
            backend,
            manager,
        }
    }

    /// Returns the model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the schema tree.
    #[must_use]
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Returns the behavior configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Returns the hook registry.
    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Returns the owning manager.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the manager was dropped.
    pub fn manager(&self) -> CoreResult<Arc<ModelManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| CoreError::invalid_operation("model manager was dropped"))
    }

    pub(crate) fn key_options(&self) -> KeyOptions {
        self.config.key.key_options(&self.name)
    }

    /// Returns an ungenerated primary key for this model.
    #[must_use]
    pub fn primary_key(&self) -> Key {
        match self.config.key.kind {
            PrimaryKeyKind::Uuid => Key::uuid(self.key_options()),
            PrimaryKeyKind::Counter => Key::counter(self.key_options()),
        }
    }

    pub(crate) fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.config.indexes.iter().find(|i| i.name == name)
    }

    pub(crate) fn index_key(&self, index: &IndexSpec) -> Key {
        Key::ref_doc(self.key_options(), index.name.clone(), index.fields.clone())
    }

    /// Builds an unsaved instance from loose input.
    ///
    /// Association values are lifted to canonical form and the input runs
    /// through the sanitizer (unless disabled). The instance is in-memory
    /// only; call [`Instance::insert`] or use [`Model::create`].
    ///
    /// # Errors
    ///
    /// Returns sanitizer, key grammar, or association resolution errors.
    pub fn build(self: &Arc<Self>, data: Value, options: BuildOptions) -> CoreResult<Instance> {
        let mut data = data;
        if self.schema.field_type == FieldType::Object && !data.is_object() {
            return Err(CoreError::data_validation("", "model data must be an object"));
        }
        let manager = self.manager()?;
        relations::lift(&self.schema, &mut data, &manager)?;

        let mut key = self.primary_key();
        if let Some(id) = &options.id {
            key.set_id(id)?;
        }
        if options.sanitize {
            data = sanitize::sanitize(&self.schema, &data, "")?;
        }

        let mut doc = Document::new(key, data, Arc::clone(&self.backend));
        doc.set_ttl(self.config.ttl);
        Ok(Instance::new(Arc::clone(self), doc))
    }

    /// Builds and inserts in one step.
    ///
    /// # Errors
    ///
    /// Build errors, or any insert error (see [`Instance::insert`]).
    pub fn create(self: &Arc<Self>, data: Value, options: BuildOptions) -> CoreResult<Instance> {
        let mut instance = self.build(data, options)?;
        instance.insert()?;
        Ok(instance)
    }

    /// Fetches an instance by id.
    ///
    /// Returns `Ok(None)` when absent, or - under soft-delete - when the
    /// instance is marked deleted and `with_deleted` is not set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] for an id violating the model's key
    /// grammar, or storage/decode errors.
    pub fn get_by_id(
        self: &Arc<Self>,
        id: &str,
        options: &GetOptions,
    ) -> CoreResult<Option<Instance>> {
        let mut key = self.primary_key();
        key.set_id(id)?;
        let rendered = key.render()?;
        self.fetch(key, &rendered, options)
    }

    /// Like [`Model::get_by_id`], but absence is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] when the instance is
    /// absent or hidden by soft-delete.
    pub fn get_by_id_or_fail(
        self: &Arc<Self>,
        id: &str,
        options: &GetOptions,
    ) -> CoreResult<Instance> {
        let mut key = self.primary_key();
        key.set_id(id)?;
        let rendered = key.render()?;
        self.fetch(key, &rendered, options)?
            .ok_or_else(|| CoreError::document_not_found(rendered))
    }

    /// Fetches many instances by id in one call.
    ///
    /// Absent ids yield `None` in the result. Storage failures do not
    /// short-circuit: the remaining ids are still fetched and the
    /// failures are aggregated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StorageMulti`] carrying every failing key
    /// with its error, or a key grammar/decode error.
    pub fn get_multi(self: &Arc<Self>, ids: &[&str]) -> CoreResult<Vec<Option<Instance>>> {
        let mut out = Vec::with_capacity(ids.len());
        let mut errors = Vec::new();
        for id in ids {
            let mut key = self.primary_key();
            key.set_id(id)?;
            let rendered = key.render()?;
            match self.backend.get(&rendered) {
                Ok(got) => {
                    let instance = self.load(key, &got.value, got.cas)?;
                    if self.config.paranoid && instance.is_soft_deleted() {
                        out.push(None);
                    } else {
                        out.push(Some(instance));
                    }
                }
                Err(e) if e.is_not_found() => out.push(None),
                Err(e) => {
                    errors.push((rendered, e));
                    out.push(None);
                }
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(CoreError::StorageMulti { errors })
        }
    }

    /// Resolves an instance through a secondary index.
    ///
    /// Reads the reference document keyed by the joined `values`, then
    /// fetches the primary document its payload points at. Returns
    /// `Ok(None)` when either document is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for an undeclared index
    /// name, or key/storage/decode errors.
    pub fn find_by_index(
        self: &Arc<Self>,
        index: &str,
        values: &[&str],
    ) -> CoreResult<Option<Instance>> {
        let spec = self.index(index).ok_or_else(|| {
            CoreError::invalid_operation(format!("model {} has no index {index}", self.name))
        })?;
        let mut ref_key = self.index_key(spec);
        ref_key.set_id(&values.join(&self.key_options().delimiter))?;
        let rendered_ref = ref_key.render()?;

        let payload = match self.backend.get(&rendered_ref) {
            Ok(got) => got.value,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(CoreError::document_storage(rendered_ref, e)),
        };
        let primary_str = String::from_utf8(payload).map_err(|_| {
            CoreError::key(format!(
                "reference document {rendered_ref} holds a non-UTF-8 payload"
            ))
        })?;
        let primary = self.primary_key().parse(&primary_str)?;
        self.fetch(primary, &primary_str, &GetOptions::default())
    }

    fn fetch(
        self: &Arc<Self>,
        key: Key,
        rendered: &str,
        options: &GetOptions,
    ) -> CoreResult<Option<Instance>> {
        let result = if let Some(lock_time) = options.lock {
            self.backend.get_and_lock(rendered, lock_time)
        } else if let Some(expiry) = options.touch {
            self.backend.get_and_touch(rendered, expiry)
        } else {
            self.backend.get(rendered)
        };
        let got = match result {
            Ok(got) => got,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(CoreError::document_storage(rendered.to_string(), e)),
        };
        let instance = self.load(key, &got.value, got.cas)?;
        if self.config.paranoid && !options.with_deleted && instance.is_soft_deleted() {
            return Ok(None);
        }
        Ok(Some(instance))
    }

    /// Reconstructs an instance from stored bytes.
    pub(crate) fn load(
        self: &Arc<Self>,
        key: Key,
        bytes: &[u8],
        cas: Cas,
    ) -> CoreResult<Instance> {
        let mut data: Value = serde_json::from_slice(bytes)?;
        if let Value::Object(map) = &mut data {
            map.remove("_id");
            map.remove("_type");
        }
        relations::apply_tags(&self.schema, &mut data, TagDirection::Decode);
        let mut doc = Document::from_storage(key, data, cas, Arc::clone(&self.backend));
        doc.set_ttl(self.config.ttl);
        Ok(Instance::new(Arc::clone(self), doc))
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("indexes", &self.config.indexes.len())
            .field("paranoid", &self.config.paranoid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casdoc_storage::InMemoryBackend;
    use serde_json::json;

    fn manager() -> Arc<ModelManager> {
        ModelManager::new(Arc::new(InMemoryBackend::new()))
    }

    fn client_schema() -> FieldSchema {
        FieldSchema::object()
            .field("name", FieldSchema::string())
            .field("notes", FieldSchema::string().allow_empty())
    }

    #[test]
    fn build_sanitizes_and_snapshots() {
        let manager = manager();
        let model = manager
            .register("Client", client_schema(), ModelConfig::new())
            .unwrap();

        let instance = model
            .build(json!({"name": 42, "stray": true}), BuildOptions::new())
            .unwrap();
        assert!(instance.is_new());
        assert_eq!(instance.get("name"), Some(&json!("42")));
        assert_eq!(instance.get("stray"), None);
        assert_eq!(instance.original(), Some(instance.data()));
    }

    #[test]
    fn build_rejects_non_object_data() {
        let manager = manager();
        let model = manager
            .register("Client", client_schema(), ModelConfig::new())
            .unwrap();
        assert!(model.build(json!([1, 2]), BuildOptions::new()).is_err());
    }

    #[test]
    fn build_with_explicit_id_validates_grammar() {
        let manager = manager();
        let model = manager
            .register("Client", client_schema(), ModelConfig::new())
            .unwrap();

        let ok = model.build(
            json!({"name": "a"}),
            BuildOptions::new().with_id("92d64e03-b1a5-4d5c-9b1a-6d1a2e3f4a5b"),
        );
        assert!(ok.is_ok());

        let bad = model.build(json!({"name": "a"}), BuildOptions::new().with_id("nope"));
        assert!(bad.is_err());
    }

    #[test]
    fn get_by_id_roundtrip() {
        let manager = manager();
        let model = manager
            .register("Client", client_schema(), ModelConfig::new())
            .unwrap();

        let created = model
            .create(json!({"name": "test"}), BuildOptions::new())
            .unwrap();
        let id = created.id().unwrap().to_string();

        let fetched = model
            .get_by_id(&id, &GetOptions::new())
            .unwrap()
            .expect("stored instance");
        assert_eq!(fetched.get("name"), Some(&json!("test")));
        assert_eq!(fetched.id(), Some(id.as_str()));
        assert!(fetched.cas().is_some());
        // Stored virtuals do not leak into live data.
        assert_eq!(fetched.get("_id"), None);
        assert_eq!(fetched.get("_type"), None);
    }

    #[test]
    fn get_by_id_absent_is_none() {
        let manager = manager();
        let model = manager
            .register("Client", client_schema(), ModelConfig::new())
            .unwrap();
        let absent = model
            .get_by_id("92d64e03-b1a5-4d5c-9b1a-6d1a2e3f4a5b", &GetOptions::new())
            .unwrap();
        assert!(absent.is_none());

        let err = model
            .get_by_id_or_fail("92d64e03-b1a5-4d5c-9b1a-6d1a2e3f4a5b", &GetOptions::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::DocumentNotFound { .. }));
    }

    #[test]
    fn get_by_id_bad_grammar_is_an_error() {
        let manager = manager();
        let model = manager
            .register("Client", client_schema(), ModelConfig::new())
            .unwrap();
        assert!(matches!(
            model.get_by_id("not-a-uuid", &GetOptions::new()),
            Err(CoreError::Key { .. })
        ));
    }

    #[test]
    fn get_multi_mixes_hits_and_misses() {
        let manager = manager();
        let model = manager
            .register(
                "Post",
                client_schema(),
                ModelConfig::new().key(KeyConfig::default().counter()),
            )
            .unwrap();

        model.create(json!({"name": "a"}), BuildOptions::new()).unwrap();
        model.create(json!({"name": "b"}), BuildOptions::new()).unwrap();

        let got = model.get_multi(&["1", "9", "2"]).unwrap();
        assert_eq!(got.len(), 3);
        assert!(got[0].is_some());
        assert!(got[1].is_none());
        assert!(got[2].is_some());
    }

    #[test]
    fn find_by_index_resolves_through_reference() {
        let manager = manager();
        let model = manager
            .register(
                "Client",
                client_schema(),
                ModelConfig::new().index(IndexSpec::on_field("name")),
            )
            .unwrap();

        let created = model
            .create(json!({"name": "test"}), BuildOptions::new())
            .unwrap();

        let found = model
            .find_by_index("name", &["test"])
            .unwrap()
            .expect("indexed instance");
        assert_eq!(found.id(), created.id());

        assert!(model.find_by_index("name", &["other"]).unwrap().is_none());
        assert!(model.find_by_index("ghost", &["test"]).is_err());
    }
}
