//! The model registry.

use crate::error::{CoreError, CoreResult};
use crate::model::{Model, ModelConfig};
use crate::schema::{FieldSchema, FieldType};
use casdoc_storage::KvBackend;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Registry of models sharing one storage backend.
///
/// Models reference each other by name, never directly, so mutually
/// recursive schemas register in any order; targets are resolved through
/// the manager on first use. Models hold a weak back-pointer, keeping the
/// graph free of reference cycles.
pub struct ModelManager {
    backend: Arc<dyn KvBackend>,
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl ModelManager {
    /// Creates a manager over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            models: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a model under a unique name.
    ///
    /// The schema is validated here, so a malformed model fails
    /// registration rather than its first document write. When timestamps
    /// are enabled, the timestamp fields are declared on the schema as
    /// optional dates (and the deletion marker too, under soft-delete).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaValidation`] for a malformed schema or
    /// [`CoreError::ModelAlreadyRegistered`] for a duplicate name.
    pub fn register(
        self: &Arc<Self>,
        name: impl Into<String>,
        schema: FieldSchema,
        config: ModelConfig,
    ) -> CoreResult<Arc<Model>> {
        let name = name.into();
        let mut schema = schema;
        if config.timestamps && schema.field_type == FieldType::Object {
            for field in [config.created_field(), config.updated_field()] {
                schema
                    .children
                    .entry(field.to_string())
                    .or_insert_with(|| FieldSchema::date().allow_empty());
            }
            if config.paranoid {
                schema
                    .children
                    .entry(config.deleted_field().to_string())
                    .or_insert_with(|| FieldSchema::date().allow_empty());
            }
        }
        schema.validate()?;

        let mut models = self.models.write();
        if models.contains_key(&name) {
            return Err(CoreError::ModelAlreadyRegistered { name });
        }
        debug!(model = %name, "registering model");
        let model = Arc::new(Model::new(
            name.clone(),
            schema,
            config,
            Arc::clone(&self.backend),
            Arc::downgrade(self),
        ));
        models.insert(name, Arc::clone(&model));
        Ok(model)
    }

    /// Looks up a registered model by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] for an unknown name.
    pub fn get(&self, name: &str) -> CoreResult<Arc<Model>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ModelNotFound {
                name: name.to_string(),
            })
    }

    /// Returns `true` if a model with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    /// Returns the registered model names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the shared storage backend.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn KvBackend> {
        Arc::clone(&self.backend)
    }
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("models", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casdoc_storage::InMemoryBackend;

    fn manager() -> Arc<ModelManager> {
        ModelManager::new(Arc::new(InMemoryBackend::new()))
    }

    fn simple_schema() -> FieldSchema {
        FieldSchema::object().field("name", FieldSchema::string())
    }

    #[test]
    fn register_and_get() {
        let manager = manager();
        let model = manager
            .register("Client", simple_schema(), ModelConfig::new())
            .unwrap();
        assert_eq!(model.name(), "Client");
        assert!(manager.contains("Client"));
        assert!(Arc::ptr_eq(&manager.get("Client").unwrap(), &model));
    }

    #[test]
    fn duplicate_name_rejected() {
        let manager = manager();
        manager
            .register("Client", simple_schema(), ModelConfig::new())
            .unwrap();
        let err = manager
            .register("Client", simple_schema(), ModelConfig::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ModelAlreadyRegistered { .. }));
    }

    #[test]
    fn unknown_model_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.get("Ghost").unwrap_err(),
            CoreError::ModelNotFound { .. }
        ));
    }

    #[test]
    fn malformed_schema_fails_registration() {
        let manager = manager();
        let bad = FieldSchema::object().field("status", FieldSchema::enumeration(vec![]));
        assert!(manager.register("Bad", bad, ModelConfig::new()).is_err());
        assert!(!manager.contains("Bad"));
    }

    #[test]
    fn timestamps_declared_on_schema() {
        let manager = manager();
        let model = manager
            .register("Stamped", simple_schema(), ModelConfig::new().paranoid())
            .unwrap();
        let children = &model.schema().children;
        assert!(children.contains_key("created_at"));
        assert!(children.contains_key("updated_at"));
        assert!(children.contains_key("deleted_at"));
    }

    #[test]
    fn timestamps_disabled_leaves_schema_alone() {
        let manager = manager();
        let model = manager
            .register("Plain", simple_schema(), ModelConfig::new().timestamps(false))
            .unwrap();
        assert!(!model.schema().children.contains_key("created_at"));
    }
}
