//! Model fixtures and manager helpers.

use casdoc_core::{
    FieldSchema, IndexSpec, KeyConfig, Model, ModelConfig, ModelManager, RelationMode,
    RelationSpec,
};
use casdoc_storage::KvBackend;
use serde_json::{json, Value};
use std::sync::Arc;

/// A manager over the given backend.
#[must_use]
pub fn manager(backend: Arc<dyn KvBackend>) -> Arc<ModelManager> {
    ModelManager::new(backend)
}

/// The `Client` fixture: UUID keys, a required index on `name`.
pub fn client_model(manager: &Arc<ModelManager>) -> Arc<Model> {
    manager
        .register(
            "Client",
            FieldSchema::object()
                .field("name", FieldSchema::string())
                .field("email", FieldSchema::string().allow_empty())
                .field(
                    "status",
                    FieldSchema::enumeration(vec![json!("active"), json!("archived")])
                        .default_value(json!("active")),
                ),
            ModelConfig::new().index(IndexSpec::on_field("name")),
        )
        .expect("register Client")
}

/// The `Post` fixture: counter keys, an index on `slug` and an optional
/// one on `category`, owned by a `Client` by reference.
pub fn post_model(manager: &Arc<ModelManager>) -> Arc<Model> {
    manager
        .register(
            "Post",
            FieldSchema::object()
                .field("slug", FieldSchema::string())
                .field("title", FieldSchema::string())
                .field("category", FieldSchema::string().allow_empty())
                .field(
                    "author",
                    FieldSchema::relation(RelationSpec::new("Client", RelationMode::ByReference))
                        .allow_empty(),
                ),
            ModelConfig::new()
                .key(KeyConfig::default().counter())
                .index(IndexSpec::on_field("slug"))
                .index(IndexSpec::on_field("category").optional()),
        )
        .expect("register Post")
}

/// The `Account` fixture: soft-delete with camelCase timestamps.
pub fn account_model(manager: &Arc<ModelManager>) -> Arc<Model> {
    manager
        .register(
            "Account",
            FieldSchema::object()
                .field("email", FieldSchema::string())
                .field("balance", FieldSchema::number().default_value(json!(0.0))),
            ModelConfig::new()
                .index(IndexSpec::on_field("email"))
                .camel_case()
                .paranoid(),
        )
        .expect("register Account")
}

/// Minimal valid `Client` data.
#[must_use]
pub fn sample_client(name: &str) -> Value {
    json!({ "name": name, "email": format!("{name}@example.com") })
}

/// Minimal valid `Post` data.
#[must_use]
pub fn sample_post(slug: &str) -> Value {
    json!({ "slug": slug, "title": format!("Post {slug}") })
}
