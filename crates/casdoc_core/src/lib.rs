//! # casdoc Core
//!
//! Schema-driven document mapping over a CAS-based key-value store.
//!
//! This crate provides:
//! - Composite string keys with UUID, counter, and reference-document
//!   generation strategies
//! - Schema trees with a coercing, value-returning sanitizer
//! - A document envelope owning payload encoding and per-key storage I/O
//! - Live instances whose insert/replace/destroy keep secondary-index
//!   reference documents consistent via ordered writes and compensating
//!   rollback
//! - Models and a model manager resolving associations by name
//!
//! ## Example
//!
//! ```rust
//! use casdoc_core::{
//!     BuildOptions, FieldSchema, GetOptions, IndexSpec, ModelConfig, ModelManager,
//! };
//! use casdoc_storage::InMemoryBackend;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let manager = ModelManager::new(Arc::new(InMemoryBackend::new()));
//! let client = manager
//!     .register(
//!         "Client",
//!         FieldSchema::object().field("name", FieldSchema::string()),
//!         ModelConfig::new().index(IndexSpec::on_field("name")),
//!     )
//!     .unwrap();
//!
//! let created = client
//!     .create(json!({"name": "acme"}), BuildOptions::new())
//!     .unwrap();
//! let found = client.find_by_index("name", &["acme"]).unwrap().unwrap();
//! assert_eq!(found.id(), created.id());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod hooks;
mod instance;
mod key;
mod model;
mod paths;
mod relations;
mod sanitize;
mod schema;

pub use document::{DocEncoding, Document};
pub use error::{CoreError, CoreResult};
pub use hooks::{HookEvent, HookFn, Hooks, IndexRemovalFailureFn, RollbackFailureFn};
pub use instance::Instance;
pub use key::{Key, KeyKind, KeyOptions, DEFAULT_DELIMITER};
pub use model::{
    BuildOptions, GetOptions, IndexSpec, KeyConfig, Model, ModelConfig, ModelManager,
    PrimaryKeyKind,
};
pub use sanitize::sanitize;
pub use schema::{FieldSchema, FieldType, RelationMode, RelationSpec};
