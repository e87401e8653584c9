//! # casdoc Storage
//!
//! Key-value storage backend trait and implementations for casdoc.
//!
//! This crate provides the lowest-level storage abstraction for casdoc.
//! Backends are **opaque byte stores addressed by string keys** - they do
//! not interpret the documents they store. Optimistic concurrency is
//! expressed through an opaque compare-and-swap token ([`Cas`]) returned
//! by every mutation and required for conditional replace/remove.
//!
//! ## Design Principles
//!
//! - Backends store raw bytes under string keys; casdoc owns all payload
//!   interpretation
//! - Per-key atomicity only - there are no multi-key transactions
//! - Well-known error conditions (`KeyNotFound`, `KeyExists`,
//!   `CasMismatch`) let callers distinguish expected absence from failure
//! - Must be `Send + Sync` for shared access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral use
//!
//! ## Example
//!
//! ```rust
//! use casdoc_storage::{InMemoryBackend, KvBackend};
//!
//! let backend = InMemoryBackend::new();
//! let cas = backend.insert("greeting", b"hello", None).unwrap();
//! let found = backend.get("greeting").unwrap();
//! assert_eq!(found.value, b"hello");
//! assert_eq!(found.cas, cas);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{Cas, GetResult, KvBackend};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryBackend;
