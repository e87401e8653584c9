//! # casdoc Testkit
//!
//! Test utilities for casdoc.
//!
//! This crate provides:
//! - Model fixtures and manager helpers
//! - A recording backend for asserting storage call order
//! - A fault-injecting backend for exercising rollback paths
//!
//! ## Usage
//!
//! ```rust
//! use casdoc_core::BuildOptions;
//! use casdoc_testkit::prelude::*;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(RecordingBackend::new());
//! let manager = manager(backend.clone());
//! let client = client_model(&manager);
//! client
//!     .create(sample_client("acme"), BuildOptions::new())
//!     .unwrap();
//! assert_eq!(backend.ops_of(OpKind::Insert).len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backends;
pub mod fixtures;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backends::*;
    pub use crate::fixtures::*;
}

pub use backends::{FlakyBackend, OpKind, RecordingBackend};
pub use fixtures::{
    account_model, client_model, manager, post_model, sample_client, sample_post,
};
