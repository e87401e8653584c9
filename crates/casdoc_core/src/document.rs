//! The minimal persistable unit.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use casdoc_storage::{Cas, KvBackend};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How a document's payload is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocEncoding {
    /// JSON-encoded value tree (primary documents).
    Json,
    /// The raw UTF-8 of a string value, no JSON wrapping (reference
    /// documents store the primary key string verbatim).
    RawString,
}

/// A persistable envelope: key + payload + concurrency token.
///
/// `Document` knows nothing about schemas or models; it encodes its
/// payload and drives single-document storage calls. Every storage
/// failure is re-thrown as [`CoreError::DocumentStorage`] tagged with the
/// failing key, so callers running multi-document workflows can identify
/// which document in a batch failed - never silently swallowed.
pub struct Document {
    key: Key,
    data: Value,
    encoding: DocEncoding,
    cas: Option<Cas>,
    is_new_record: bool,
    ttl: Option<Duration>,
    backend: Arc<dyn KvBackend>,
}

impl Document {
    /// Creates a new in-memory JSON document.
    #[must_use]
    pub fn new(key: Key, data: Value, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            key,
            data,
            encoding: DocEncoding::Json,
            cas: None,
            is_new_record: true,
            ttl: None,
            backend,
        }
    }

    /// Creates a new raw-string document (reference documents).
    #[must_use]
    pub fn raw(key: Key, payload: impl Into<String>, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            key,
            data: Value::String(payload.into()),
            encoding: DocEncoding::RawString,
            cas: None,
            is_new_record: true,
            ttl: None,
            backend,
        }
    }

    /// Reconstructs a document read from storage.
    #[must_use]
    pub fn from_storage(key: Key, data: Value, cas: Cas, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            key,
            data,
            encoding: DocEncoding::Json,
            cas: Some(cas),
            is_new_record: false,
            ttl: None,
            backend,
        }
    }

    /// Returns the document's key.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn key_mut(&mut self) -> &mut Key {
        &mut self.key
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the concurrency token, if this version was read from or
    /// committed to storage.
    #[must_use]
    pub fn cas(&self) -> Option<Cas> {
        self.cas
    }

    /// Returns `true` if a CAS token is present.
    #[must_use]
    pub fn has_cas(&self) -> bool {
        self.cas.is_some()
    }

    /// Returns `true` until the document is first persisted.
    #[must_use]
    pub fn is_new_record(&self) -> bool {
        self.is_new_record
    }

    /// Sets the time-to-live applied on the next insert/replace.
    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.ttl = ttl;
    }

    /// Returns the document's time-to-live, if any.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Replaces the payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleDocument`] when the document is known to
    /// be stale relative to storage: no CAS token and not a new record.
    pub fn set_data(&mut self, data: Value) -> CoreResult<()> {
        if !self.has_cas() && !self.is_new_record {
            return Err(CoreError::StaleDocument);
        }
        self.data = data;
        Ok(())
    }

    /// Unchecked payload access for the owning instance's lifecycle
    /// bookkeeping (timestamp restore during rollback).
    pub(crate) fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    /// Renders the key string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] when the key has not been generated.
    pub fn rendered_key(&self) -> CoreResult<String> {
        self.key.render()
    }

    fn encode(&self, value: &Value) -> CoreResult<Vec<u8>> {
        match self.encoding {
            DocEncoding::Json => Ok(serde_json::to_vec(value)?),
            DocEncoding::RawString => match value {
                Value::String(s) => Ok(s.clone().into_bytes()),
                other => Ok(serde_json::to_vec(other)?),
            },
        }
    }

    /// Inserts the document, adopting the returned CAS.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] when the key is ungenerated, or
    /// [`CoreError::DocumentStorage`] tagged with this document's key.
    pub fn insert(&mut self) -> CoreResult<()> {
        let value = self.data.clone();
        self.insert_value(&value)
    }

    /// Inserts with an override payload (instances layer virtual fields
    /// onto the stored form without touching the live data).
    pub(crate) fn insert_value(&mut self, value: &Value) -> CoreResult<()> {
        let key = self.key.render()?;
        let bytes = self.encode(value)?;
        debug!(key = %key, "inserting document");
        match self.backend.insert(&key, &bytes, self.ttl) {
            Ok(cas) => {
                self.cas = Some(cas);
                self.is_new_record = false;
                Ok(())
            }
            Err(e) => Err(CoreError::document_storage(key, e)),
        }
    }

    /// Replaces the stored document under its current CAS.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] without a CAS token, or
    /// [`CoreError::DocumentStorage`] tagged with this document's key.
    pub fn replace(&mut self) -> CoreResult<()> {
        let value = self.data.clone();
        self.replace_value(&value)
    }

    /// Replace with an override payload; see [`Document::insert_value`].
    pub(crate) fn replace_value(&mut self, value: &Value) -> CoreResult<()> {
        let cas = self.cas.ok_or_else(|| {
            CoreError::invalid_operation("cannot replace a document without a CAS token")
        })?;
        let key = self.key.render()?;
        let bytes = self.encode(value)?;
        debug!(key = %key, %cas, "replacing document");
        match self.backend.replace(&key, &bytes, Some(cas), self.ttl) {
            Ok(next) => {
                self.cas = Some(next);
                Ok(())
            }
            Err(e) => Err(CoreError::document_storage(key, e)),
        }
    }

    /// Removes the stored document, ending its persisted life.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentStorage`] tagged with this document's
    /// key.
    pub fn remove(&mut self) -> CoreResult<()> {
        let key = self.key.render()?;
        debug!(key = %key, "removing document");
        match self.backend.remove(&key, self.cas) {
            Ok(_) => {
                self.cas = None;
                self.is_new_record = true;
                Ok(())
            }
            Err(e) => Err(CoreError::document_storage(key, e)),
        }
    }

    /// Extends the stored document's time-to-live.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentStorage`] tagged with this document's
    /// key.
    pub fn touch(&mut self, expiry: Duration) -> CoreResult<()> {
        let key = self.key.render()?;
        self.backend
            .touch(&key, expiry)
            .map_err(|e| CoreError::document_storage(key, e))
    }

    /// Releases a write lock taken at read time, without writing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] without a CAS token, or
    /// [`CoreError::DocumentStorage`] tagged with this document's key.
    pub fn unlock(&mut self) -> CoreResult<()> {
        let cas = self.cas.ok_or_else(|| {
            CoreError::invalid_operation("cannot unlock a document without a CAS token")
        })?;
        let key = self.key.render()?;
        self.backend
            .unlock(&key, cas)
            .map_err(|e| CoreError::document_storage(key, e))
    }

    pub(crate) fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub(crate) fn adopt_cas(&mut self, cas: Option<Cas>, is_new_record: bool) {
        self.cas = cas;
        self.is_new_record = is_new_record;
    }
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            data: self.data.clone(),
            encoding: self.encoding,
            cas: self.cas,
            is_new_record: self.is_new_record,
            ttl: self.ttl,
            backend: Arc::clone(&self.backend),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("key", &self.key)
            .field("cas", &self.cas)
            .field("is_new_record", &self.is_new_record)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}
