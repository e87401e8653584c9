//! Live instances and their transactional lifecycle.
//!
//! An [`Instance`] pairs a model with one document and drives the
//! multi-document write workflows: every insert, replace, and destroy
//! keeps the model's reference documents in step with the primary
//! document. The backend offers no transactions, so consistency comes
//! from ordering and compensation:
//!
//! - writes touch reference documents first, the primary last, making the
//!   primary write the commit point;
//! - when a step fails before the commit point, the steps already applied
//!   are undone in reverse order (inserts removed, removals re-inserted)
//!   and the instance's in-memory state is restored, then the causing
//!   error is re-thrown;
//! - a compensation step that itself fails is logged and reported to the
//!   model's failed-rollback observers, leaving an orphan for offline
//!   repair - the causing error still wins.
//!
//! Stale reference documents left after a successful replace are removed
//! post-commit; a failure there is routed through the model's
//! failed-index-removal handler since the primary write cannot be undone
//! by then.

use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::hooks::HookEvent;
use crate::key::Key;
use crate::model::{IndexSpec, Model};
use crate::paths;
use crate::relations::{self, TagDirection};
use crate::sanitize;
use casdoc_storage::Cas;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One undo step recorded while a multi-document write is in flight.
enum Compensation {
    /// Undo an insert that succeeded before the failure.
    Remove { key: String },
    /// Undo a removal that succeeded before the failure.
    Insert { key: String, payload: Vec<u8> },
}

/// Backup of one top-level field, taken before the lifecycle mutates it.
struct FieldBackup {
    field: &'static str,
    value: Option<Value>,
}

/// A model-bound live document.
#[derive(Clone)]
pub struct Instance {
    model: Arc<Model>,
    doc: Document,
    /// Snapshot of the data as last seen in storage (or at build).
    original: Option<Value>,
}

impl Instance {
    pub(crate) fn new(model: Arc<Model>, doc: Document) -> Self {
        let original = Some(doc.data().clone());
        Self {
            model,
            doc,
            original,
        }
    }

    /// Returns the owning model.
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns the live data.
    #[must_use]
    pub fn data(&self) -> &Value {
        self.doc.data()
    }

    /// Returns the snapshot of the data as last persisted.
    ///
    /// `None` only after a hard destroy.
    #[must_use]
    pub fn original(&self) -> Option<&Value> {
        self.original.as_ref()
    }

    /// Returns the primary key.
    #[must_use]
    pub fn key(&self) -> &Key {
        self.doc.key()
    }

    /// Returns the id part of the primary key, once generated.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.doc.key().id()
    }

    /// Renders the full primary key string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Key`] before the key is generated.
    pub fn rendered_key(&self) -> CoreResult<String> {
        self.doc.rendered_key()
    }

    /// Returns the CAS token of the persisted version, if any.
    #[must_use]
    pub fn cas(&self) -> Option<Cas> {
        self.doc.cas()
    }

    /// Returns `true` until the instance is first persisted.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.doc.is_new_record()
    }

    /// Looks up a dotted path in the live data.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        paths::lookup(self.doc.data(), path)
    }

    /// Sets a top-level field on the live data.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleDocument`] when the instance lost its CAS
    /// token, or [`CoreError::InvalidOperation`] for non-object data.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> CoreResult<()> {
        if !self.doc.has_cas() && !self.doc.is_new_record() {
            return Err(CoreError::StaleDocument);
        }
        match self.doc.data_mut() {
            Value::Object(map) => {
                map.insert(field.into(), value);
                Ok(())
            }
            _ => Err(CoreError::invalid_operation("instance data is not an object")),
        }
    }

    /// Replaces the live data wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleDocument`] when the instance lost its CAS
    /// token.
    pub fn set_data(&mut self, data: Value) -> CoreResult<()> {
        self.doc.set_data(data)
    }

    /// Runs the sanitizer over the live data, re-binding the result.
    ///
    /// The lifecycle methods sanitize on their own; this is for callers
    /// wanting validation without a write.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DataValidation`] naming the offending path.
    pub fn sanitize(&mut self) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let clean = sanitize::sanitize(model.schema(), self.doc.data(), "")?;
        *self.doc.data_mut() = clean;
        Ok(())
    }

    /// Returns `true` when the instance carries a soft-delete marker.
    #[must_use]
    pub fn is_soft_deleted(&self) -> bool {
        let field = self.model.config().deleted_field();
        matches!(self.doc.data().get(field), Some(v) if !v.is_null())
    }

    /// Overrides the time-to-live applied on the next write.
    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.doc.set_ttl(ttl);
    }

    /// Persists a new instance.
    ///
    /// Order: timestamps, `BeforeCreate` hooks, key generation,
    /// sanitization, reference documents one by one, then the primary
    /// document as the commit point, then `AfterCreate` hooks. A failure
    /// before the commit point removes the reference documents already
    /// inserted (in reverse order), restores the timestamp fields, and
    /// re-throws the causing error.
    ///
    /// # Errors
    ///
    /// Validation, key, hook, or storage errors; a missing value for a
    /// required index surfaces as [`CoreError::MissingIndexValue`].
    pub fn insert(&mut self) -> CoreResult<()> {
        if !self.doc.is_new_record() {
            return Err(CoreError::invalid_operation("instance is already persisted"));
        }
        let model = Arc::clone(&self.model);
        let backups = self.stamp_create();

        if let Err(e) = model.hooks().run(HookEvent::BeforeCreate, self) {
            self.restore_fields(backups);
            return Err(e);
        }
        {
            let owner = self.doc.data().clone();
            let backend = Arc::clone(self.doc.backend());
            if let Err(e) = self.doc.key_mut().generate(&owner, backend.as_ref()) {
                self.restore_fields(backups);
                return Err(e);
            }
        }
        match sanitize::sanitize(model.schema(), self.doc.data(), "") {
            Ok(clean) => *self.doc.data_mut() = clean,
            Err(e) => {
                self.restore_fields(backups);
                return Err(e);
            }
        }

        let primary = match self.doc.rendered_key() {
            Ok(p) => p,
            Err(e) => {
                self.restore_fields(backups);
                return Err(e);
            }
        };
        let ref_keys = match self.ref_keys(self.doc.data(), true) {
            Ok(keys) => keys,
            Err(e) => {
                self.restore_fields(backups);
                return Err(e);
            }
        };

        let mut applied = Vec::new();
        for (ref_key, rendered) in ref_keys {
            debug!(key = %rendered, primary = %primary, "inserting reference document");
            let mut ref_doc = self.ref_doc(ref_key, &primary);
            match ref_doc.insert() {
                Ok(()) => applied.push(Compensation::Remove { key: rendered }),
                Err(error) => {
                    self.run_rollback(applied);
                    self.restore_fields(backups);
                    return Err(error);
                }
            }
        }

        let stored = match self.storage_payload() {
            Ok(v) => v,
            Err(e) => {
                self.run_rollback(applied);
                self.restore_fields(backups);
                return Err(e);
            }
        };
        if let Err(e) = self.doc.insert_value(&stored) {
            self.run_rollback(applied);
            self.restore_fields(backups);
            return Err(e);
        }

        self.original = Some(self.doc.data().clone());
        model.hooks().run(HookEvent::AfterCreate, self)?;
        Ok(())
    }

    /// Persists the current data over the stored version.
    ///
    /// Reference documents are diffed against the stored snapshot: an
    /// index whose key changed gets a fresh reference document inserted
    /// pre-commit and the stale one removed post-commit, so a concurrent
    /// index lookup always resolves through at least one of them. A
    /// failure before the commit point (the CAS-checked primary replace)
    /// removes the fresh reference documents and restores the update
    /// timestamp. A stale removal failing post-commit is routed through
    /// the model's failed-index-removal handler.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] without a CAS token; validation,
    /// hook, or storage errors otherwise. A CAS conflict surfaces as
    /// [`CoreError::DocumentStorage`] wrapping the backend mismatch.
    pub fn replace(&mut self) -> CoreResult<()> {
        if !self.doc.has_cas() {
            return Err(CoreError::invalid_operation(
                "cannot replace an instance that has never been read or saved",
            ));
        }
        let model = Arc::clone(&self.model);
        let backups = self.stamp_update();

        if let Err(e) = model.hooks().run(HookEvent::BeforeUpdate, self) {
            self.restore_fields(backups);
            return Err(e);
        }
        match sanitize::sanitize(model.schema(), self.doc.data(), "") {
            Ok(clean) => *self.doc.data_mut() = clean,
            Err(e) => {
                self.restore_fields(backups);
                return Err(e);
            }
        }

        let primary = match self.doc.rendered_key() {
            Ok(p) => p,
            Err(e) => {
                self.restore_fields(backups);
                return Err(e);
            }
        };
        let snapshot = self.original.clone().unwrap_or(Value::Null);
        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for index in &model.config().indexes {
            let old_key = match self.index_key_for(index, &snapshot, false) {
                Ok(k) => k,
                Err(e) => {
                    self.restore_fields(backups);
                    return Err(e);
                }
            };
            let new_key = match self.index_key_for(index, self.doc.data(), true) {
                Ok(k) => k,
                Err(e) => {
                    self.restore_fields(backups);
                    return Err(e);
                }
            };
            match (old_key, new_key) {
                (Some((_, old)), Some((_, new))) if old == new => {}
                (old, new) => {
                    if let Some(new) = new {
                        fresh.push(new);
                    }
                    if let Some(old) = old {
                        stale.push(old);
                    }
                }
            }
        }

        let mut applied = Vec::new();
        for (ref_key, rendered) in fresh {
            debug!(key = %rendered, primary = %primary, "inserting reference document");
            let mut ref_doc = self.ref_doc(ref_key, &primary);
            match ref_doc.insert() {
                Ok(()) => applied.push(Compensation::Remove { key: rendered }),
                Err(error) => {
                    self.run_rollback(applied);
                    self.restore_fields(backups);
                    return Err(error);
                }
            }
        }

        let stored = match self.storage_payload() {
            Ok(v) => v,
            Err(e) => {
                self.run_rollback(applied);
                self.restore_fields(backups);
                return Err(e);
            }
        };
        if let Err(e) = self.doc.replace_value(&stored) {
            self.run_rollback(applied);
            self.restore_fields(backups);
            return Err(e);
        }

        // Commit point passed: the live data is now the stored truth.
        self.original = Some(self.doc.data().clone());
        for (ref_key, rendered) in stale {
            debug!(key = %rendered, "removing stale reference document");
            let mut ref_doc = self.ref_doc(ref_key, &primary);
            match ref_doc.remove() {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(error) => {
                    model.hooks().handle_failed_index_removal(&rendered, error)?;
                }
            }
        }
        model.hooks().run(HookEvent::AfterUpdate, self)?;
        Ok(())
    }

    /// Removes the instance from storage.
    ///
    /// Reference documents (computed from the stored snapshot) are removed
    /// one by one, then the primary document; under soft-delete the
    /// primary is tombstoned with a deletion timestamp instead. A failure
    /// before the primary step re-inserts the reference documents already
    /// removed and re-throws the causing error.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] without a CAS token; hook or
    /// storage errors otherwise.
    pub fn destroy(&mut self) -> CoreResult<()> {
        if !self.doc.has_cas() {
            return Err(CoreError::invalid_operation(
                "cannot destroy an instance that has never been read or saved",
            ));
        }
        let model = Arc::clone(&self.model);
        model.hooks().run(HookEvent::BeforeDestroy, self)?;

        let snapshot = self
            .original
            .clone()
            .unwrap_or_else(|| self.doc.data().clone());
        let primary = self.doc.rendered_key()?;
        let ref_keys = self.ref_keys(&snapshot, false)?;

        let paranoid = model.config().paranoid;
        let mut backups = Vec::new();
        if paranoid {
            let field = model.config().deleted_field();
            backups.push(self.set_field(field, Value::String(now_iso())));
        }

        let mut applied = Vec::new();
        for (ref_key, rendered) in ref_keys {
            debug!(key = %rendered, "removing reference document");
            let mut ref_doc = self.ref_doc(ref_key, &primary);
            match ref_doc.remove() {
                Ok(()) => applied.push(Compensation::Insert {
                    key: rendered,
                    payload: primary.clone().into_bytes(),
                }),
                Err(e) if e.is_not_found() => {}
                Err(error) => {
                    self.run_rollback(applied);
                    self.restore_fields(backups);
                    return Err(error);
                }
            }
        }

        let result = if paranoid {
            match self.storage_payload() {
                Ok(stored) => self.doc.replace_value(&stored),
                Err(e) => Err(e),
            }
        } else {
            self.doc.remove()
        };
        if let Err(e) = result {
            self.run_rollback(applied);
            self.restore_fields(backups);
            return Err(e);
        }

        if paranoid {
            self.original = Some(self.doc.data().clone());
        } else {
            self.original = None;
        }
        model.hooks().run(HookEvent::AfterDestroy, self)?;
        Ok(())
    }

    /// Applies a partial patch through a full replace.
    ///
    /// The patch's top-level fields are overlaid onto the stored snapshot
    /// and the result is replaced under CAS, so fields another writer
    /// changed since this instance was read are not clobbered by stale
    /// in-memory values. On success the patched fields (and refreshed
    /// timestamps) are mirrored back onto the live data; on failure the
    /// live data and snapshot are restored exactly.
    ///
    /// # Errors
    ///
    /// Everything [`Instance::replace`] can return, plus
    /// [`CoreError::InvalidOperation`] for a non-object patch.
    pub fn update(&mut self, patch: Value) -> CoreResult<()> {
        let Value::Object(patch) = patch else {
            return Err(CoreError::invalid_operation("update patch must be an object"));
        };
        if !self.doc.has_cas() {
            return Err(CoreError::invalid_operation(
                "cannot update an instance that has never been read or saved",
            ));
        }
        let model = Arc::clone(&self.model);
        let live_backup = self.doc.data().clone();
        let original_backup = self.original.clone();

        let mut attempt = self
            .original
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let Value::Object(map) = &mut attempt {
            for (field, value) in &patch {
                map.insert(field.clone(), value.clone());
            }
        }
        *self.doc.data_mut() = attempt;

        match self.replace() {
            Ok(()) => {
                let committed = self.doc.data().clone();
                let mut live = live_backup;
                if let (Value::Object(live_map), Value::Object(committed_map)) =
                    (&mut live, &committed)
                {
                    for field in patch.keys() {
                        match committed_map.get(field) {
                            Some(v) => {
                                live_map.insert(field.clone(), v.clone());
                            }
                            None => {
                                live_map.remove(field);
                            }
                        }
                    }
                    let config = model.config();
                    for field in [config.created_field(), config.updated_field()] {
                        if let Some(v) = committed_map.get(field) {
                            live_map.insert(field.to_string(), v.clone());
                        }
                    }
                }
                *self.doc.data_mut() = live;
                Ok(())
            }
            Err(e) => {
                *self.doc.data_mut() = live_backup;
                self.original = original_backup;
                Err(e)
            }
        }
    }

    /// Inserts a new instance or replaces a persisted one.
    ///
    /// # Errors
    ///
    /// See [`Instance::insert`] and [`Instance::replace`].
    pub fn save(&mut self) -> CoreResult<()> {
        if self.doc.is_new_record() {
            self.insert()
        } else {
            self.replace()
        }
    }

    /// Refreshes the stored document's expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentStorage`] tagged with the key.
    pub fn touch(&mut self, expiry: Duration) -> CoreResult<()> {
        self.doc.touch(expiry)
    }

    /// Releases a write lock taken by a locking read, without writing.
    ///
    /// # Errors
    ///
    /// See [`Document::unlock`].
    pub fn unlock(&mut self) -> CoreResult<()> {
        self.doc.unlock()
    }

    /// The stored form: live data plus the `_id`/`_type` virtuals, with
    /// embedded relation tags renamed to their serialized names.
    fn storage_payload(&self) -> CoreResult<Value> {
        let mut value = self.doc.data().clone();
        if let Value::Object(map) = &mut value {
            map.insert("_id".to_string(), Value::String(self.doc.rendered_key()?));
            map.insert(
                "_type".to_string(),
                Value::String(self.model.name().to_string()),
            );
        }
        relations::apply_tags(self.model.schema(), &mut value, TagDirection::Encode);
        Ok(value)
    }

    /// Renders one index's reference key off `data`.
    ///
    /// Missing indexed values yield `Ok(None)` except for a required
    /// index under `strict`, where the write must fail.
    fn index_key_for(
        &self,
        index: &IndexSpec,
        data: &Value,
        strict: bool,
    ) -> CoreResult<Option<(Key, String)>> {
        let mut key = self.model.index_key(index);
        match key.generate(data, self.doc.backend().as_ref()) {
            Ok(()) => {
                let rendered = key.render()?;
                Ok(Some((key, rendered)))
            }
            Err(CoreError::MissingIndexValue { .. }) if !strict || !index.required => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ref_keys(&self, data: &Value, strict: bool) -> CoreResult<Vec<(Key, String)>> {
        let mut keys = Vec::new();
        for index in &self.model.config().indexes {
            if let Some(entry) = self.index_key_for(index, data, strict)? {
                keys.push(entry);
            }
        }
        Ok(keys)
    }

    /// A raw-encoded reference document pointing one index entry at the
    /// primary key, inheriting this instance's time-to-live.
    fn ref_doc(&self, key: Key, primary: &str) -> Document {
        let mut doc = Document::raw(key, primary, Arc::clone(self.doc.backend()));
        doc.set_ttl(self.doc.ttl());
        doc
    }

    /// Undoes the applied steps in reverse order. Compensation failures
    /// are logged and reported to the failed-rollback observers; the
    /// operation's causing error still propagates from the caller.
    fn run_rollback(&mut self, mut applied: Vec<Compensation>) {
        let model = Arc::clone(&self.model);
        if let Err(e) = model.hooks().run(HookEvent::BeforeRollback, self) {
            warn!(model = %model.name(), error = %e, "before-rollback hook failed");
        }
        applied.reverse();
        let backend = Arc::clone(self.doc.backend());
        for step in applied {
            let (key, result) = match &step {
                Compensation::Remove { key } => {
                    (key.clone(), backend.remove(key, None).map(|_| ()))
                }
                Compensation::Insert { key, payload } => {
                    (key.clone(), backend.insert(key, payload, None).map(|_| ()))
                }
            };
            if let Err(e) = result {
                let error = CoreError::document_storage(key.clone(), e);
                warn!(key = %key, error = %error, "rollback compensation failed");
                model.hooks().notify_failed_rollback(&key, &error);
            }
        }
        if let Err(e) = model.hooks().run(HookEvent::AfterRollback, self) {
            warn!(model = %model.name(), error = %e, "after-rollback hook failed");
        }
    }

    fn stamp_create(&mut self) -> Vec<FieldBackup> {
        let model = Arc::clone(&self.model);
        let config = model.config();
        if !config.timestamps || !self.doc.data().is_object() {
            return Vec::new();
        }
        let now = now_iso();
        vec![
            self.set_field(config.created_field(), Value::String(now.clone())),
            self.set_field(config.updated_field(), Value::String(now)),
        ]
    }

    fn stamp_update(&mut self) -> Vec<FieldBackup> {
        let model = Arc::clone(&self.model);
        let config = model.config();
        if !config.timestamps || !self.doc.data().is_object() {
            return Vec::new();
        }
        vec![self.set_field(config.updated_field(), Value::String(now_iso()))]
    }

    fn set_field(&mut self, field: &'static str, value: Value) -> FieldBackup {
        let prior = self
            .doc
            .data_mut()
            .as_object_mut()
            .and_then(|map| map.insert(field.to_string(), value));
        FieldBackup {
            field,
            value: prior,
        }
    }

    fn restore_fields(&mut self, backups: Vec<FieldBackup>) {
        let Some(map) = self.doc.data_mut().as_object_mut() else {
            return;
        };
        for backup in backups {
            match backup.value {
                Some(value) => {
                    map.insert(backup.field.to_string(), value);
                }
                None => {
                    map.remove(backup.field);
                }
            }
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.name())
            .field("key", self.doc.key())
            .field("cas", &self.doc.cas())
            .field("is_new", &self.doc.is_new_record())
            .finish_non_exhaustive()
    }
}
