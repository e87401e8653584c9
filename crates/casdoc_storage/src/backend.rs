//! Storage backend trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::time::Duration;

/// Opaque compare-and-swap token.
///
/// A `Cas` identifies one exact stored version of a document. Every
/// mutation returns a fresh token; passing a stale token to a conditional
/// `replace`/`remove` must fail with `CasMismatch` rather than silently
/// overwrite.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cas(u64);

impl Cas {
    /// Creates a CAS token from a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token value.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cas({})", self.0)
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value read from the backend together with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult {
    /// The stored bytes.
    pub value: Vec<u8>,
    /// The version that was read.
    pub cas: Cas,
}

/// A low-level key-value storage backend for casdoc.
///
/// Backends are **opaque byte stores**: they map string keys to byte
/// payloads and know nothing about documents, schemas, or reference
/// documents. casdoc owns all payload interpretation.
///
/// # Invariants
///
/// - Every mutation is atomic per key and returns a fresh [`Cas`]
/// - `replace`/`remove` with a stale CAS fail with `CasMismatch`
/// - `insert` on an existing key fails with `KeyExists`
/// - `get` on a missing key fails with `KeyNotFound`
/// - `counter` is atomic read-modify-write, creating the counter at
///   `initial` when absent
/// - Backends must be `Send + Sync` for shared access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
pub trait KvBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, or an I/O error.
    fn get(&self, key: &str) -> StorageResult<GetResult>;

    /// Reads the value and extends its time-to-live in one operation.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent.
    fn get_and_touch(&self, key: &str, expiry: Duration) -> StorageResult<GetResult>;

    /// Reads the value and takes a pessimistic lock on the key.
    ///
    /// The returned CAS doubles as the lock token: a subsequent
    /// `replace`/`remove` with that CAS, or an explicit [`unlock`], releases
    /// the lock. While locked, mutations with any other CAS fail with
    /// `Locked`.
    ///
    /// [`unlock`]: KvBackend::unlock
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, or `Locked` if the key
    /// is already locked.
    fn get_and_lock(&self, key: &str, lock_time: Duration) -> StorageResult<GetResult>;

    /// Stores `value` under `key`, failing if the key already exists.
    ///
    /// Returns the CAS of the newly stored version.
    ///
    /// # Errors
    ///
    /// Returns `KeyExists` if the key is present.
    fn insert(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<Cas>;

    /// Replaces the value under an existing `key`.
    ///
    /// When `cas` is supplied the replace is conditional on the stored
    /// version still matching.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, `CasMismatch` if the
    /// supplied token is stale, or `Locked` if the key is locked under a
    /// different token.
    fn replace(
        &self,
        key: &str,
        value: &[u8],
        cas: Option<Cas>,
        expiry: Option<Duration>,
    ) -> StorageResult<Cas>;

    /// Removes the value under `key`.
    ///
    /// When `cas` is supplied the removal is conditional on the stored
    /// version still matching. Returns the CAS of the removed version.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, or `CasMismatch` if the
    /// supplied token is stale.
    fn remove(&self, key: &str, cas: Option<Cas>) -> StorageResult<Cas>;

    /// Extends the time-to-live of `key` without reading it.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent.
    fn touch(&self, key: &str, expiry: Duration) -> StorageResult<()>;

    /// Releases a lock taken by [`get_and_lock`].
    ///
    /// [`get_and_lock`]: KvBackend::get_and_lock
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, or `CasMismatch` if
    /// `cas` is not the lock token.
    fn unlock(&self, key: &str, cas: Cas) -> StorageResult<()>;

    /// Atomically adjusts a numeric counter stored under `key`.
    ///
    /// When the counter is absent it is created at `initial` and that value
    /// is returned; otherwise `delta` is applied and the new value
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a counter or the
    /// adjustment would underflow.
    fn counter(&self, key: &str, delta: i64, initial: u64) -> StorageResult<u64>;
}
