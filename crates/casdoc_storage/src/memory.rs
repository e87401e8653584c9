//! In-memory storage backend for testing.

use crate::backend::{Cas, GetResult, KvBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    cas: Cas,
    expires_at: Option<Instant>,
    locked_until: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// An in-memory key-value backend.
///
/// This backend stores all documents in a process-local map and is
/// suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral mappers that don't need persistence
///
/// CAS tokens are allocated from a process-wide monotone counter, so a
/// token can never be accidentally reused for a different version.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use casdoc_storage::{InMemoryBackend, KvBackend};
///
/// let backend = InMemoryBackend::new();
/// let cas = backend.insert("k", b"v", None).unwrap();
/// let next = backend.replace("k", b"v2", Some(cas), None).unwrap();
/// assert_ne!(cas, next);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    next_cas: AtomicU64,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a live (non-expired) entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Returns the raw bytes stored under `key`, if any.
    ///
    /// Useful for wire-format assertions in tests.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Returns `true` if the backend holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn alloc_cas(&self) -> Cas {
        Cas::from_raw(self.next_cas.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl KvBackend for InMemoryBackend {
    fn get(&self, key: &str) -> StorageResult<GetResult> {
        let now = Instant::now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(GetResult {
                value: entry.value.clone(),
                cas: entry.cas,
            }),
            _ => Err(StorageError::key_not_found(key)),
        }
    }

    fn get_and_touch(&self, key: &str, expiry: Duration) -> StorageResult<GetResult> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + expiry);
                Ok(GetResult {
                    value: entry.value.clone(),
                    cas: entry.cas,
                })
            }
            _ => Err(StorageError::key_not_found(key)),
        }
    }

    fn get_and_lock(&self, key: &str, lock_time: Duration) -> StorageResult<GetResult> {
        let now = Instant::now();
        let cas = self.alloc_cas();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                if entry.is_locked(now) {
                    return Err(StorageError::locked(key));
                }
                // The fresh CAS doubles as the lock token.
                entry.cas = cas;
                entry.locked_until = Some(now + lock_time);
                Ok(GetResult {
                    value: entry.value.clone(),
                    cas,
                })
            }
            _ => Err(StorageError::key_not_found(key)),
        }
    }

    fn insert(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<Cas> {
        let now = Instant::now();
        let cas = self.alloc_cas();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Err(StorageError::key_exists(key));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                cas,
                expires_at: expiry.map(|e| now + e),
                locked_until: None,
            },
        );
        Ok(cas)
    }

    fn replace(
        &self,
        key: &str,
        value: &[u8],
        cas: Option<Cas>,
        expiry: Option<Duration>,
    ) -> StorageResult<Cas> {
        let now = Instant::now();
        let next = self.alloc_cas();
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(key)
            .filter(|e| !e.is_expired(now))
            .ok_or_else(|| StorageError::key_not_found(key))?;

        if entry.is_locked(now) && cas != Some(entry.cas) {
            return Err(StorageError::locked(key));
        }
        if let Some(token) = cas {
            if token != entry.cas {
                return Err(StorageError::cas_mismatch(key));
            }
        }

        entry.value = value.to_vec();
        entry.cas = next;
        entry.locked_until = None;
        if let Some(e) = expiry {
            entry.expires_at = Some(now + e);
        }
        Ok(next)
    }

    fn remove(&self, key: &str, cas: Option<Cas>) -> StorageResult<Cas> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let entry = entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .ok_or_else(|| StorageError::key_not_found(key))?;

        if entry.is_locked(now) && cas != Some(entry.cas) {
            return Err(StorageError::locked(key));
        }
        if let Some(token) = cas {
            if token != entry.cas {
                return Err(StorageError::cas_mismatch(key));
            }
        }

        let removed = entry.cas;
        entries.remove(key);
        Ok(removed)
    }

    fn touch(&self, key: &str, expiry: Duration) -> StorageResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + expiry);
                Ok(())
            }
            _ => Err(StorageError::key_not_found(key)),
        }
    }

    fn unlock(&self, key: &str, cas: Cas) -> StorageResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(key)
            .filter(|e| !e.is_expired(now))
            .ok_or_else(|| StorageError::key_not_found(key))?;

        if cas != entry.cas {
            return Err(StorageError::cas_mismatch(key));
        }
        entry.locked_until = None;
        Ok(())
    }

    fn counter(&self, key: &str, delta: i64, initial: u64) -> StorageResult<u64> {
        let now = Instant::now();
        let cas = self.alloc_cas();
        let mut entries = self.entries.write();

        let current = match entries.get(key).filter(|e| !e.is_expired(now)) {
            Some(entry) => {
                let text = std::str::from_utf8(&entry.value)
                    .map_err(|_| StorageError::Backend(format!("not a counter: {key}")))?;
                let value: u64 = text
                    .parse()
                    .map_err(|_| StorageError::Backend(format!("not a counter: {key}")))?;
                Some(value)
            }
            None => None,
        };

        let next = match current {
            None => initial,
            Some(value) => value
                .checked_add_signed(delta)
                .ok_or_else(|| StorageError::Backend(format!("counter out of range: {key}")))?,
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                cas,
                expires_at: None,
                locked_until: None,
            },
        );
        Ok(next)
    }
}
