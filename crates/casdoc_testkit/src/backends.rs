//! Instrumented storage backends.
//!
//! [`RecordingBackend`] logs every call for asserting operation order;
//! [`FlakyBackend`] injects failures at chosen points to exercise the
//! compensating-rollback paths. Both delegate to an [`InMemoryBackend`].

use casdoc_storage::{Cas, GetResult, InMemoryBackend, KvBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::time::Duration;

/// The kinds of storage calls, for matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `get`
    Get,
    /// `get_and_touch`
    GetAndTouch,
    /// `get_and_lock`
    GetAndLock,
    /// `insert`
    Insert,
    /// `replace`
    Replace,
    /// `remove`
    Remove,
    /// `touch`
    Touch,
    /// `unlock`
    Unlock,
    /// `counter`
    Counter,
}

/// A backend that records every call in order.
#[derive(Default)]
pub struct RecordingBackend {
    inner: InMemoryBackend,
    log: Mutex<Vec<(OpKind, String)>>,
}

impl RecordingBackend {
    /// Creates an empty recording backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the calls made so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<(OpKind, String)> {
        self.log.lock().clone()
    }

    /// Returns only the calls of one kind, in order.
    #[must_use]
    pub fn ops_of(&self, kind: OpKind) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Forgets the recorded calls.
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// The wrapped store, for direct assertions.
    #[must_use]
    pub fn store(&self) -> &InMemoryBackend {
        &self.inner
    }

    fn record(&self, kind: OpKind, key: &str) {
        self.log.lock().push((kind, key.to_string()));
    }
}

impl KvBackend for RecordingBackend {
    fn get(&self, key: &str) -> StorageResult<GetResult> {
        self.record(OpKind::Get, key);
        self.inner.get(key)
    }

    fn get_and_touch(&self, key: &str, expiry: Duration) -> StorageResult<GetResult> {
        self.record(OpKind::GetAndTouch, key);
        self.inner.get_and_touch(key, expiry)
    }

    fn get_and_lock(&self, key: &str, lock_time: Duration) -> StorageResult<GetResult> {
        self.record(OpKind::GetAndLock, key);
        self.inner.get_and_lock(key, lock_time)
    }

    fn insert(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<Cas> {
        self.record(OpKind::Insert, key);
        self.inner.insert(key, value, expiry)
    }

    fn replace(
        &self,
        key: &str,
        value: &[u8],
        cas: Option<Cas>,
        expiry: Option<Duration>,
    ) -> StorageResult<Cas> {
        self.record(OpKind::Replace, key);
        self.inner.replace(key, value, cas, expiry)
    }

    fn remove(&self, key: &str, cas: Option<Cas>) -> StorageResult<Cas> {
        self.record(OpKind::Remove, key);
        self.inner.remove(key, cas)
    }

    fn touch(&self, key: &str, expiry: Duration) -> StorageResult<()> {
        self.record(OpKind::Touch, key);
        self.inner.touch(key, expiry)
    }

    fn unlock(&self, key: &str, cas: Cas) -> StorageResult<()> {
        self.record(OpKind::Unlock, key);
        self.inner.unlock(key, cas)
    }

    fn counter(&self, key: &str, delta: i64, initial: u64) -> StorageResult<u64> {
        self.record(OpKind::Counter, key);
        self.inner.counter(key, delta, initial)
    }
}

enum Trigger {
    /// Fail the nth matching call (1-based).
    Nth(u64),
    /// Fail the next matching call on this exact key.
    Key(String),
}

struct Plan {
    op: OpKind,
    trigger: Trigger,
}

/// A backend that fails chosen calls with an injected error.
///
/// Each armed failure fires once; everything else passes through to the
/// in-memory store.
#[derive(Default)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    plans: Mutex<Vec<Plan>>,
    counts: Mutex<std::collections::HashMap<OpKind, u64>>,
}

impl FlakyBackend {
    /// Creates a backend with no failures armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a failure for the `nth` call (1-based) of `op`, counted from
    /// backend creation.
    pub fn fail_nth(&self, op: OpKind, nth: u64) {
        self.plans.lock().push(Plan {
            op,
            trigger: Trigger::Nth(nth),
        });
    }

    /// Arms a failure for the next call of `op` on exactly `key`.
    pub fn fail_key(&self, op: OpKind, key: impl Into<String>) {
        self.plans.lock().push(Plan {
            op,
            trigger: Trigger::Key(key.into()),
        });
    }

    /// The wrapped store, for direct assertions.
    #[must_use]
    pub fn store(&self) -> &InMemoryBackend {
        &self.inner
    }

    fn check(&self, op: OpKind, key: &str) -> StorageResult<()> {
        let count = {
            let mut counts = self.counts.lock();
            let entry = counts.entry(op).or_insert(0);
            *entry += 1;
            *entry
        };
        let mut plans = self.plans.lock();
        let hit = plans.iter().position(|plan| {
            plan.op == op
                && match &plan.trigger {
                    Trigger::Nth(nth) => *nth == count,
                    Trigger::Key(k) => k == key,
                }
        });
        match hit {
            Some(i) => {
                plans.remove(i);
                Err(StorageError::Backend(format!(
                    "injected failure on {key}"
                )))
            }
            None => Ok(()),
        }
    }
}

impl KvBackend for FlakyBackend {
    fn get(&self, key: &str) -> StorageResult<GetResult> {
        self.check(OpKind::Get, key)?;
        self.inner.get(key)
    }

    fn get_and_touch(&self, key: &str, expiry: Duration) -> StorageResult<GetResult> {
        self.check(OpKind::GetAndTouch, key)?;
        self.inner.get_and_touch(key, expiry)
    }

    fn get_and_lock(&self, key: &str, lock_time: Duration) -> StorageResult<GetResult> {
        self.check(OpKind::GetAndLock, key)?;
        self.inner.get_and_lock(key, lock_time)
    }

    fn insert(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<Cas> {
        self.check(OpKind::Insert, key)?;
        self.inner.insert(key, value, expiry)
    }

    fn replace(
        &self,
        key: &str,
        value: &[u8],
        cas: Option<Cas>,
        expiry: Option<Duration>,
    ) -> StorageResult<Cas> {
        self.check(OpKind::Replace, key)?;
        self.inner.replace(key, value, cas, expiry)
    }

    fn remove(&self, key: &str, cas: Option<Cas>) -> StorageResult<Cas> {
        self.check(OpKind::Remove, key)?;
        self.inner.remove(key, cas)
    }

    fn touch(&self, key: &str, expiry: Duration) -> StorageResult<()> {
        self.check(OpKind::Touch, key)?;
        self.inner.touch(key, expiry)
    }

    fn unlock(&self, key: &str, cas: Cas) -> StorageResult<()> {
        self.check(OpKind::Unlock, key)?;
        self.inner.unlock(key, cas)
    }

    fn counter(&self, key: &str, delta: i64, initial: u64) -> StorageResult<u64> {
        self.check(OpKind::Counter, key)?;
        self.inner.counter(key, delta, initial)
    }
}
