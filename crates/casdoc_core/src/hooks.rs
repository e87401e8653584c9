//! Lifecycle hook registry.
//!
//! Each model carries a [`Hooks`] registry. Handlers run synchronously in
//! registration order at the named lifecycle points; the first error
//! aborts the operation before any storage I/O (for the `Before*` events)
//! or surfaces after commit (for the `After*` events). Rollback events are
//! observational: errors from their handlers are logged and never change
//! the outcome of the operation that triggered them.

use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The lifecycle points a handler can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Before an insert touches storage.
    BeforeCreate,
    /// After an insert fully commits.
    AfterCreate,
    /// Before a replace touches storage.
    BeforeUpdate,
    /// After a replace fully commits.
    AfterUpdate,
    /// Before a destroy touches storage.
    BeforeDestroy,
    /// After a destroy fully commits.
    AfterDestroy,
    /// Before compensating work starts unwinding a failed operation.
    BeforeRollback,
    /// After compensating work finishes.
    AfterRollback,
}

/// A lifecycle handler.
pub type HookFn = Arc<dyn Fn(&mut Instance) -> CoreResult<()> + Send + Sync>;

/// Observer for a compensation step that itself failed during rollback.
/// Receives the key of the document the compensation targeted.
pub type RollbackFailureFn = Arc<dyn Fn(&str, &CoreError) + Send + Sync>;

/// Handler deciding the fate of a failed stale-index removal after the
/// primary write already committed. Returning `Ok(())` swallows the
/// failure; returning an error propagates it to the caller.
pub type IndexRemovalFailureFn = Arc<dyn Fn(&str, &CoreError) -> CoreResult<()> + Send + Sync>;

/// Per-model hook registry.
#[derive(Default)]
pub struct Hooks {
    handlers: RwLock<HashMap<HookEvent, Vec<(Option<String>, HookFn)>>>,
    failed_rollback: RwLock<Vec<RollbackFailureFn>>,
    failed_index_removal: RwLock<Option<IndexRemovalFailureFn>>,
}

impl Hooks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an anonymous handler for an event.
    pub fn register<F>(&self, event: HookEvent, handler: F)
    where
        F: Fn(&mut Instance) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push((None, Arc::new(handler)));
    }

    /// Registers a named handler; the name allows later removal.
    pub fn register_named<F>(&self, event: HookEvent, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut Instance) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push((Some(name.into()), Arc::new(handler)));
    }

    /// Removes every handler registered under `name` for `event`.
    ///
    /// Returns `true` if at least one handler was removed.
    pub fn remove(&self, event: HookEvent, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(n, _)| n.as_deref() != Some(name));
        before != list.len()
    }

    /// Returns the number of handlers registered for `event`.
    #[must_use]
    pub fn len(&self, event: HookEvent) -> usize {
        self.handlers
            .read()
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Returns `true` when no handler is registered for `event`.
    #[must_use]
    pub fn is_empty(&self, event: HookEvent) -> bool {
        self.len(event) == 0
    }

    /// Runs the handlers for `event` in registration order.
    ///
    /// The handler list is snapshotted before invocation, so a handler
    /// may register or remove hooks on this registry; such changes take
    /// effect from the next run onward.
    ///
    /// # Errors
    ///
    /// Returns the first handler error, skipping the rest.
    pub(crate) fn run(&self, event: HookEvent, instance: &mut Instance) -> CoreResult<()> {
        let snapshot: Vec<HookFn> = self
            .handlers
            .read()
            .get(&event)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler(instance)?;
        }
        Ok(())
    }

    /// Registers an observer for compensation steps that fail during
    /// rollback.
    pub fn on_failed_rollback<F>(&self, observer: F)
    where
        F: Fn(&str, &CoreError) + Send + Sync + 'static,
    {
        self.failed_rollback.write().push(Arc::new(observer));
    }

    pub(crate) fn notify_failed_rollback(&self, key: &str, error: &CoreError) {
        let snapshot: Vec<RollbackFailureFn> =
            self.failed_rollback.read().iter().map(Arc::clone).collect();
        for observer in snapshot {
            observer(key, error);
        }
    }

    /// Installs the handler consulted when a stale reference document
    /// cannot be removed after the primary write already committed.
    /// Replaces any previously installed handler.
    pub fn on_failed_index_removal<F>(&self, handler: F)
    where
        F: Fn(&str, &CoreError) -> CoreResult<()> + Send + Sync + 'static,
    {
        *self.failed_index_removal.write() = Some(Arc::new(handler));
    }

    /// Routes a failed stale-index removal: the installed handler decides,
    /// otherwise the error propagates unchanged.
    pub(crate) fn handle_failed_index_removal(
        &self,
        key: &str,
        error: CoreError,
    ) -> CoreResult<()> {
        let handler = self.failed_index_removal.read().as_ref().map(Arc::clone);
        match handler {
            Some(handler) => handler(key, &error),
            None => Err(error),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let total: usize = handlers.values().map(Vec::len).sum();
        f.debug_struct("Hooks").field("handlers", &total).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_count() {
        let hooks = Hooks::new();
        assert!(hooks.is_empty(HookEvent::BeforeCreate));

        hooks.register(HookEvent::BeforeCreate, |_| Ok(()));
        hooks.register_named(HookEvent::BeforeCreate, "audit", |_| Ok(()));
        assert_eq!(hooks.len(HookEvent::BeforeCreate), 2);
        assert_eq!(hooks.len(HookEvent::AfterCreate), 0);
    }

    #[test]
    fn remove_by_name_only_touches_named() {
        let hooks = Hooks::new();
        hooks.register(HookEvent::BeforeUpdate, |_| Ok(()));
        hooks.register_named(HookEvent::BeforeUpdate, "audit", |_| Ok(()));
        hooks.register_named(HookEvent::BeforeUpdate, "audit", |_| Ok(()));

        assert!(hooks.remove(HookEvent::BeforeUpdate, "audit"));
        assert_eq!(hooks.len(HookEvent::BeforeUpdate), 1);
        assert!(!hooks.remove(HookEvent::BeforeUpdate, "audit"));
        assert!(!hooks.remove(HookEvent::AfterUpdate, "audit"));
    }

    #[test]
    fn failed_index_removal_defaults_to_propagation() {
        let hooks = Hooks::new();
        let err = CoreError::invalid_operation("boom");
        assert!(hooks.handle_failed_index_removal("K", err).is_err());

        hooks.on_failed_index_removal(|_, _| Ok(()));
        let err = CoreError::invalid_operation("boom");
        assert!(hooks.handle_failed_index_removal("K", err).is_ok());
    }

    #[test]
    fn failed_rollback_observers_all_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hooks = Hooks::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            hooks.on_failed_rollback(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        hooks.notify_failed_rollback("K", &CoreError::StaleDocument);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
