//! Ambient scope storage.
//!
//! Non-blocking engines keep their scopes in a tokio task-local that is bound
//! to the future running the scope body, so concurrently running call chains
//! never observe each other's handle. Blocking engines use a thread-local with
//! a restore guard. Both map engine id to the scope entry, which lets several
//! engines nest scopes independently.

use crate::db::handle::ErasedHandle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use uuid::Uuid;

/// Which kind of scope published the ambient handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `atomic()`: the handle was opened with a transaction.
    Atomic,
    /// `non_atomic()`: the handle was opened without one.
    NonAtomic,
}

#[derive(Clone)]
pub(crate) struct ScopeEntry {
    pub(crate) kind: ScopeKind,
    pub(crate) handle: ErasedHandle,
}

impl ScopeEntry {
    pub(crate) fn new(kind: ScopeKind, handle: ErasedHandle) -> Self {
        Self { kind, handle }
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScopeMap {
    entries: HashMap<Uuid, ScopeEntry>,
}

impl ScopeMap {
    fn get(&self, engine: Uuid) -> Option<&ScopeEntry> {
        self.entries.get(&engine)
    }

    fn with(&self, engine: Uuid, entry: ScopeEntry) -> Self {
        let mut next = self.clone();
        next.entries.insert(engine, entry);
        next
    }
}

tokio::task_local! {
    static TASK_SCOPES: ScopeMap;
}

thread_local! {
    static THREAD_SCOPES: RefCell<ScopeMap> = RefCell::new(ScopeMap::default());
}

/// The entry published for `engine` in the current task, if any.
pub(crate) fn current_task_scope(engine: Uuid) -> Option<ScopeEntry> {
    TASK_SCOPES
        .try_with(|scopes| scopes.get(engine).cloned())
        .ok()
        .flatten()
}

/// Run `fut` with `entry` published for `engine`. The previous state is
/// visible again once `fut` completes or is dropped.
pub(crate) async fn enter_task_scope<F: Future>(
    engine: Uuid,
    entry: ScopeEntry,
    fut: F,
) -> F::Output {
    let next = TASK_SCOPES
        .try_with(|scopes| scopes.with(engine, entry.clone()))
        .unwrap_or_else(|_| ScopeMap::default().with(engine, entry));
    TASK_SCOPES.scope(next, fut).await
}

/// The entry published for `engine` on the current thread, if any.
pub(crate) fn current_thread_scope(engine: Uuid) -> Option<ScopeEntry> {
    THREAD_SCOPES.with(|scopes| scopes.borrow().get(engine).cloned())
}

/// Restores the previous thread-local entry on drop.
pub(crate) struct ThreadScopeGuard {
    engine: Uuid,
    previous: Option<ScopeEntry>,
}

pub(crate) fn enter_thread_scope(engine: Uuid, entry: ScopeEntry) -> ThreadScopeGuard {
    let previous = THREAD_SCOPES.with(|scopes| scopes.borrow_mut().entries.insert(engine, entry));
    ThreadScopeGuard { engine, previous }
}

impl Drop for ThreadScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        THREAD_SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            match previous {
                Some(entry) => scopes.entries.insert(self.engine, entry),
                None => scopes.entries.remove(&self.engine),
            };
        });
    }
}
