//! Blocking engine.
//!
//! Runs the resolver decisions against a [`Connector`] on the calling thread.
//! Ambient scopes live in thread-local storage and are restored when a scope
//! body returns or unwinds.

use super::guard::Cleanup;
use super::inject::Inject;
use super::scope::{ScopeEntry, ScopeKind, current_thread_scope, enter_thread_scope};
use super::{
    AmbientState, HandleSource, ScopePlan, check_ambient_execute, plan_atomic, plan_non_atomic,
    plan_transaction, resolve_handle,
};
use crate::db::connection::Connector;
use crate::db::handle::Handle;
use crate::error::{FancyError, FancyResult};
use crate::models::{DatabaseType, QueryOutput, Statement};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Handle type produced by an [`Engine`] over `C`.
pub type EngineHandle<C> = Handle<<C as Connector>::Connection>;

struct Ambient<C: Connector> {
    kind: ScopeKind,
    handle: EngineHandle<C>,
}

impl<C: Connector> Ambient<C> {
    fn state(&self) -> AmbientState {
        AmbientState {
            kind: self.kind,
            in_transaction: self.handle.in_transaction(),
        }
    }
}

/// Blocking resolver bound to one connector.
///
/// Clones share the connector and the engine identity, so a scope entered on
/// one clone is visible to the others on the same thread.
pub struct Engine<C: Connector> {
    id: Uuid,
    connector: Arc<C>,
}

impl<C: Connector> Engine<C> {
    pub fn new(connector: C) -> Self {
        Self {
            id: Uuid::new_v4(),
            connector: Arc::new(connector),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn database_type(&self) -> DatabaseType {
        self.connector.database_type()
    }

    /// Open a new caller-owned handle.
    pub fn acquire(&self) -> FancyResult<EngineHandle<C>> {
        let handle = Handle::new(self.connector.connect()?);
        debug!(engine = %self.id, handle = %handle.id(), "Acquired handle");
        Ok(handle)
    }

    /// The handle published by the innermost active scope, if any.
    pub fn current_handle(&self) -> Option<EngineHandle<C>> {
        self.ambient().map(|ambient| ambient.handle)
    }

    fn ambient(&self) -> Option<Ambient<C>> {
        let entry = current_thread_scope(self.id)?;
        Handle::restore(&entry.handle).map(|handle| Ambient {
            kind: entry.kind,
            handle,
        })
    }

    /// Run `body` inside a transaction shared by every nested call on this
    /// engine. The outermost scope commits on `Ok`, rolls back on `Err`, and
    /// releases the handle either way.
    pub fn atomic<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&EngineHandle<C>) -> Result<T, E>,
        E: From<FancyError>,
    {
        let ambient = self.ambient();
        let plan = plan_atomic(ambient.as_ref().map(Ambient::state))?;
        debug!(engine = %self.id, plan = ?plan, "Entering atomic scope");
        match (plan, ambient) {
            (ScopePlan::Share, Some(ambient)) => body(&ambient.handle),
            _ => self.open_scope(ScopeKind::Atomic, body),
        }
    }

    /// Run `body` with one handle shared by every nested call, without
    /// opening a transaction. Work left uncommitted at exit is discarded when
    /// the handle is released.
    pub fn non_atomic<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&EngineHandle<C>) -> Result<T, E>,
        E: From<FancyError>,
    {
        let ambient = self.ambient();
        let plan = plan_non_atomic(ambient.as_ref().map(Ambient::state));
        debug!(engine = %self.id, plan = ?plan, "Entering non-atomic scope");
        match (plan, ambient) {
            (ScopePlan::Share, Some(ambient)) => body(&ambient.handle),
            _ => self.open_scope(ScopeKind::NonAtomic, body),
        }
    }

    fn open_scope<T, E, F>(&self, kind: ScopeKind, body: F) -> Result<T, E>
    where
        F: FnOnce(&EngineHandle<C>) -> Result<T, E>,
        E: From<FancyError>,
    {
        let handle = self.acquire()?;
        let mut guard = Cleanup::new(handle.clone(), true);
        if kind == ScopeKind::Atomic {
            if let Err(e) = guard.begin() {
                return guard.finish(Err(e.into()));
            }
        }

        let outcome = {
            let _scope = enter_thread_scope(self.id, ScopeEntry::new(kind, handle.erase()));
            body(&handle)
        };
        let info = handle.info();
        debug!(
            engine = %self.id,
            handle = %info.id,
            kind = ?kind,
            ok = outcome.is_ok(),
            in_transaction = info.in_transaction,
            age_secs = info.age_secs(),
            "Leaving scope"
        );
        guard.finish(outcome)
    }

    /// Execute on the ambient handle, which must be in a transaction.
    pub fn ax(&self, statement: impl Into<Statement>) -> FancyResult<QueryOutput> {
        let ambient = self.ambient();
        check_ambient_execute("ax", ambient.as_ref().map(Ambient::state), true)?;
        let handle = ambient
            .map(|ambient| ambient.handle)
            .ok_or_else(|| FancyError::no_active_scope("ax"))?;
        handle.execute(&statement.into())
    }

    /// Execute on the ambient handle, or in a single-statement transaction on
    /// a fresh handle when no scope is active.
    pub fn atx(&self, statement: impl Into<Statement>) -> FancyResult<QueryOutput> {
        self.tx(None, statement)
    }

    /// Execute on the ambient handle, or on a fresh handle without a
    /// transaction when no scope is active.
    pub fn nax(&self, statement: impl Into<Statement>) -> FancyResult<QueryOutput> {
        self.x(None, statement)
    }

    /// Execute on `conn`, the ambient handle, or a fresh handle.
    pub fn x(
        &self,
        conn: Option<&EngineHandle<C>>,
        statement: impl Into<Statement>,
    ) -> FancyResult<QueryOutput> {
        let statement = statement.into();
        self.with_connection(Inject::from(conn), |handle| handle.execute(&statement))
    }

    /// Like [`x`](Self::x), but the statement always runs in a transaction.
    pub fn tx(
        &self,
        conn: Option<&EngineHandle<C>>,
        statement: impl Into<Statement>,
    ) -> FancyResult<QueryOutput> {
        let statement = statement.into();
        self.with_transaction(Inject::from(conn), |handle| handle.execute(&statement))
    }

    fn resolve(
        &self,
        inject: Inject<'_, EngineHandle<C>>,
    ) -> FancyResult<(EngineHandle<C>, HandleSource)> {
        let ambient = match inject {
            Inject::Provided(_) => None,
            Inject::Resolve => self.current_handle(),
        };
        let source = resolve_handle(inject.is_provided(), ambient.is_some());
        let handle = match (inject.provided(), ambient) {
            (Some(handle), _) => handle.clone(),
            (None, Some(handle)) => handle,
            (None, None) => self.acquire()?,
        };
        debug!(engine = %self.id, handle = %handle.id(), source = ?source, "Resolved handle");
        Ok((handle, source))
    }

    /// Run `body` with a handle and no forced transaction. A fresh handle is
    /// released when `body` returns.
    pub fn with_connection<T, E, F>(&self, inject: Inject<'_, EngineHandle<C>>, body: F) -> Result<T, E>
    where
        F: FnOnce(&EngineHandle<C>) -> Result<T, E>,
        E: From<FancyError>,
    {
        let (handle, source) = self.resolve(inject)?;
        let guard = Cleanup::new(handle.clone(), source.is_owned());
        let outcome = body(&handle);
        guard.finish(outcome)
    }

    /// Run `body` with a handle that is inside a transaction. A transaction
    /// already open on the handle is joined and left alone; otherwise one is
    /// begun here and finished when `body` returns.
    pub fn with_transaction<T, E, F>(&self, inject: Inject<'_, EngineHandle<C>>, body: F) -> Result<T, E>
    where
        F: FnOnce(&EngineHandle<C>) -> Result<T, E>,
        E: From<FancyError>,
    {
        let (handle, source) = self.resolve(inject)?;
        let plan = plan_transaction(source, handle.in_transaction());
        debug!(engine = %self.id, handle = %handle.id(), plan = ?plan, "Planned transaction");

        let mut guard = Cleanup::new(handle.clone(), source.is_owned());
        if plan.begins() {
            if let Err(e) = guard.begin() {
                return guard.finish(Err(e.into()));
            }
        }
        let outcome = body(&handle);
        guard.finish(outcome)
    }

    /// Wrap `f` so each call runs under [`with_connection`](Self::with_connection).
    pub fn ensure_connection<A, T, E, F>(&self, f: F) -> Connected<C, F>
    where
        F: Fn(&EngineHandle<C>, A) -> Result<T, E>,
        E: From<FancyError>,
    {
        Connected {
            engine: self.clone(),
            f,
        }
    }

    /// Wrap `f` so each call runs under [`with_transaction`](Self::with_transaction).
    pub fn ensure_transaction<A, T, E, F>(&self, f: F) -> Transacted<C, F>
    where
        F: Fn(&EngineHandle<C>, A) -> Result<T, E>,
        E: From<FancyError>,
    {
        Transacted {
            engine: self.clone(),
            f,
        }
    }
}

impl<C: Connector> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            connector: Arc::clone(&self.connector),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("database_type", &self.connector.database_type())
            .finish_non_exhaustive()
    }
}

/// A function that receives a resolved handle. See [`Engine::ensure_connection`].
pub struct Connected<C: Connector, F> {
    engine: Engine<C>,
    f: F,
}

impl<C: Connector, F> Connected<C, F> {
    pub fn call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(&EngineHandle<C>, A) -> Result<T, E>,
        E: From<FancyError>,
    {
        self.call_with(Inject::Resolve, args)
    }

    pub fn call_with<A, T, E>(&self, inject: Inject<'_, EngineHandle<C>>, args: A) -> Result<T, E>
    where
        F: Fn(&EngineHandle<C>, A) -> Result<T, E>,
        E: From<FancyError>,
    {
        self.engine
            .with_connection(inject, |handle| (self.f)(handle, args))
    }
}

/// A function that receives a handle inside a transaction. See
/// [`Engine::ensure_transaction`].
pub struct Transacted<C: Connector, F> {
    engine: Engine<C>,
    f: F,
}

impl<C: Connector, F> Transacted<C, F> {
    pub fn call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(&EngineHandle<C>, A) -> Result<T, E>,
        E: From<FancyError>,
    {
        self.call_with(Inject::Resolve, args)
    }

    pub fn call_with<A, T, E>(&self, inject: Inject<'_, EngineHandle<C>>, args: A) -> Result<T, E>
    where
        F: Fn(&EngineHandle<C>, A) -> Result<T, E>,
        E: From<FancyError>,
    {
        self.engine
            .with_transaction(inject, |handle| (self.f)(handle, args))
    }
}
