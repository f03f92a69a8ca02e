//! Non-blocking engine.
//!
//! Same decisions as [`Engine`](super::Engine), carried out over an
//! [`AsyncConnector`]. Ambient scopes are task-local and bound to the future
//! that entered them, so concurrent call chains on one engine never share a
//! handle by accident.

use super::guard::AsyncCleanup;
use super::inject::Inject;
use super::scope::{ScopeEntry, ScopeKind, current_task_scope, enter_task_scope};
use super::{
    AmbientState, HandleSource, ScopePlan, check_ambient_execute, plan_atomic, plan_non_atomic,
    plan_transaction, resolve_handle,
};
use crate::db::connection::AsyncConnector;
use crate::db::handle::AsyncHandle;
use crate::error::{FancyError, FancyResult};
use crate::models::{DatabaseType, QueryOutput, Statement};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Handle type produced by an [`AsyncEngine`] over `C`.
pub type AsyncEngineHandle<C> = AsyncHandle<<C as AsyncConnector>::Connection>;

struct Ambient<C: AsyncConnector> {
    kind: ScopeKind,
    handle: AsyncEngineHandle<C>,
}

impl<C: AsyncConnector> Ambient<C> {
    fn state(&self) -> AmbientState {
        AmbientState {
            kind: self.kind,
            in_transaction: self.handle.in_transaction(),
        }
    }
}

/// Non-blocking resolver bound to one connector.
pub struct AsyncEngine<C: AsyncConnector> {
    id: Uuid,
    connector: Arc<C>,
}

impl<C: AsyncConnector> AsyncEngine<C> {
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
    pub async fn acquire(&self) -> FancyResult<AsyncEngineHandle<C>> {
        let handle = AsyncHandle::new(self.connector.connect().await?);
        debug!(engine = %self.id, handle = %handle.id(), "Acquired handle");
        Ok(handle)
    }

    /// The handle published by the innermost scope of the current call chain.
    pub fn current_handle(&self) -> Option<AsyncEngineHandle<C>> {
        self.ambient().map(|ambient| ambient.handle)
    }

    fn ambient(&self) -> Option<Ambient<C>> {
        let entry = current_task_scope(self.id)?;
        AsyncHandle::restore(&entry.handle).map(|handle| Ambient {
            kind: entry.kind,
            handle,
        })
    }

    /// Run `body` inside a transaction shared by every nested call on this
    /// engine within the same call chain.
    ///
    /// The outermost scope commits on `Ok`, rolls back on `Err`, and releases
    /// the handle either way. If the returned future is dropped before it
    /// completes, the rollback and release run on the tokio runtime.
    pub async fn atomic<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(AsyncEngineHandle<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        let ambient = self.ambient();
        let plan = plan_atomic(ambient.as_ref().map(Ambient::state))?;
        debug!(engine = %self.id, plan = ?plan, "Entering atomic scope");
        match (plan, ambient) {
            (ScopePlan::Share, Some(ambient)) => body(ambient.handle).await,
            _ => self.open_scope(ScopeKind::Atomic, body).await,
        }
    }

    /// Run `body` with one handle shared by nested calls, without opening a
    /// transaction.
    pub async fn non_atomic<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(AsyncEngineHandle<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        let ambient = self.ambient();
        let plan = plan_non_atomic(ambient.as_ref().map(Ambient::state));
        debug!(engine = %self.id, plan = ?plan, "Entering non-atomic scope");
        match (plan, ambient) {
            (ScopePlan::Share, Some(ambient)) => body(ambient.handle).await,
            _ => self.open_scope(ScopeKind::NonAtomic, body).await,
        }
    }

    async fn open_scope<T, E, F, Fut>(&self, kind: ScopeKind, body: F) -> Result<T, E>
    where
        F: FnOnce(AsyncEngineHandle<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        let handle = self.acquire().await?;
        let mut guard = AsyncCleanup::new(handle.clone(), true);
        if kind == ScopeKind::Atomic {
            if let Err(e) = guard.begin().await {
                return guard.finish(Err(e.into())).await;
            }
        }

        let entry = ScopeEntry::new(kind, handle.erase());
        let scoped = handle.clone();
        let outcome = enter_task_scope(self.id, entry, async move { body(scoped).await }).await;
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
        guard.finish(outcome).await
    }

    /// Execute on the ambient handle, which must be in a transaction.
    pub async fn ax(&self, statement: impl Into<Statement>) -> FancyResult<QueryOutput> {
        let ambient = self.ambient();
        check_ambient_execute("ax", ambient.as_ref().map(Ambient::state), true)?;
        let handle = ambient
            .map(|ambient| ambient.handle)
            .ok_or_else(|| FancyError::no_active_scope("ax"))?;
        handle.execute(&statement.into()).await
    }

    /// Execute on the ambient handle, or in a single-statement transaction on
    /// a fresh handle when no scope is active.
    pub async fn atx(&self, statement: impl Into<Statement>) -> FancyResult<QueryOutput> {
        self.tx(None, statement).await
    }

    /// Execute on the ambient handle, or on a fresh handle without a
    /// transaction when no scope is active.
    pub async fn nax(&self, statement: impl Into<Statement>) -> FancyResult<QueryOutput> {
        self.x(None, statement).await
    }

    /// Execute on `conn`, the ambient handle, or a fresh handle.
    pub async fn x(
        &self,
        conn: Option<&AsyncEngineHandle<C>>,
        statement: impl Into<Statement>,
    ) -> FancyResult<QueryOutput> {
        let statement = statement.into();
        self.with_connection(Inject::from(conn), move |handle| async move {
            handle.execute(&statement).await
        })
        .await
    }

    /// Like [`x`](Self::x), but the statement always runs in a transaction.
    pub async fn tx(
        &self,
        conn: Option<&AsyncEngineHandle<C>>,
        statement: impl Into<Statement>,
    ) -> FancyResult<QueryOutput> {
        let statement = statement.into();
        self.with_transaction(Inject::from(conn), move |handle| async move {
            handle.execute(&statement).await
        })
        .await
    }

    async fn resolve(
        &self,
        inject: Inject<'_, AsyncEngineHandle<C>>,
    ) -> FancyResult<(AsyncEngineHandle<C>, HandleSource)> {
        let ambient = match inject {
            Inject::Provided(_) => None,
            Inject::Resolve => self.current_handle(),
        };
        let source = resolve_handle(inject.is_provided(), ambient.is_some());
        let handle = match (inject.provided(), ambient) {
            (Some(handle), _) => handle.clone(),
            (None, Some(handle)) => handle,
            (None, None) => self.acquire().await?,
        };
        debug!(engine = %self.id, handle = %handle.id(), source = ?source, "Resolved handle");
        Ok((handle, source))
    }

    /// Run `body` with a handle and no forced transaction. A fresh handle is
    /// released when `body` completes.
    pub async fn with_connection<T, E, F, Fut>(
        &self,
        inject: Inject<'_, AsyncEngineHandle<C>>,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(AsyncEngineHandle<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        let (handle, source) = self.resolve(inject).await?;
        let guard = AsyncCleanup::new(handle.clone(), source.is_owned());
        let outcome = body(handle).await;
        guard.finish(outcome).await
    }

    /// Run `body` with a handle that is inside a transaction, joining one that
    /// is already open.
    pub async fn with_transaction<T, E, F, Fut>(
        &self,
        inject: Inject<'_, AsyncEngineHandle<C>>,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(AsyncEngineHandle<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        let (handle, source) = self.resolve(inject).await?;
        let plan = plan_transaction(source, handle.in_transaction());
        debug!(engine = %self.id, handle = %handle.id(), plan = ?plan, "Planned transaction");

        let mut guard = AsyncCleanup::new(handle.clone(), source.is_owned());
        if plan.begins() {
            if let Err(e) = guard.begin().await {
                return guard.finish(Err(e.into())).await;
            }
        }
        let outcome = body(handle).await;
        guard.finish(outcome).await
    }

    /// Wrap `f` so each call runs under [`with_connection`](Self::with_connection).
    pub fn ensure_connection<A, T, E, F, Fut>(&self, f: F) -> AsyncConnected<C, F>
    where
        F: Fn(AsyncEngineHandle<C>, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        AsyncConnected {
            engine: self.clone(),
            f,
        }
    }

    /// Wrap `f` so each call runs under [`with_transaction`](Self::with_transaction).
    pub fn ensure_transaction<A, T, E, F, Fut>(&self, f: F) -> AsyncTransacted<C, F>
    where
        F: Fn(AsyncEngineHandle<C>, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        AsyncTransacted {
            engine: self.clone(),
            f,
        }
    }
}

impl<C: AsyncConnector> Clone for AsyncEngine<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            connector: Arc::clone(&self.connector),
        }
    }
}

impl<C: AsyncConnector> std::fmt::Debug for AsyncEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncEngine")
            .field("id", &self.id)
            .field("database_type", &self.connector.database_type())
            .finish_non_exhaustive()
    }
}

/// An async function that receives a resolved handle.
pub struct AsyncConnected<C: AsyncConnector, F> {
    engine: AsyncEngine<C>,
    f: F,
}

impl<C: AsyncConnector, F> AsyncConnected<C, F> {
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(AsyncEngineHandle<C>, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        self.call_with(Inject::Resolve, args).await
    }

    pub async fn call_with<A, T, E, Fut>(
        &self,
        inject: Inject<'_, AsyncEngineHandle<C>>,
        args: A,
    ) -> Result<T, E>
    where
        F: Fn(AsyncEngineHandle<C>, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        self.engine
            .with_connection(inject, |handle| (self.f)(handle, args))
            .await
    }
}

/// An async function that receives a handle inside a transaction.
pub struct AsyncTransacted<C: AsyncConnector, F> {
    engine: AsyncEngine<C>,
    f: F,
}

impl<C: AsyncConnector, F> AsyncTransacted<C, F> {
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(AsyncEngineHandle<C>, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        self.call_with(Inject::Resolve, args).await
    }

    pub async fn call_with<A, T, E, Fut>(
        &self,
        inject: Inject<'_, AsyncEngineHandle<C>>,
        args: A,
    ) -> Result<T, E>
    where
        F: Fn(AsyncEngineHandle<C>, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FancyError>,
    {
        self.engine
            .with_transaction(inject, |handle| (self.f)(handle, args))
            .await
    }
}
