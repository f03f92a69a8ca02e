//! Shared connection handles.
//!
//! A handle is a cheaply clonable reference to one live connection. Clones
//! refer to the same connection, so a handle can be published as an ambient
//! scope and handed to nested calls. The underlying connection is locked only
//! for the duration of a single driver call; holding a handle never blocks
//! other holders between calls.

use crate::db::connection::{AsyncConnection, Connection};
use crate::error::{FancyError, FancyResult};
use crate::models::{HandleInfo, QueryOutput, Statement};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Type-erased handle, as stored in ambient scope storage.
pub(crate) type ErasedHandle = Arc<dyn Any + Send + Sync>;

struct Shared<M> {
    id: Uuid,
    opened_at: DateTime<Utc>,
    closed: AtomicBool,
    /// Mirror of the driver's transaction state, refreshed after every call.
    in_transaction: AtomicBool,
    conn: M,
}

impl<M> Shared<M> {
    fn new(conn: M, in_transaction: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            closed: AtomicBool::new(false),
            in_transaction: AtomicBool::new(in_transaction),
            conn,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn info(&self) -> HandleInfo {
        HandleInfo {
            id: self.id,
            opened_at: self.opened_at,
            in_transaction: !self.is_closed() && self.in_transaction.load(Ordering::Acquire),
            closed: self.is_closed(),
        }
    }
}

// =============================================================================
// Blocking handle
// =============================================================================

/// Shared handle over a blocking [`Connection`].
pub struct Handle<C> {
    shared: Arc<Shared<Mutex<C>>>,
}

impl<C: Connection> Handle<C> {
    /// Wrap a connection. The caller owns the result and is responsible for
    /// [`close`](Self::close).
    pub fn new(conn: C) -> Self {
        let in_transaction = conn.in_transaction();
        Self {
            shared: Arc::new(Shared::new(Mutex::new(conn), in_transaction)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Whether the connection currently has an open transaction.
    pub fn in_transaction(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let conn = self.lock();
        let in_transaction = conn.in_transaction();
        self.shared
            .in_transaction
            .store(in_transaction, Ordering::Release);
        in_transaction
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// True when both handles refer to the same connection.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn info(&self) -> HandleInfo {
        self.shared.info()
    }

    pub fn begin(&self) -> FancyResult<()> {
        self.with_conn(|conn| conn.begin())
    }

    pub fn commit(&self) -> FancyResult<()> {
        self.with_conn(|conn| conn.commit())
    }

    pub fn rollback(&self) -> FancyResult<()> {
        self.with_conn(|conn| conn.rollback())
    }

    pub fn execute(&self, statement: &Statement) -> FancyResult<QueryOutput> {
        self.with_conn(|conn| conn.execute(statement))
    }

    /// Release the connection. Closing twice is a no-op.
    pub fn close(&self) -> FancyResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut conn = self.lock();
        let result = conn.close();
        self.shared.in_transaction.store(false, Ordering::Release);
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, C> {
        // A panic inside a driver call leaves the connection usable; the
        // driver reports its own state on the next call.
        self.shared.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<R>(&self, op: impl FnOnce(&mut C) -> FancyResult<R>) -> FancyResult<R> {
        if self.is_closed() {
            return Err(FancyError::handle_closed(self.id()));
        }
        let mut conn = self.lock();
        let result = op(&mut conn);
        self.shared
            .in_transaction
            .store(conn.in_transaction(), Ordering::Release);
        result
    }

    pub(crate) fn erase(&self) -> ErasedHandle {
        self.shared.clone()
    }

    pub(crate) fn restore(erased: &ErasedHandle) -> Option<Self> {
        Arc::clone(erased)
            .downcast::<Shared<Mutex<C>>>()
            .ok()
            .map(|shared| Self { shared })
    }
}

impl<C> Clone for Handle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> std::fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.shared.id)
            .field("in_transaction", &self.shared.in_transaction.load(Ordering::Relaxed))
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Non-blocking handle
// =============================================================================

/// Shared handle over an [`AsyncConnection`].
pub struct AsyncHandle<C> {
    shared: Arc<Shared<tokio::sync::Mutex<C>>>,
}

impl<C: AsyncConnection> AsyncHandle<C> {
    /// Wrap a connection. The caller owns the result and is responsible for
    /// [`close`](Self::close).
    pub fn new(conn: C) -> Self {
        let in_transaction = conn.in_transaction();
        Self {
            shared: Arc::new(Shared::new(tokio::sync::Mutex::new(conn), in_transaction)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Whether the connection had an open transaction after its last call.
    pub fn in_transaction(&self) -> bool {
        !self.is_closed() && self.shared.in_transaction.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// True when both handles refer to the same connection.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn info(&self) -> HandleInfo {
        self.shared.info()
    }

    pub async fn begin(&self) -> FancyResult<()> {
        let mut conn = self.lock_open().await?;
        // Stays set if this future is dropped before BEGIN returns.
        self.shared.in_transaction.store(true, Ordering::Release);
        let result = conn.begin().await;
        self.refresh(&conn);
        result
    }

    pub async fn commit(&self) -> FancyResult<()> {
        let mut conn = self.lock_open().await?;
        let result = conn.commit().await;
        self.refresh(&conn);
        result
    }

    pub async fn rollback(&self) -> FancyResult<()> {
        let mut conn = self.lock_open().await?;
        let result = conn.rollback().await;
        self.refresh(&conn);
        result
    }

    pub async fn execute(&self, statement: &Statement) -> FancyResult<QueryOutput> {
        let mut conn = self.lock_open().await?;
        let result = conn.execute(statement).await;
        self.refresh(&conn);
        result
    }

    /// Release the connection. Closing twice is a no-op.
    ///
    /// The handle only counts as closed once the driver call has returned, so
    /// a close cut short by cancellation can be retried.
    pub async fn close(&self) -> FancyResult<()> {
        let mut conn = self.shared.conn.lock().await;
        if self.is_closed() {
            return Ok(());
        }
        let result = conn.close().await;
        self.shared.closed.store(true, Ordering::Release);
        self.shared.in_transaction.store(false, Ordering::Release);
        result
    }

    async fn lock_open(&self) -> FancyResult<tokio::sync::MutexGuard<'_, C>> {
        if self.is_closed() {
            return Err(FancyError::handle_closed(self.id()));
        }
        let conn = self.shared.conn.lock().await;
        // Closed while we waited for the lock.
        if self.is_closed() {
            return Err(FancyError::handle_closed(self.id()));
        }
        Ok(conn)
    }

    fn refresh(&self, conn: &C) {
        self.shared
            .in_transaction
            .store(conn.in_transaction(), Ordering::Release);
    }

    pub(crate) fn erase(&self) -> ErasedHandle {
        self.shared.clone()
    }

    pub(crate) fn restore(erased: &ErasedHandle) -> Option<Self> {
        Arc::clone(erased)
            .downcast::<Shared<tokio::sync::Mutex<C>>>()
            .ok()
            .map(|shared| Self { shared })
    }
}

impl<C> Clone for AsyncHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> std::fmt::Debug for AsyncHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("id", &self.shared.id)
            .field("in_transaction", &self.shared.in_transaction.load(Ordering::Relaxed))
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}
