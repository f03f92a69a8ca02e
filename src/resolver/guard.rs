//! Cleanup guards for resolver-owned handles and transactions.
//!
//! A guard records what the resolver opened for a call (the handle, the
//! transaction, or both) and finishes exactly those at call exit. If the call
//! never reaches [`finish`](Cleanup::finish) because the body panicked or the
//! future was dropped, the guard's `Drop` rolls back and releases instead.

use crate::db::connection::{AsyncConnection, Connection};
use crate::db::handle::{AsyncHandle, Handle};
use crate::error::{FancyError, FancyResult};
use tracing::{debug, warn};

/// Guard for a blocking handle.
///
/// `owns_transaction` and `owns_handle` are cleared only once the matching
/// cleanup step has run, so whatever is still set when the guard drops is
/// exactly what is left to undo.
pub(crate) struct Cleanup<C: Connection> {
    handle: Handle<C>,
    owns_transaction: bool,
    owns_handle: bool,
}

impl<C: Connection> Cleanup<C> {
    pub(crate) fn new(handle: Handle<C>, owns_handle: bool) -> Self {
        Self {
            handle,
            owns_transaction: false,
            owns_handle,
        }
    }

    /// Begin a transaction that this guard will finish.
    pub(crate) fn begin(&mut self) -> FancyResult<()> {
        self.owns_transaction = true;
        let result = self.handle.begin();
        self.owns_transaction = result.is_ok();
        result
    }

    /// Commit on success, roll back on failure, then release an owned handle.
    ///
    /// A body error is returned unchanged; cleanup failures behind it are only
    /// logged. On success a commit or close failure becomes the result.
    pub(crate) fn finish<T, E: From<FancyError>>(mut self, outcome: Result<T, E>) -> Result<T, E> {
        match outcome {
            Ok(value) => {
                self.complete().map_err(E::from)?;
                Ok(value)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn complete(&mut self) -> FancyResult<()> {
        // The body may have committed or rolled back on its own.
        if self.owns_transaction && self.handle.in_transaction() {
            if let Err(e) = self.handle.commit() {
                self.abort();
                return Err(e);
            }
            debug!(handle = %self.handle.id(), "Committed transaction");
        }
        self.owns_transaction = false;
        if self.owns_handle {
            let closed = self.handle.close();
            self.owns_handle = false;
            closed?;
            debug!(handle = %self.handle.id(), "Released handle");
        }
        Ok(())
    }

    fn abort(&mut self) {
        if self.owns_transaction && self.handle.in_transaction() {
            match self.handle.rollback() {
                Ok(()) => debug!(handle = %self.handle.id(), "Rolled back transaction"),
                Err(e) => warn!(handle = %self.handle.id(), error = %e, "Rollback failed"),
            }
        }
        self.owns_transaction = false;
        if self.owns_handle {
            if let Err(e) = self.handle.close() {
                warn!(handle = %self.handle.id(), error = %e, "Failed to release handle");
            }
        }
        self.owns_handle = false;
    }

    fn owns_anything(&self) -> bool {
        self.owns_transaction || self.owns_handle
    }
}

impl<C: Connection> Drop for Cleanup<C> {
    fn drop(&mut self) {
        if !self.owns_anything() {
            return;
        }
        warn!(
            handle = %self.handle.id(),
            "Scope exited without finishing; rolling back and releasing"
        );
        self.abort();
    }
}

/// Guard for a non-blocking handle. Same ownership rules as [`Cleanup`]; a
/// future dropped at any await point, including mid-commit, leaves the
/// remaining steps to `Drop`.
pub(crate) struct AsyncCleanup<C: AsyncConnection> {
    handle: AsyncHandle<C>,
    owns_transaction: bool,
    owns_handle: bool,
}

impl<C: AsyncConnection> AsyncCleanup<C> {
    pub(crate) fn new(handle: AsyncHandle<C>, owns_handle: bool) -> Self {
        Self {
            handle,
            owns_transaction: false,
            owns_handle,
        }
    }

    pub(crate) async fn begin(&mut self) -> FancyResult<()> {
        // Claimed before the await: a BEGIN cut short may still have started.
        self.owns_transaction = true;
        let result = self.handle.begin().await;
        self.owns_transaction = result.is_ok();
        result
    }

    /// See [`Cleanup::finish`].
    pub(crate) async fn finish<T, E: From<FancyError>>(
        mut self,
        outcome: Result<T, E>,
    ) -> Result<T, E> {
        match outcome {
            Ok(value) => {
                self.complete().await.map_err(E::from)?;
                Ok(value)
            }
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn complete(&mut self) -> FancyResult<()> {
        if self.owns_transaction && self.handle.in_transaction() {
            if let Err(e) = self.handle.commit().await {
                self.abort().await;
                return Err(e);
            }
            debug!(handle = %self.handle.id(), "Committed transaction");
        }
        self.owns_transaction = false;
        if self.owns_handle {
            let closed = self.handle.close().await;
            self.owns_handle = false;
            closed?;
            debug!(handle = %self.handle.id(), "Released handle");
        }
        Ok(())
    }

    async fn abort(&mut self) {
        if self.owns_transaction && self.handle.in_transaction() {
            match self.handle.rollback().await {
                Ok(()) => debug!(handle = %self.handle.id(), "Rolled back transaction"),
                Err(e) => warn!(handle = %self.handle.id(), error = %e, "Rollback failed"),
            }
        }
        self.owns_transaction = false;
        if self.owns_handle {
            if let Err(e) = self.handle.close().await {
                warn!(handle = %self.handle.id(), error = %e, "Failed to release handle");
            }
        }
        self.owns_handle = false;
    }
}

impl<C: AsyncConnection> Drop for AsyncCleanup<C> {
    fn drop(&mut self) {
        if !self.owns_transaction && !self.owns_handle {
            return;
        }

        // The owning future was dropped mid-scope; finish on the runtime.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let mut rest = AsyncCleanup {
                    handle: self.handle.clone(),
                    owns_transaction: std::mem::take(&mut self.owns_transaction),
                    owns_handle: std::mem::take(&mut self.owns_handle),
                };
                runtime.spawn(async move {
                    rest.abort().await;
                    warn!(
                        handle = %rest.handle.id(),
                        "Scope cancelled; transaction rolled back and handle released via Drop"
                    );
                });
            }
            Err(_) => warn!(
                handle = %self.handle.id(),
                "Scope cancelled outside a tokio runtime; handle left to its connection's Drop"
            ),
        }
    }
}
