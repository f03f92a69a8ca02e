//! Driver-facing connection traits.
//!
//! The resolver only needs a handful of things from a connection: whether it
//! is inside a transaction, the ability to begin/commit/roll back, to run a
//! statement and to be released. Backends implement these traits; the
//! resolver never touches driver types directly.

use crate::error::FancyResult;
use crate::models::{DatabaseType, QueryOutput, Statement};
use std::future::Future;

/// A blocking database connection.
pub trait Connection: Send + 'static {
    fn in_transaction(&self) -> bool;

    fn begin(&mut self) -> FancyResult<()>;

    fn commit(&mut self) -> FancyResult<()>;

    fn rollback(&mut self) -> FancyResult<()>;

    fn execute(&mut self, statement: &Statement) -> FancyResult<QueryOutput>;

    /// Release the connection. An open transaction is rolled back first.
    fn close(&mut self) -> FancyResult<()>;
}

/// Produces blocking connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self) -> FancyResult<Self::Connection>;

    fn database_type(&self) -> DatabaseType;
}

/// A non-blocking database connection.
pub trait AsyncConnection: Send + 'static {
    fn in_transaction(&self) -> bool;

    fn begin(&mut self) -> impl Future<Output = FancyResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = FancyResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = FancyResult<()>> + Send;

    fn execute(
        &mut self,
        statement: &Statement,
    ) -> impl Future<Output = FancyResult<QueryOutput>> + Send;

    /// Release the connection. An open transaction is rolled back first.
    fn close(&mut self) -> impl Future<Output = FancyResult<()>> + Send;
}

/// Produces non-blocking connections.
pub trait AsyncConnector: Send + Sync + 'static {
    type Connection: AsyncConnection;

    fn connect(&self) -> impl Future<Output = FancyResult<Self::Connection>> + Send;

    fn database_type(&self) -> DatabaseType;
}
