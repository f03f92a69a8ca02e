//! Database dispatch macros for reducing code duplication.
//!
//! The pooled-connection enum has one variant per driver. These macros expand
//! the per-driver match arms at compile time.

/// Macro for generating pool dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Same as [`impl_db_dispatch!`] for a checked-out pooled connection.
///
/// The arm body is shared by every driver; use it for code that only relies
/// on the common `sqlx::Executor` surface.
#[macro_export]
macro_rules! with_pooled_conn {
    ($conn:expr, |$c:ident| $body:expr) => {
        match $conn {
            $crate::db::pool::PooledConnection::MySql($c) => $body,
            $crate::db::pool::PooledConnection::Postgres($c) => $body,
            $crate::db::pool::PooledConnection::SQLite($c) => $body,
        }
    };
}

pub use impl_db_dispatch;
pub use with_pooled_conn;
