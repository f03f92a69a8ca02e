//! fancy-sqlx
//!
//! Connection and transaction propagation for `sqlx` (non-blocking) and
//! `rusqlite` (blocking), plus a small declarative table builder.
//!
//! The resolver decides, for every call that needs a database handle, whether
//! to use the handle the caller passed in, the handle of an enclosing
//! `atomic()` / `non_atomic()` scope, or a fresh one that it opens and
//! releases itself.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod resolver;
pub mod schema;

pub use config::{Config, EngineConfig};
pub use db::{AsyncHandle, Handle, RusqliteConnector, SqlxConnector};
pub use error::{FancyError, FancyResult};
pub use models::{QueryOutput, QueryParam, Statement};
pub use resolver::{AsyncEngine, Engine, Inject};
pub use schema::{Column, MetaData, Table, TableBuilder};
