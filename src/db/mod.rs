//! Database abstraction layer.
//!
//! - Connection traits the resolver is written against
//! - Shared handles over those connections
//! - The sqlx pool backend (non-blocking) and the rusqlite backend (blocking)
//! - Parameter binding and row decoding

pub mod connection;
pub mod handle;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod sqlite;
pub mod types;

pub use connection::{AsyncConnection, AsyncConnector, Connection, Connector};
pub use handle::{AsyncHandle, Handle};
pub use pool::{DbPool, SqlxConnection, SqlxConnector};
pub use sqlite::{RusqliteConnection, RusqliteConnector};
