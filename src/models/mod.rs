//! Data models shared by the resolver and the backends.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, HandleInfo, mask_connection_string};
pub use query::{
    DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryOutput, QueryParam, Statement,
    StatementKind,
};
