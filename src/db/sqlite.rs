//! Blocking SQLite connections over `rusqlite`.

use crate::db::connection::{Connection, Connector};
use crate::db::params::to_rusqlite_value;
use crate::db::types::sqlite_value_to_json;
use crate::error::{FancyError, FancyResult};
use crate::models::{DatabaseType, QueryOutput, Statement};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens one `rusqlite` connection per handle on a database file.
#[derive(Debug, Clone)]
pub struct RusqliteConnector {
    path: PathBuf,
    busy_timeout: Duration,
}

impl RusqliteConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for RusqliteConnector {
    type Connection = RusqliteConnection;

    fn connect(&self) -> FancyResult<RusqliteConnection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(FancyError::connection(
                    format!("Directory {} does not exist", parent.display()),
                    "Create the parent directory before opening the database",
                ));
            }
        }
        let conn = rusqlite::Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        debug!(path = %self.path.display(), "Opened SQLite connection");
        Ok(RusqliteConnection { conn: Some(conn) })
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

/// A single `rusqlite` connection. SQLite reports its own transaction state,
/// so statements such as a raw `COMMIT` are reflected immediately.
pub struct RusqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl RusqliteConnection {
    fn live(&self) -> FancyResult<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| FancyError::internal("SQLite connection already closed"))
    }
}

impl Connection for RusqliteConnection {
    fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| !conn.is_autocommit())
    }

    fn begin(&mut self) -> FancyResult<()> {
        if self.in_transaction() {
            return Err(FancyError::invalid_input(
                "A transaction is already active on this connection",
            ));
        }
        self.live()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> FancyResult<()> {
        self.live()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> FancyResult<()> {
        self.live()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> FancyResult<QueryOutput> {
        let conn = self.live()?;
        let mut stmt = conn.prepare(&statement.sql)?;
        let params = rusqlite::params_from_iter(statement.params.iter().map(to_rusqlite_value));

        // A statement that yields columns is read regardless of the declared
        // kind; otherwise SQLite refuses to step it through `execute`.
        if statement.returns_rows() || stmt.column_count() > 0 {
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut map = serde_json::Map::with_capacity(columns.len());
                for (idx, name) in columns.iter().enumerate() {
                    map.insert(name.clone(), sqlite_value_to_json(row.get_ref(idx)?));
                }
                out.push(map);
            }
            Ok(QueryOutput::with_rows(columns, out))
        } else {
            let affected = stmt.execute(params)?;
            Ok(QueryOutput::write_result(
                affected as u64,
                Some(conn.last_insert_rowid()),
            ))
        }
    }

    fn close(&mut self) -> FancyResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let rollback = if conn.is_autocommit() {
            Ok(())
        } else {
            conn.execute_batch("ROLLBACK").map_err(FancyError::from)
        };
        if let Err((_conn, e)) = conn.close() {
            warn!(error = %e, "SQLite connection did not close cleanly");
            return Err(e.into());
        }
        rollback
    }
}
