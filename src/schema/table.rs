//! Table builder, tables and metadata.

use super::column::{Column, ColumnDef, ColumnSpec, ColumnType, SqlDefault};
use crate::db::connection::{AsyncConnector, Connector};
use crate::error::{FancyError, FancyResult};
use crate::models::{DatabaseType, Statement};
use crate::resolver::{AsyncEngine, Engine, Inject};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// A built table: an ordered list of columns under a name.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Arc<ColumnDef>>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().map(|def| &def.spec)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns().find(|spec| spec.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.columns().find(|spec| spec.primary_key)
    }

    fn index_name(&self, column: &str) -> String {
        format!("ix_{}_{}", self.name, column)
    }

    /// `CREATE TABLE IF NOT EXISTS` followed by one `CREATE INDEX` per indexed
    /// column. MySQL has no `CREATE INDEX IF NOT EXISTS`, so its indexes are
    /// declared inside the table body instead.
    pub fn create_statements(&self, db: DatabaseType) -> Vec<String> {
        let mut body: Vec<String> = self.columns().map(|spec| spec.definition_sql(db)).collect();

        let indexed: Vec<&ColumnSpec> = self
            .columns()
            .filter(|spec| spec.index && !spec.primary_key && !spec.unique)
            .collect();
        if db == DatabaseType::MySQL {
            for spec in &indexed {
                body.push(format!(
                    "INDEX {} ({})",
                    db.quote_ident(&self.index_name(&spec.name)),
                    db.quote_ident(&spec.name)
                ));
            }
        }

        for spec in self.columns() {
            if let Some(target) = &spec.references {
                body.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    db.quote_ident(&spec.name),
                    db.quote_ident(&target.table),
                    db.quote_ident(&target.column)
                ));
            }
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            db.quote_ident(&self.name),
            body.join(", ")
        )];
        if db != DatabaseType::MySQL {
            statements.extend(indexed.iter().map(|spec| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    db.quote_ident(&self.index_name(&spec.name)),
                    db.quote_ident(&self.name),
                    db.quote_ident(&spec.name)
                )
            }));
        }
        statements
    }

    pub fn drop_statement(&self, db: DatabaseType) -> String {
        format!("DROP TABLE IF EXISTS {}", db.quote_ident(&self.name))
    }
}

/// The tables built so far, in creation order.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    tables: Vec<Table>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn create_statements(&self, db: DatabaseType) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|table| table.create_statements(db))
            .collect()
    }

    /// Drops in reverse creation order so referencing tables go first.
    pub fn drop_statements(&self, db: DatabaseType) -> Vec<String> {
        self.tables
            .iter()
            .rev()
            .map(|table| table.drop_statement(db))
            .collect()
    }

    /// Create every table in one transaction, joining the ambient one if a
    /// scope is active.
    pub fn create_all<C: Connector>(&self, engine: &Engine<C>) -> FancyResult<()> {
        let statements = self.create_statements(engine.database_type());
        info!(tables = self.tables.len(), "Creating tables");
        engine.with_transaction(Inject::Resolve, |handle| {
            for sql in &statements {
                debug!(sql = %sql, "DDL");
                handle.execute(&Statement::new(sql.as_str()))?;
            }
            Ok(())
        })
    }

    pub fn drop_all<C: Connector>(&self, engine: &Engine<C>) -> FancyResult<()> {
        let statements = self.drop_statements(engine.database_type());
        info!(tables = self.tables.len(), "Dropping tables");
        engine.with_transaction(Inject::Resolve, |handle| {
            for sql in &statements {
                handle.execute(&Statement::new(sql.as_str()))?;
            }
            Ok(())
        })
    }

    pub async fn create_all_async<C: AsyncConnector>(
        &self,
        engine: &AsyncEngine<C>,
    ) -> FancyResult<()> {
        let statements = self.create_statements(engine.database_type());
        info!(tables = self.tables.len(), "Creating tables");
        engine
            .with_transaction(Inject::Resolve, |handle| async move {
                for sql in &statements {
                    debug!(sql = %sql, "DDL");
                    handle.execute(&Statement::new(sql.as_str())).await?;
                }
                Ok(())
            })
            .await
    }

    pub async fn drop_all_async<C: AsyncConnector>(
        &self,
        engine: &AsyncEngine<C>,
    ) -> FancyResult<()> {
        let statements = self.drop_statements(engine.database_type());
        info!(tables = self.tables.len(), "Dropping tables");
        engine
            .with_transaction(Inject::Resolve, |handle| async move {
                for sql in &statements {
                    handle.execute(&Statement::new(sql.as_str())).await?;
                }
                Ok(())
            })
            .await
    }
}

/// Collects columns until [`table`](Self::table) turns them into a [`Table`].
///
/// ```
/// use fancy_sqlx::schema::TableBuilder;
///
/// let mut tb = TableBuilder::new();
/// let id = tb.auto_id("id");
/// let name = tb.string("name");
/// let users = tb.table("users").unwrap();
///
/// assert_eq!(users.name(), "users");
/// assert_eq!(id.qualified(), "users.id");
/// assert_eq!(name.table(), Some("users"));
/// ```
#[derive(Debug, Default)]
pub struct TableBuilder {
    metadata: MetaData,
    pending: Vec<Arc<ColumnDef>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue registering tables into existing metadata.
    pub fn with_metadata(metadata: MetaData) -> Self {
        Self {
            metadata,
            pending: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn into_metadata(self) -> MetaData {
        self.metadata
    }

    /// Queue an arbitrary column spec.
    pub fn col<T>(&mut self, spec: ColumnSpec) -> Column<T> {
        let def = Arc::new(ColumnDef {
            spec,
            table: OnceLock::new(),
        });
        self.pending.push(Arc::clone(&def));
        Column::new(def)
    }

    fn typed<T>(&mut self, name: &str, column_type: ColumnType) -> Column<T> {
        self.col(ColumnSpec::new(name, column_type))
    }

    pub fn integer(&mut self, name: &str) -> Column<i64> {
        self.typed(name, ColumnType::Integer)
    }

    pub fn bigint(&mut self, name: &str) -> Column<i64> {
        self.typed(name, ColumnType::BigInt)
    }

    pub fn smallint(&mut self, name: &str) -> Column<i16> {
        self.typed(name, ColumnType::SmallInt)
    }

    pub fn string(&mut self, name: &str) -> Column<String> {
        self.typed(name, ColumnType::String { length: None })
    }

    pub fn text(&mut self, name: &str) -> Column<String> {
        self.typed(name, ColumnType::Text)
    }

    pub fn float(&mut self, name: &str) -> Column<f64> {
        self.typed(name, ColumnType::Float)
    }

    /// Decimal values travel as text to keep their precision.
    pub fn numeric(&mut self, name: &str) -> Column<String> {
        self.typed(name, ColumnType::Numeric { precision: None })
    }

    pub fn boolean(&mut self, name: &str) -> Column<bool> {
        self.typed(name, ColumnType::Boolean)
    }

    pub fn boolean_true(&mut self, name: &str) -> Column<bool> {
        self.col(ColumnSpec::new(name, ColumnType::Boolean).default(SqlDefault::Bool(true)))
    }

    pub fn boolean_false(&mut self, name: &str) -> Column<bool> {
        self.col(ColumnSpec::new(name, ColumnType::Boolean).default(SqlDefault::Bool(false)))
    }

    pub fn date(&mut self, name: &str) -> Column<NaiveDate> {
        self.typed(name, ColumnType::Date)
    }

    pub fn time(&mut self, name: &str) -> Column<NaiveTime> {
        self.typed(name, ColumnType::Time)
    }

    pub fn datetime(&mut self, name: &str) -> Column<DateTime<Utc>> {
        self.typed(name, ColumnType::DateTime)
    }

    pub fn timestamp(&mut self, name: &str) -> Column<DateTime<Utc>> {
        self.typed(name, ColumnType::Timestamp)
    }

    /// Date column defaulting to the current date.
    pub fn today(&mut self, name: &str) -> Column<NaiveDate> {
        self.col(ColumnSpec::new(name, ColumnType::Date).default(SqlDefault::CurrentDate))
    }

    /// Time column defaulting to the current time.
    pub fn timenow(&mut self, name: &str) -> Column<NaiveTime> {
        self.col(ColumnSpec::new(name, ColumnType::Time).default(SqlDefault::CurrentTime))
    }

    /// Datetime column defaulting to the current timestamp.
    pub fn now(&mut self, name: &str) -> Column<DateTime<Utc>> {
        self.col(ColumnSpec::new(name, ColumnType::DateTime).default(SqlDefault::CurrentTimestamp))
    }

    pub fn json(&mut self, name: &str) -> Column<serde_json::Value> {
        self.typed(name, ColumnType::Json)
    }

    pub fn enumeration(&mut self, name: &str, variants: &[&str]) -> Column<String> {
        let variants = variants.iter().map(|v| v.to_string()).collect();
        self.typed(name, ColumnType::Enum { variants })
    }

    /// Column referencing `target`, with the target's type. The target's
    /// table must already be built.
    pub fn foreign_key<T>(&mut self, name: &str, target: &Column<T>) -> FancyResult<Column<T>> {
        let table = target.table().ok_or_else(|| {
            FancyError::schema(
                "Foreign key target belongs to a table that has not been built",
                target.name(),
            )
        })?;
        let spec = ColumnSpec::new(name, target.spec().column_type.clone())
            .references(table, target.name());
        Ok(self.col(spec))
    }

    /// Auto-incrementing integer primary key.
    pub fn auto_id(&mut self, name: &str) -> Column<i64> {
        self.col(
            ColumnSpec::new(name, ColumnType::Integer)
                .primary_key()
                .autoincrement()
                .index(),
        )
    }

    pub fn created_at(&mut self, name: &str) -> Column<DateTime<Utc>> {
        self.now(name)
    }

    /// Defaults to the current timestamp; refreshed on update where the
    /// dialect supports `ON UPDATE`.
    pub fn updated_at(&mut self, name: &str) -> Column<DateTime<Utc>> {
        self.col(
            ColumnSpec::new(name, ColumnType::DateTime)
                .default(SqlDefault::CurrentTimestamp)
                .on_update(SqlDefault::CurrentTimestamp),
        )
    }

    /// Build a table from every column queued since the previous table and
    /// register it in the metadata.
    pub fn table(&mut self, name: &str) -> FancyResult<Table> {
        let columns = std::mem::take(&mut self.pending);
        if columns.is_empty() {
            return Err(FancyError::schema("Table has no columns", name));
        }
        if self.metadata.table(name).is_some() {
            return Err(FancyError::schema("Table is already defined", name));
        }
        // Keys are rendered on the column itself.
        if columns.iter().filter(|def| def.spec.primary_key).count() > 1 {
            return Err(FancyError::schema(
                "Composite primary keys are not supported; declare a unique index instead",
                name,
            ));
        }
        let mut seen = HashSet::new();
        for def in &columns {
            if !seen.insert(def.spec.name.as_str()) {
                return Err(FancyError::schema(
                    format!("Duplicate column '{}'", def.spec.name),
                    name,
                ));
            }
        }

        for def in &columns {
            // A column only ever sits in one pending batch.
            let _ = def.table.set(name.to_string());
        }
        let table = Table {
            name: name.to_string(),
            columns,
        };
        debug!(table = %name, columns = table.columns.len(), "Built table");
        self.metadata.tables.push(table.clone());
        Ok(table)
    }
}
