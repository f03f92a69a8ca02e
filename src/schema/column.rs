//! Column specifications and typed column references.

use crate::models::DatabaseType;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// Default `VARCHAR` length where the dialect requires one.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Logical column type, rendered per dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInt,
    SmallInt,
    String { length: Option<u32> },
    Text,
    Float,
    Numeric { precision: Option<(u32, u32)> },
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    /// Text restricted to the listed values with a `CHECK` constraint.
    Enum { variants: Vec<String> },
}

impl ColumnType {
    pub fn sql(&self, db: DatabaseType) -> String {
        use DatabaseType::*;
        match (self, db) {
            (Self::Integer, _) => "INTEGER".into(),
            (Self::BigInt, _) => "BIGINT".into(),
            (Self::SmallInt, _) => "SMALLINT".into(),
            (Self::String { length: Some(n) }, _) => format!("VARCHAR({n})"),
            (Self::String { length: None }, MySQL) => format!("VARCHAR({DEFAULT_STRING_LENGTH})"),
            (Self::String { length: None }, _) => "VARCHAR".into(),
            (Self::Text, _) => "TEXT".into(),
            (Self::Float, SQLite) => "REAL".into(),
            (Self::Float, PostgreSQL) => "DOUBLE PRECISION".into(),
            (Self::Float, MySQL) => "DOUBLE".into(),
            (Self::Numeric { precision: Some((p, s)) }, _) => format!("NUMERIC({p}, {s})"),
            (Self::Numeric { precision: None }, _) => "NUMERIC".into(),
            (Self::Boolean, _) => "BOOLEAN".into(),
            (Self::Date, _) => "DATE".into(),
            (Self::Time, _) => "TIME".into(),
            (Self::DateTime, PostgreSQL) => "TIMESTAMP".into(),
            (Self::DateTime, _) => "DATETIME".into(),
            (Self::Timestamp, _) => "TIMESTAMP".into(),
            // SQLite gives a column declared JSON numeric affinity.
            (Self::Json, SQLite) => "TEXT".into(),
            (Self::Json, _) => "JSON".into(),
            (Self::Enum { variants }, _) => {
                let longest = variants.iter().map(|v| v.len()).max().unwrap_or(1).max(1);
                format!("VARCHAR({longest})")
            }
        }
    }
}

/// Server-side default value expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SqlDefault {
    CurrentTimestamp,
    CurrentDate,
    CurrentTime,
    Bool(bool),
    Int(i64),
    Text(String),
    /// Inserted verbatim.
    Raw(String),
}

impl SqlDefault {
    pub fn sql(&self, db: DatabaseType) -> String {
        match (self, db) {
            (Self::CurrentTimestamp, _) => "CURRENT_TIMESTAMP".into(),
            // MySQL only accepts these as parenthesized expressions.
            (Self::CurrentDate, DatabaseType::MySQL) => "(CURRENT_DATE)".into(),
            (Self::CurrentTime, DatabaseType::MySQL) => "(CURRENT_TIME)".into(),
            (Self::CurrentDate, _) => "CURRENT_DATE".into(),
            (Self::CurrentTime, _) => "CURRENT_TIME".into(),
            (Self::Bool(b), DatabaseType::SQLite) => (if *b { "1" } else { "0" }).into(),
            (Self::Bool(b), _) => (if *b { "TRUE" } else { "FALSE" }).into(),
            (Self::Int(n), _) => n.to_string(),
            (Self::Text(s), _) => quote_literal(s),
            (Self::Raw(s), _) => s.clone(),
        }
    }
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// Everything needed to render one column.
///
/// Columns are nullable unless marked otherwise or part of the primary key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub unique: bool,
    pub index: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<SqlDefault>,
    /// Rendered as `ON UPDATE` on MySQL only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_update: Option<SqlDefault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKeyRef>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            autoincrement: false,
            unique: false,
            index: false,
            default: None,
            on_update: None,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default(mut self, default: SqlDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn on_update(mut self, value: SqlDefault) -> Self {
        self.on_update = Some(value);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    /// Column definition as it appears inside `CREATE TABLE`.
    pub fn definition_sql(&self, db: DatabaseType) -> String {
        let mut sql = db.quote_ident(&self.name);
        sql.push(' ');

        if self.primary_key && self.autoincrement {
            sql.push_str(match db {
                DatabaseType::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
                DatabaseType::PostgreSQL => "SERIAL PRIMARY KEY",
                DatabaseType::MySQL => "INT AUTO_INCREMENT PRIMARY KEY",
            });
            return sql;
        }

        sql.push_str(&self.column_type.sql(db));
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique && !self.primary_key {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.sql(db));
        }
        if let (Some(on_update), DatabaseType::MySQL) = (&self.on_update, db) {
            sql.push_str(" ON UPDATE ");
            sql.push_str(&on_update.sql(db));
        }
        if let ColumnType::Enum { variants } = &self.column_type {
            let allowed: Vec<String> = variants.iter().map(|v| quote_literal(v)).collect();
            sql.push_str(&format!(
                " CHECK ({} IN ({}))",
                db.quote_ident(&self.name),
                allowed.join(", ")
            ));
        }
        sql
    }
}

/// Column shared between the builder, the table and every [`Column`] handle.
#[derive(Debug)]
pub(crate) struct ColumnDef {
    pub(crate) spec: ColumnSpec,
    pub(crate) table: OnceLock<String>,
}

/// Typed reference to a declared column.
///
/// `T` is the Rust type values of the column decode to. The table name is
/// filled in when the table the column belongs to is built.
pub struct Column<T> {
    def: Arc<ColumnDef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Column<T> {
    pub(crate) fn new(def: Arc<ColumnDef>) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.def.spec.name
    }

    pub fn spec(&self) -> &ColumnSpec {
        &self.def.spec
    }

    /// Name of the owning table, once it has been built.
    pub fn table(&self) -> Option<&str> {
        self.def.table.get().map(String::as_str)
    }

    /// `table.column`, or just the column name while the table is unbuilt.
    pub fn qualified(&self) -> String {
        match self.table() {
            Some(table) => format!("{}.{}", table, self.name()),
            None => self.name().to_string(),
        }
    }
}

impl<T> Clone for Column<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.def))
    }
}

impl<T> std::fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.def.spec.name)
            .field("table", &self.table())
            .field("type", &self.def.spec.column_type)
            .finish()
    }
}

impl<T> std::fmt::Display for Column<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_per_dialect() {
        assert_eq!(ColumnType::Float.sql(DatabaseType::SQLite), "REAL");
        assert_eq!(ColumnType::Float.sql(DatabaseType::PostgreSQL), "DOUBLE PRECISION");
        assert_eq!(ColumnType::Float.sql(DatabaseType::MySQL), "DOUBLE");
    }

    #[test]
    fn test_string_length() {
        let unsized_ = ColumnType::String { length: None };
        assert_eq!(unsized_.sql(DatabaseType::SQLite), "VARCHAR");
        assert_eq!(unsized_.sql(DatabaseType::MySQL), "VARCHAR(255)");
        let sized = ColumnType::String { length: Some(40) };
        assert_eq!(sized.sql(DatabaseType::PostgreSQL), "VARCHAR(40)");
    }

    #[test]
    fn test_auto_id_definition() {
        let spec = ColumnSpec::new("id", ColumnType::Integer)
            .primary_key()
            .autoincrement();
        assert_eq!(
            spec.definition_sql(DatabaseType::SQLite),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            spec.definition_sql(DatabaseType::PostgreSQL),
            "\"id\" SERIAL PRIMARY KEY"
        );
        assert_eq!(
            spec.definition_sql(DatabaseType::MySQL),
            "`id` INT AUTO_INCREMENT PRIMARY KEY"
        );
    }

    #[test]
    fn test_defaults_and_constraints() {
        let spec = ColumnSpec::new("active", ColumnType::Boolean)
            .not_null()
            .default(SqlDefault::Bool(true));
        assert_eq!(
            spec.definition_sql(DatabaseType::SQLite),
            "\"active\" BOOLEAN NOT NULL DEFAULT 1"
        );
        assert_eq!(
            spec.definition_sql(DatabaseType::PostgreSQL),
            "\"active\" BOOLEAN NOT NULL DEFAULT TRUE"
        );

        let spec = ColumnSpec::new("note", ColumnType::Text).default(SqlDefault::Text("it's".into()));
        assert_eq!(
            spec.definition_sql(DatabaseType::SQLite),
            "\"note\" TEXT DEFAULT 'it''s'"
        );
    }

    #[test]
    fn test_on_update_only_on_mysql() {
        let spec = ColumnSpec::new("updated_at", ColumnType::DateTime)
            .default(SqlDefault::CurrentTimestamp)
            .on_update(SqlDefault::CurrentTimestamp);
        assert_eq!(
            spec.definition_sql(DatabaseType::MySQL),
            "`updated_at` DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP"
        );
        assert_eq!(
            spec.definition_sql(DatabaseType::SQLite),
            "\"updated_at\" DATETIME DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_enum_check() {
        let spec = ColumnSpec::new(
            "status",
            ColumnType::Enum {
                variants: vec!["open".into(), "closed".into()],
            },
        );
        assert_eq!(
            spec.definition_sql(DatabaseType::PostgreSQL),
            "\"status\" VARCHAR(6) CHECK (\"status\" IN ('open', 'closed'))"
        );
    }
}
