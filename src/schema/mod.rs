//! Declarative table metadata.
//!
//! [`TableBuilder`] hands out typed [`Column`] references while columns are
//! declared and groups them into a [`Table`] when the table is named. The
//! resulting [`MetaData`] renders dialect-specific DDL and can create or drop
//! every table through either engine kind.

mod column;
mod table;

pub use column::{
    Column, ColumnSpec, ColumnType, DEFAULT_STRING_LENGTH, ForeignKeyRef, SqlDefault,
};
pub use table::{MetaData, Table, TableBuilder};
