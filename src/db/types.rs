//! Row decoding into JSON values.
//!
//! A column's declared type picks a [`ValueKind`]; each kind then tries the
//! Rust types the driver can decode it into, narrowest first where the driver
//! is strict about widths (PostgreSQL) and widest first where it is not.
//!
//! The blocking backend reads SQLite's storage classes directly, see
//! [`sqlite_value_to_json`].

use crate::models::DatabaseType;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// What a column holds, as far as JSON is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    /// Exact numerics, rendered as strings so no precision is lost.
    Decimal,
    Boolean,
    Bytes,
    Json,
    Uuid,
    Temporal,
    Text,
}

impl ValueKind {
    pub fn of(type_name: &str, db: DatabaseType) -> Self {
        let lower = type_name.to_ascii_lowercase();
        let is = |names: &[&str]| names.iter().any(|n| lower.contains(n));

        if is(&["decimal", "numeric"]) {
            // SQLite stores NUMERIC affinity as INTEGER or REAL.
            return if db == DatabaseType::SQLite {
                Self::Float
            } else {
                Self::Decimal
            };
        }
        if lower == "bool" || lower == "boolean" {
            return Self::Boolean;
        }
        if is(&["int", "serial"]) {
            return Self::Integer;
        }
        if is(&["float", "double", "real"]) {
            return Self::Float;
        }
        if lower == "json" || lower == "jsonb" {
            return Self::Json;
        }
        if lower == "uuid" {
            return Self::Uuid;
        }
        if is(&["blob", "binary", "bytea"]) {
            return Self::Bytes;
        }
        if is(&["date", "time"]) {
            return Self::Temporal;
        }
        Self::Text
    }
}

/// DECIMAL / NUMERIC read as the server's own text.
#[derive(Debug)]
pub struct DecimalText(pub String);

macro_rules! impl_decimal_text {
    ($db:ty, $info:ty, $value:ty) => {
        impl Type<$db> for DecimalText {
            fn type_info() -> $info {
                <String as Type<$db>>::type_info()
            }

            fn compatible(ty: &$info) -> bool {
                let name = ty.name().to_ascii_lowercase();
                name.contains("decimal") || name.contains("numeric")
            }
        }

        impl<'r> Decode<'r, $db> for DecimalText {
            fn decode(value: $value) -> Result<Self, sqlx::error::BoxDynError> {
                Ok(DecimalText(<&str as Decode<$db>>::decode(value)?.to_string()))
            }
        }
    };
}

impl_decimal_text!(sqlx::MySql, MySqlTypeInfo, MySqlValueRef<'r>);
impl_decimal_text!(sqlx::Postgres, PgTypeInfo, PgValueRef<'r>);

/// Blobs are returned as text when they are valid UTF-8, base64 otherwise.
pub fn bytes_to_json(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Converts sqlx rows into JSON maps keyed by column name.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_names(&self) -> Vec<String>;
}

/// `Some` only for a non-NULL value the driver accepts as `T`.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

/// Try each listed type in order and map the first hit through `$to_json`.
macro_rules! try_decode {
    ($row:expr, $idx:expr, $to_json:expr; $($ty:ty),+ $(,)?) => {
        None$(.or_else(|| get::<_, $ty>($row, $idx).map(|v| $to_json(v))))+
    };
}

fn temporal<R>(row: &R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
{
    let text = |v: String| JsonValue::String(v);
    try_decode!(row, idx, |v: DateTime<Utc>| text(v.to_rfc3339()); DateTime<Utc>)
        .or_else(|| try_decode!(row, idx, |v: NaiveDateTime| text(v.to_string()); NaiveDateTime))
        .or_else(|| try_decode!(row, idx, |v: NaiveDate| text(v.to_string()); NaiveDate))
        .or_else(|| try_decode!(row, idx, |v: NaiveTime| text(v.to_string()); NaiveTime))
        .or_else(|| try_decode!(row, idx, text; String))
}

fn decode_mysql(row: &MySqlRow, idx: usize, kind: ValueKind) -> Option<JsonValue> {
    match kind {
        ValueKind::Integer => try_decode!(row, idx, JsonValue::from; i64, u64),
        ValueKind::Float => try_decode!(row, idx, float_to_json; f64)
            .or_else(|| try_decode!(row, idx, |v: f32| float_to_json(v.into()); f32)),
        ValueKind::Decimal => try_decode!(row, idx, |v: DecimalText| JsonValue::String(v.0); DecimalText),
        ValueKind::Boolean => try_decode!(row, idx, JsonValue::Bool; bool),
        ValueKind::Bytes => try_decode!(row, idx, |v: Vec<u8>| bytes_to_json(&v); Vec<u8>),
        ValueKind::Json => try_decode!(row, idx, std::convert::identity; JsonValue),
        ValueKind::Temporal => temporal(row, idx),
        ValueKind::Uuid | ValueKind::Text => try_decode!(row, idx, JsonValue::String; String)
            .or_else(|| try_decode!(row, idx, |v: Vec<u8>| bytes_to_json(&v); Vec<u8>)),
    }
}

fn decode_postgres(row: &PgRow, idx: usize, kind: ValueKind) -> Option<JsonValue> {
    match kind {
        ValueKind::Integer => try_decode!(row, idx, JsonValue::from; i64, i32, i16),
        ValueKind::Float => try_decode!(row, idx, float_to_json; f64)
            .or_else(|| try_decode!(row, idx, |v: f32| float_to_json(v.into()); f32)),
        ValueKind::Decimal => try_decode!(row, idx, |v: DecimalText| JsonValue::String(v.0); DecimalText),
        ValueKind::Boolean => try_decode!(row, idx, JsonValue::Bool; bool),
        ValueKind::Bytes => try_decode!(row, idx, |v: Vec<u8>| bytes_to_json(&v); Vec<u8>),
        ValueKind::Json => try_decode!(row, idx, std::convert::identity; JsonValue),
        ValueKind::Uuid => try_decode!(row, idx, |v: uuid::Uuid| JsonValue::String(v.to_string()); uuid::Uuid),
        ValueKind::Temporal => temporal(row, idx),
        ValueKind::Text => try_decode!(row, idx, JsonValue::String; String),
    }
}

fn decode_sqlite(row: &SqliteRow, idx: usize, kind: ValueKind) -> Option<JsonValue> {
    let declared = match kind {
        ValueKind::Integer => try_decode!(row, idx, JsonValue::from; i64),
        ValueKind::Float | ValueKind::Decimal => try_decode!(row, idx, float_to_json; f64),
        ValueKind::Boolean => try_decode!(row, idx, JsonValue::Bool; bool),
        ValueKind::Bytes => try_decode!(row, idx, |v: Vec<u8>| bytes_to_json(&v); Vec<u8>),
        ValueKind::Json => try_decode!(row, idx, |v: String| {
            serde_json::from_str(&v).unwrap_or(JsonValue::String(v))
        }; String),
        _ => try_decode!(row, idx, JsonValue::String; String),
    };
    // Expression columns carry no declared type; fall back on storage class.
    declared
        .or_else(|| try_decode!(row, idx, JsonValue::from; i64))
        .or_else(|| try_decode!(row, idx, float_to_json; f64))
        .or_else(|| try_decode!(row, idx, JsonValue::String; String))
        .or_else(|| try_decode!(row, idx, |v: Vec<u8>| bytes_to_json(&v); Vec<u8>))
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:ident) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let kind = ValueKind::of(col.type_info().name(), $db);
                        let value = $decode(self, idx, kind).unwrap_or(JsonValue::Null);
                        (col.name().to_string(), value)
                    })
                    .collect()
            }

            fn column_names(&self) -> Vec<String> {
                self.columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, decode_mysql);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, decode_postgres);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, decode_sqlite);

/// Convert a `rusqlite` value to JSON.
pub fn sqlite_value_to_json(value: rusqlite::types::ValueRef<'_>) -> JsonValue {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(v) => JsonValue::from(v),
        ValueRef::Real(v) => float_to_json(v),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => bytes_to_json(bytes),
    }
}
