//! Backend-neutral driver surface: one value model, one result shape, one
//! trait. The builders stay dialect-generic by talking to this module only;
//! the per-backend files fill in the metadata their client libraries expose
//! differently.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use unicode_width::UnicodeWidthStr;

use super::schema::{Field, ForeignKey, Index, TableStatus};
use crate::sql::dialect::Dialect;

/// Driver-reported failure carrying the backend's native error code
/// ("1146", "42P01"). The code is empty when the failure happened before the
/// server answered.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct DriverError {
    pub code: String,
    pub message: String,
}

impl DriverError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> DriverError {
        DriverError {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A cell value in backend-neutral form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Lossless display form. Bytes render as `0x`-prefixed hex so binary
    /// keys can round-trip through navigation filters.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Int(value) => value.to_string(),
            Value::UInt(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::Text(value) => value.clone(),
            Value::Bytes(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2 + 2);
                out.push_str("0x");
                for byte in bytes {
                    out.push_str(&format!("{:02X}", byte));
                }
                out
            }
            Value::Date(value) => value.to_string(),
            Value::Time(value) => value.to_string(),
            Value::DateTime(value) => value.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::Json(value) => value.to_string(),
        }
    }

    /// Terminal cell width of the display form.
    pub fn display_width(&self) -> usize {
        UnicodeWidthStr::width(self.display().as_str())
    }

    /// Numeric reading, used to pull totals out of count probes.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(value) if *value >= 0 => Some(*value as u64),
            Value::UInt(value) => Some(*value),
            Value::Float(value) if *value >= 0.0 => Some(*value as u64),
            Value::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Per-column provenance. Output name plus the origin table/column, which
/// drive foreign-key links and row identity; empty origins mean a computed
/// column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub org_table: String,
    pub org_name: String,
    /// Render and quote as binary.
    pub binary: bool,
}

impl ColumnMeta {
    pub fn named(name: impl Into<String>) -> ColumnMeta {
        let name = name.into();
        ColumnMeta {
            org_name: name.clone(),
            name,
            ..Default::default()
        }
    }
}

/// Materialized query result. Small by construction: browse statements carry
/// a page window, so buffering the page is the simple and correct choice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fetch_row(&self, index: usize) -> Option<&[Value]> {
        self.rows.get(index).map(|row| row.as_slice())
    }

    /// Name-keyed copy of one row, in column order.
    pub fn fetch_assoc(&self, index: usize) -> Option<Vec<(String, Value)>> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .zip(row)
                .map(|(col, value)| (col.name.clone(), value.clone()))
                .collect(),
        )
    }

    pub fn column(&self, index: usize) -> Option<&ColumnMeta> {
        self.columns.get(index)
    }

    /// Value by output column name within one row.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let position = self.columns.iter().position(|col| col.name == name)?;
        self.rows.get(row)?.get(position)
    }

    /// First cell of the first row; the shape of a count probe result.
    pub fn single_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// One live backend connection.
///
/// `query` distinguishes "zero rows" (an empty [`ResultSet`]) from failure
/// (`Err`); callers never conflate the two. Methods take `&mut self`: a
/// connection runs one statement at a time, and concurrent use (the count
/// probe) goes through a second connection.
#[async_trait]
pub trait Driver: Send {
    fn dialect(&self) -> Dialect;

    /// Literal quoting under this connection's rules.
    fn quote(&self, value: &str) -> String;
    fn quote_binary(&self, bytes: &[u8]) -> String;

    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError>;
    /// Statement without a result set; returns the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;
    async fn select_database(&mut self, name: &str) -> Result<(), DriverError>;

    fn last_insert_id(&self) -> Option<u64>;
    fn affected_rows(&self) -> u64;

    async fn begin(&mut self) -> Result<(), DriverError>;
    async fn commit(&mut self) -> Result<(), DriverError>;
    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Server-side id of this session, the argument [`Driver::kill`] takes.
    fn thread_id(&self) -> u64;
    /// Cancel another session's running statement. Callers tolerate failure;
    /// killing an already-finished statement is a no-op.
    async fn kill(&mut self, thread_id: u64) -> Result<(), DriverError>;

    async fn table_status(&mut self, table: &str) -> Result<TableStatus, DriverError>;
    async fn fields(&mut self, table: &str) -> Result<Vec<Field>, DriverError>;
    async fn indexes(&mut self, table: &str) -> Result<Vec<Index>, DriverError>;
    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>, DriverError>;
}
