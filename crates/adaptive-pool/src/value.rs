//! Values passed to and returned from the driver.
//!
//! The pool never interprets rows; these types only carry parameters and
//! results between the caller and the driver.

use bytes::Bytes;

/// A SQL parameter or column value.
#[derive(Debug, Clone, PartialEq, Default)]
#[non_exhaustive]
pub enum SqlValue {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// Text value.
    String(String),
    /// Binary value.
    Binary(Bytes),
    /// JSON document.
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an i64, if it is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// One result row, in column order.
pub type Row = Vec<SqlValue>;

/// Result of executing a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Returned rows.
    pub rows: Vec<Row>,
    /// Number of rows affected by a DML statement.
    pub rows_affected: u64,
}

impl QueryResult {
    /// Build a result from returned rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            rows_affected: 0,
        }
    }

    /// Build a result for a DML statement.
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }
}
