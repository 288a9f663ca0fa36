//! Fetched rows.
//!
//! A row is an ordered list of values plus a shared, name-indexed column
//! table. Every row of one result set points at the same [`ColumnInfo`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;
use crate::error::Error;
use crate::value::Value;

/// Column names of a result set, with a name lookup.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    /// A repeated name (`SELECT 1 AS a, 2 AS a`) resolves to its last
    /// column, as an associative fetch would.
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            positions.insert(name.clone(), position);
        }
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One fetched row: field name to value.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    /// A row over an existing column table.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.get(self.columns.index_of(name)?)
    }

    /// Convert field `index`.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.get(index) {
            Some(value) => T::from_value(value),
            None => Err(Error::unknown(format!(
                "no field at index {} in a row of {}",
                index,
                self.len()
            ))),
        }
    }

    /// Convert field `name`; conversion errors name the field.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let Some(value) = self.get_by_name(name) else {
            return Err(Error::unknown(format!("no field named '{}'", name)));
        };
        T::from_value(value).map_err(|e| Error::unknown(format!("field '{}': {}", name, e.text())))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names.iter().map(String::as_str)
    }

    /// `(name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(&self.values)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion out of a fetched [`Value`].
///
/// The text protocol hands every column back as a string, so the numeric
/// and boolean conversions accept `Value::Text` and parse it.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(wanted: &str, value: &Value) -> Error {
    Error::unknown(format!("cannot read {} as {}", value.type_name(), wanted))
}

fn parse_text<T: std::str::FromStr>(text: &str, wanted: &str, value: &Value) -> Result<T> {
    text.trim().parse().map_err(|_| mismatch(wanted, value))
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) if s == "1" => Ok(true),
            Value::Text(s) if s == "0" => Ok(false),
            other => other.as_bool().ok_or_else(|| mismatch("bool", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => parse_text(s, "i64", value),
            other => other.as_i64().ok_or_else(|| mismatch("i64", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| Error::unknown(format!("{} does not fit in i32", wide)))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        if let Value::Text(s) = value {
            return parse_text(s, "u64", value);
        }
        let wide = i64::from_value(value)?;
        u64::try_from(wide).map_err(|_| Error::unknown(format!("{} does not fit in u64", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => parse_text(s, "f64", value),
            other => other.as_f64().ok_or_else(|| mismatch("f64", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value.to_text().ok_or_else(|| mismatch("String", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("bytes", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(doc) => Ok(doc.clone()),
            Value::Text(s) => {
                serde_json::from_str(s).map_err(|e| Error::unknown(format!("bad JSON text: {}", e)))
            }
            other => Err(mismatch("JSON", other)),
        }
    }
}
