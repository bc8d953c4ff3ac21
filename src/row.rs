// 🧾 Data model - Entities, Values, Rows
//
// A Row is a bag of named fields as delivered by the provider.
// The catalog decides which of them land in a table.

use crate::error::{IngestError, IngestResult};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ENTITY
// ============================================================================

/// A listed bank, identified by its exchange code (e.g. "601398.SH")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub code: String,
    pub name: String,
}

impl Entity {
    /// Validate the `<digits>.<exchange>` code format
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> IngestResult<Self> {
        let code: String = code.into();
        let code = code.trim().to_string();
        if !is_valid_code(&code) {
            return Err(IngestError::configuration(format!(
                "invalid entity code '{}': expected <digits>.<exchange>",
                code
            )));
        }
        Ok(Entity {
            code,
            name: name.into(),
        })
    }
}

fn is_valid_code(code: &str) -> bool {
    match code.split_once('.') {
        Some((digits, exchange)) => {
            !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
                && !exchange.is_empty()
                && exchange.chars().all(|c| c.is_ascii_uppercase())
        }
        None => false,
    }
}

// ============================================================================
// VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Decode one provider JSON cell
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(*b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    n.as_f64().map(Value::Real).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

// ============================================================================
// ROW
// ============================================================================

/// One fetched record for an (entity, record type) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    /// Builder pattern: set one field
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Zip a provider `fields` header with one `items` entry
    pub fn from_columns(fields: &[String], items: &[serde_json::Value]) -> Row {
        let fields = fields
            .iter()
            .zip(items.iter())
            .map(|(name, value)| (name.clone(), Value::from_json(value)))
            .collect();
        Row { fields }
    }
}
