//! JSON fallback interchange format
//!
//! When the archive codec is unavailable, a table travels as a UTF-8 JSON
//! array of row objects instead of a CAR file. This is lossy:
//!
//! - binary cells are written as base64 strings and read back as Utf8
//! - every column reads back nullable, with its type inferred from the cells
//! - a table with columns but no rows reads back with no columns

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{InterchangeError, Result};
use crate::table::{Column, DataType, Field, Schema, Table, Value};

/// Bytes inspected when sniffing a file's format
const SNIFF_LEN: usize = 512;

/// Row-object JSON codec used in degraded mode
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFallbackCodec;

impl JsonFallbackCodec {
    /// Write `table` to `path` as a JSON array of row objects
    pub async fn write_table(&self, table: &Table, path: &Path) -> Result<()> {
        let data = self.encode(table)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(InterchangeError::io)?;
            }
        }
        tokio::fs::write(path, data)
            .await
            .map_err(InterchangeError::io)?;
        tracing::debug!(path = %path.display(), rows = table.num_rows(), "wrote JSON fallback file");
        Ok(())
    }

    /// Read a JSON fallback file back into a table
    pub async fn read_table(&self, path: &Path) -> Result<Table> {
        let data = tokio::fs::read(path).await.map_err(InterchangeError::io)?;
        self.decode(&data)
    }

    /// Encode `table` as JSON bytes
    pub fn encode(&self, table: &Table) -> Result<Vec<u8>> {
        let rows = self.to_rows(table)?;
        serde_json::to_vec(&rows).map_err(InterchangeError::json)
    }

    /// Decode JSON bytes produced by [`encode`](Self::encode)
    pub fn decode(&self, data: &[u8]) -> Result<Table> {
        let parsed: JsonValue = serde_json::from_slice(data).map_err(InterchangeError::json)?;
        let JsonValue::Array(items) = parsed else {
            return Err(InterchangeError::json_msg("expected a JSON array of rows"));
        };
        let rows = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::Object(row) => Ok(row),
                _ => Err(InterchangeError::json_msg(format!("row {} is not an object", i))),
            })
            .collect::<Result<Vec<_>>>()?;
        self.from_rows(&rows)
    }

    /// Rows as JSON objects, keys in schema order
    pub fn to_rows(&self, table: &Table) -> Result<Vec<Map<String, JsonValue>>> {
        let names: Vec<&str> = table.column_names();
        (0..table.num_rows())
            .map(|i| {
                let mut row = Map::with_capacity(names.len());
                for (name, value) in names.iter().zip(table.row(i)) {
                    row.insert((*name).to_string(), cell_to_json(name, value)?);
                }
                Ok(row)
            })
            .collect()
    }

    /// Build a table from row objects, inferring the schema
    ///
    /// Columns appear in order of first appearance. Integers become Int64,
    /// any float widens the column to Float64, and all-null columns are Utf8.
    /// Missing keys read as null.
    pub fn from_rows(&self, rows: &[Map<String, JsonValue>]) -> Result<Table> {
        let mut inferred: Vec<(String, Option<DataType>)> = Vec::new();
        for row in rows {
            for (name, cell) in row {
                let position = match inferred.iter().position(|(n, _)| n == name) {
                    Some(p) => p,
                    None => {
                        inferred.push((name.clone(), None));
                        inferred.len() - 1
                    }
                };
                let slot = &mut inferred[position].1;
                *slot = merge_type(name, *slot, cell)?;
            }
        }

        let fields: Vec<Field> = inferred
            .into_iter()
            .map(|(name, dt)| Field::new(name, dt.unwrap_or(DataType::Utf8), true))
            .collect();

        let mut columns: Vec<Column> = fields
            .iter()
            .map(|f| Column::with_capacity(f.data_type, rows.len()))
            .collect();
        for row in rows {
            for (field, column) in fields.iter().zip(columns.iter_mut()) {
                let cell = row.get(field.name.as_str()).unwrap_or(&JsonValue::Null);
                column.push(&field.name, json_to_cell(cell))?;
            }
        }

        Ok(Table::try_new(Schema::try_new(fields)?, columns)?)
    }
}

/// True if the file starts like a JSON array of objects (or an empty array)
pub async fn is_fallback_file(path: &Path) -> Result<bool> {
    use tokio::io::AsyncReadExt;

    let file = tokio::fs::File::open(path)
        .await
        .map_err(InterchangeError::io)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await
        .map_err(InterchangeError::io)?;
    Ok(looks_like_rows(&head))
}

fn looks_like_rows(head: &[u8]) -> bool {
    let mut bytes = head.iter().copied().filter(|b| !b.is_ascii_whitespace());
    bytes.next() == Some(b'[') && matches!(bytes.next(), Some(b'{') | Some(b']'))
}

fn cell_to_json(name: &str, value: Value) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::Int64(i) => JsonValue::Number(i.into()),
        Value::Float64(x) => JsonValue::Number(Number::from_f64(x).ok_or_else(|| {
            InterchangeError::json_msg(format!("column {}: {} has no JSON form", name, x))
        })?),
        Value::Utf8(s) => JsonValue::String(s),
        Value::Binary(b) => JsonValue::String(BASE64.encode(&b)),
    })
}

fn json_to_cell(cell: &JsonValue) -> Value {
    match cell {
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map_or(Value::Null, Value::Float64),
        },
        JsonValue::String(s) => Value::Utf8(s.clone()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => Value::Null,
    }
}

fn merge_type(name: &str, current: Option<DataType>, cell: &JsonValue) -> Result<Option<DataType>> {
    let seen = match cell {
        JsonValue::Null => return Ok(current),
        JsonValue::Bool(_) => DataType::Boolean,
        JsonValue::Number(n) if n.is_i64() => DataType::Int64,
        JsonValue::Number(_) => DataType::Float64,
        JsonValue::String(_) => DataType::Utf8,
        JsonValue::Array(_) | JsonValue::Object(_) => {
            return Err(InterchangeError::json_msg(format!(
                "column {}: nested values are not supported",
                name
            )));
        }
    };

    match (current, seen) {
        (None, t) => Ok(Some(t)),
        (Some(a), b) if a == b => Ok(Some(a)),
        (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
            Ok(Some(DataType::Float64))
        }
        (Some(a), b) => Err(InterchangeError::json_msg(format!(
            "column {} mixes {} and {} values",
            name, a, b
        ))),
    }
}
