//! In-memory columnar tables
//!
//! A [`Table`] is an ordered list of typed columns sharing one row count,
//! described by a [`Schema`]. It is the single table representation used by
//! the archive codec, the JSON fallback codec and the Parquet reader/writer.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::TableError;

/// Logical cell type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean
    Boolean,
    /// 64-bit signed integer
    Int64,
    /// 64-bit IEEE float
    Float64,
    /// UTF-8 string
    Utf8,
    /// Opaque bytes
    Binary,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// A named, typed column slot in a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name
    pub name: SmolStr,
    /// Whether cells may be null
    pub nullable: bool,
    /// Cell type
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Field {
    /// Create a field
    pub fn new(name: impl Into<SmolStr>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            nullable,
            data_type,
        }
    }
}

/// Ordered column descriptors with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Create a schema, rejecting duplicate column names
    pub fn try_new(fields: Vec<Field>) -> Result<Self, TableError> {
        let schema = Self { fields };
        schema.validate()?;
        Ok(schema)
    }

    /// Schema with no columns
    pub fn empty() -> Self {
        Self::default()
    }

    fn validate(&self) -> Result<(), TableError> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(TableError::DuplicateField(field.name.to_string()));
            }
        }
        Ok(())
    }

    /// Fields in column order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the named column
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Column names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// One cell value, used for row-oriented access
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value
    Null,
    /// Boolean cell
    Boolean(bool),
    /// Integer cell
    Int64(i64),
    /// Float cell
    Float64(f64),
    /// String cell
    Utf8(String),
    /// Bytes cell
    Binary(Bytes),
}

impl Value {
    /// True for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Utf8(v) => write!(f, "{:?}", v),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Typed column vector
///
/// Serialized as a single-key map `{type: [cells]}` inside row chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    /// Boolean cells
    Boolean(Vec<Option<bool>>),
    /// Integer cells
    Int64(Vec<Option<i64>>),
    /// Float cells
    Float64(Vec<Option<f64>>),
    /// String cells
    Utf8(Vec<Option<String>>),
    /// Bytes cells, encoded as CBOR byte strings
    Binary(#[serde(with = "crate::dataset::serde_bytes_helper")] Vec<Option<Bytes>>),
}

macro_rules! for_each_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Boolean($v) => $body,
            Column::Int64($v) => $body,
            Column::Float64($v) => $body,
            Column::Utf8($v) => $body,
            Column::Binary($v) => $body,
        }
    };
}

impl Column {
    /// Empty column of the given type
    pub fn empty(data_type: DataType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    /// Empty column of the given type with room for `capacity` cells
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Boolean => Column::Boolean(Vec::with_capacity(capacity)),
            DataType::Int64 => Column::Int64(Vec::with_capacity(capacity)),
            DataType::Float64 => Column::Float64(Vec::with_capacity(capacity)),
            DataType::Utf8 => Column::Utf8(Vec::with_capacity(capacity)),
            DataType::Binary => Column::Binary(Vec::with_capacity(capacity)),
        }
    }

    /// Cell type of this column
    pub fn data_type(&self) -> DataType {
        match self {
            Column::Boolean(_) => DataType::Boolean,
            Column::Int64(_) => DataType::Int64,
            Column::Float64(_) => DataType::Float64,
            Column::Utf8(_) => DataType::Utf8,
            Column::Binary(_) => DataType::Binary,
        }
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        for_each_column!(self, v => v.len())
    }

    /// True if the column has no cells
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of null cells
    pub fn null_count(&self) -> usize {
        for_each_column!(self, v => v.iter().filter(|c| c.is_none()).count())
    }

    /// Cell at `index` as a [`Value`]; out of range reads as null
    pub fn value(&self, index: usize) -> Value {
        match self {
            Column::Boolean(v) => v.get(index).copied().flatten().map_or(Value::Null, Value::Boolean),
            Column::Int64(v) => v.get(index).copied().flatten().map_or(Value::Null, Value::Int64),
            Column::Float64(v) => v
                .get(index)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Float64),
            Column::Utf8(v) => v
                .get(index)
                .cloned()
                .flatten()
                .map_or(Value::Null, Value::Utf8),
            Column::Binary(v) => v
                .get(index)
                .cloned()
                .flatten()
                .map_or(Value::Null, Value::Binary),
        }
    }

    /// Append one cell
    ///
    /// Integers are accepted into float columns; any other type mismatch is
    /// an error.
    pub fn push(&mut self, name: &str, value: Value) -> Result<(), TableError> {
        let mismatch = |col: &Column, value: &Value| TableError::CellType {
            name: name.to_string(),
            expected: col.data_type().to_string(),
            value: value.to_string(),
        };

        match (&mut *self, value) {
            (Column::Boolean(v), Value::Null) => v.push(None),
            (Column::Int64(v), Value::Null) => v.push(None),
            (Column::Float64(v), Value::Null) => v.push(None),
            (Column::Utf8(v), Value::Null) => v.push(None),
            (Column::Binary(v), Value::Null) => v.push(None),
            (Column::Boolean(v), Value::Boolean(b)) => v.push(Some(b)),
            (Column::Int64(v), Value::Int64(i)) => v.push(Some(i)),
            (Column::Float64(v), Value::Float64(x)) => v.push(Some(x)),
            (Column::Float64(v), Value::Int64(i)) => v.push(Some(i as f64)),
            (Column::Utf8(v), Value::Utf8(s)) => v.push(Some(s)),
            (Column::Binary(v), Value::Binary(b)) => v.push(Some(b)),
            (col, value) => return Err(mismatch(col, &value)),
        }
        Ok(())
    }

    /// Copy of `len` cells starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Column {
        let end = (offset + len).min(self.len());
        let start = offset.min(end);
        match self {
            Column::Boolean(v) => Column::Boolean(v[start..end].to_vec()),
            Column::Int64(v) => Column::Int64(v[start..end].to_vec()),
            Column::Float64(v) => Column::Float64(v[start..end].to_vec()),
            Column::Utf8(v) => Column::Utf8(v[start..end].to_vec()),
            Column::Binary(v) => Column::Binary(v[start..end].to_vec()),
        }
    }

    /// Append all cells of `other`, which must have the same type
    pub fn extend_from(&mut self, name: &str, other: &Column) -> Result<(), TableError> {
        match (&mut *self, other) {
            (Column::Boolean(a), Column::Boolean(b)) => a.extend_from_slice(b),
            (Column::Int64(a), Column::Int64(b)) => a.extend_from_slice(b),
            (Column::Float64(a), Column::Float64(b)) => a.extend_from_slice(b),
            (Column::Utf8(a), Column::Utf8(b)) => a.extend_from_slice(b),
            (Column::Binary(a), Column::Binary(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(TableError::ColumnType {
                    name: name.to_string(),
                    expected: a.data_type().to_string(),
                    got: b.data_type().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A schema plus one column vector per field, all of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: Arc<Schema>,
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    /// Create a table, validating columns against the schema
    pub fn try_new(schema: impl Into<Arc<Schema>>, columns: Vec<Column>) -> Result<Self, TableError> {
        let schema = schema.into();
        schema.validate()?;

        if schema.len() != columns.len() {
            return Err(TableError::ColumnCount {
                expected: schema.len(),
                got: columns.len(),
            });
        }

        let num_rows = columns.first().map_or(0, Column::len);
        for (field, column) in schema.fields().iter().zip(&columns) {
            if field.data_type != column.data_type() {
                return Err(TableError::ColumnType {
                    name: field.name.to_string(),
                    expected: field.data_type.to_string(),
                    got: column.data_type().to_string(),
                });
            }
            if column.len() != num_rows {
                return Err(TableError::RaggedColumns {
                    name: field.name.to_string(),
                    expected: num_rows,
                    got: column.len(),
                });
            }
            if !field.nullable && column.null_count() > 0 {
                return Err(TableError::UnexpectedNull {
                    name: field.name.to_string(),
                });
            }
        }

        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    /// Build a table from named columns; every field is nullable
    pub fn from_columns<N: Into<SmolStr>>(
        columns: impl IntoIterator<Item = (N, Column)>,
    ) -> Result<Self, TableError> {
        let (fields, columns): (Vec<_>, Vec<_>) = columns
            .into_iter()
            .map(|(name, col)| (Field::new(name, col.data_type(), true), col))
            .unzip();
        Self::try_new(Schema::try_new(fields)?, columns)
    }

    /// Zero-row table with the given schema
    pub fn empty(schema: impl Into<Arc<Schema>>) -> Self {
        let schema = schema.into();
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column::empty(f.data_type))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
        }
    }

    /// The table schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Column vectors in schema order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column at position `index`
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Column with the given name
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.schema.index_of(name).map(|i| &self.columns[i])
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.schema.names().collect()
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Cells of row `index`, in column order
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value(index)).collect()
    }

    /// Copy of `len` rows starting at `offset` (clamped to the table)
    pub fn slice(&self, offset: usize, len: usize) -> Table {
        let columns: Vec<Column> = self.columns.iter().map(|c| c.slice(offset, len)).collect();
        let num_rows = self.num_rows.saturating_sub(offset).min(len);
        Table {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows,
        }
    }

    /// Concatenate tables that share one schema
    ///
    /// An empty input yields an empty table with `schema`.
    pub fn concat(schema: impl Into<Arc<Schema>>, tables: &[Table]) -> Result<Table, TableError> {
        let mut out = Table::empty(schema);
        for table in tables {
            out.append(table)?;
        }
        Ok(out)
    }

    /// Append the rows of `other`, which must have an identical schema
    pub fn append(&mut self, other: &Table) -> Result<(), TableError> {
        if self.schema != other.schema {
            return Err(TableError::SchemaConflict);
        }
        for ((field, column), src) in self
            .schema
            .fields()
            .iter()
            .zip(self.columns.iter_mut())
            .zip(&other.columns)
        {
            column.extend_from(&field.name, src)?;
        }
        self.num_rows += other.num_rows;
        Ok(())
    }

    /// Split into tables of at most `rows` rows each
    ///
    /// An empty table yields no pieces.
    pub fn chunks(&self, rows: usize) -> impl Iterator<Item = Table> + '_ {
        let rows = rows.max(1);
        (0..self.num_rows)
            .step_by(rows)
            .map(move |offset| self.slice(offset, rows))
    }
}
