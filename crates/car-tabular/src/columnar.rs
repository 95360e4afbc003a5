//! Parquet files to and from [`Table`]
//!
//! Reading goes through the parquet record API, one row at a time, so a
//! [`ParquetBatchReader`] holds at most one batch of decoded rows. Writing
//! goes through the column writers, one row group per batch.
//!
//! Only flat schemas are supported:
//!
//! | Parquet                                 | Table     |
//! |-----------------------------------------|-----------|
//! | BOOLEAN                                 | Boolean   |
//! | INT32, INT64 (incl. DATE, TIMESTAMP)    | Int64     |
//! | FLOAT, DOUBLE, FLOAT16                  | Float64   |
//! | BYTE_ARRAY annotated String/Enum/Json   | Utf8      |
//! | other BYTE_ARRAY, FIXED_LEN_BYTE_ARRAY  | Binary    |
//!
//! Nested groups, repeated fields, INT96, decimals and TIME are rejected.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parquet::basic::{Compression, ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use parquet::data_type::{
    BoolType, ByteArray, ByteArrayType, DataType as ParquetDataType, DoubleType, Int64Type,
};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::file::writer::{SerializedColumnWriter, SerializedFileWriter};
use parquet::record::reader::RowIter;
use parquet::record::{Field as ParquetField, Row};
use parquet::schema::types::{Type as SchemaType, TypePtr};

use crate::error::{InterchangeError, Result};
use crate::table::{Column, DataType, Field, Schema, Table, Value};

/// Rows per batch when a whole file is read at once
const READ_BATCH_ROWS: usize = 8192;

/// Read a whole Parquet file into one table
pub fn read_parquet(path: impl AsRef<Path>) -> Result<Table> {
    let reader = ParquetBatchReader::open(path, READ_BATCH_ROWS)?;
    let mut table = Table::empty(Arc::clone(reader.schema()));
    for batch in reader {
        table.append(&batch?)?;
    }
    Ok(table)
}

/// Write `table` to a new Parquet file as a single row group
pub fn write_parquet(table: &Table, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = ParquetStreamWriter::create(path, Arc::clone(table.schema()))?;
    writer.write_batch(table)?;
    writer.close()?;
    Ok(())
}

/// Lazy reader yielding a Parquet file as tables of at most `batch_size` rows
///
/// Batches are cut by row count, independent of the file's row groups.
pub struct ParquetBatchReader {
    schema: Arc<Schema>,
    rows: RowIter<'static>,
    batch_size: usize,
    num_rows: u64,
    done: bool,
}

impl std::fmt::Debug for ParquetBatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetBatchReader")
            .field("batch_size", &self.batch_size)
            .field("num_rows", &self.num_rows)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl ParquetBatchReader {
    /// Open `path` and map its schema
    ///
    /// Fails with `InvalidInput` for a zero `batch_size`, `Io` if the file
    /// cannot be opened and `Parquet` if it is not a supported Parquet file.
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(InterchangeError::invalid_input("batch size must be at least 1"));
        }

        let path = path.as_ref();
        let file = File::open(path).map_err(InterchangeError::io)?;
        let reader = SerializedFileReader::new(file)
            .map_err(|e| InterchangeError::parquet(e).with_context(path.display().to_string()))?;

        let metadata = reader.metadata().file_metadata();
        let schema = schema_from_parquet(metadata.schema())?;
        let num_rows = metadata.num_rows().max(0) as u64;

        tracing::debug!(
            path = %path.display(),
            columns = schema.len(),
            rows = num_rows,
            row_groups = reader.num_row_groups(),
            "opened parquet file"
        );

        Ok(Self {
            schema: Arc::new(schema),
            rows: RowIter::from_file_into(Box::new(reader)),
            batch_size,
            num_rows,
            done: false,
        })
    }

    /// Schema of the file's rows
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Total rows recorded in the file footer
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn next_batch(&mut self) -> Result<Option<Table>> {
        let mut columns: Vec<Column> = self
            .schema
            .fields()
            .iter()
            .map(|f| Column::with_capacity(f.data_type, self.batch_size))
            .collect();

        let mut count = 0;
        while count < self.batch_size {
            let Some(row) = self.rows.next() else {
                self.done = true;
                break;
            };
            let row = row.map_err(InterchangeError::parquet)?;
            push_row(&self.schema, &mut columns, &row)?;
            count += 1;
        }

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(Table::try_new(Arc::clone(&self.schema), columns)?))
    }
}

impl Iterator for ParquetBatchReader {
    type Item = Result<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(batch) => batch.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Incremental Parquet writer, one row group per batch
pub struct ParquetStreamWriter {
    writer: SerializedFileWriter<File>,
    schema: Arc<Schema>,
    rows_written: u64,
    row_groups: usize,
}

impl ParquetStreamWriter {
    /// Create (or truncate) `path` and write the file header for `schema`
    pub fn create(path: impl AsRef<Path>, schema: Arc<Schema>) -> Result<Self> {
        if schema.is_empty() {
            return Err(InterchangeError::parquet_msg(
                "cannot write a Parquet file without columns",
            ));
        }

        let parquet_schema = schema_to_parquet(&schema)?;
        let properties = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(InterchangeError::io)?;
            }
        }
        let file = File::create(path).map_err(InterchangeError::io)?;
        let writer = SerializedFileWriter::new(file, parquet_schema, Arc::new(properties))
            .map_err(InterchangeError::parquet)?;

        Ok(Self {
            writer,
            schema,
            rows_written: 0,
            row_groups: 0,
        })
    }

    /// Schema every batch must match
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Write one batch as a row group; empty batches are skipped
    pub fn write_batch(&mut self, batch: &Table) -> Result<()> {
        if batch.schema() != &self.schema {
            return Err(InterchangeError::schema_mismatch(
                "batch schema differs from the Parquet file schema",
            ));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let mut row_group = self
            .writer
            .next_row_group()
            .map_err(InterchangeError::parquet)?;
        for (field, column) in self.schema.fields().iter().zip(batch.columns()) {
            let mut writer = row_group
                .next_column()
                .map_err(InterchangeError::parquet)?
                .ok_or_else(|| InterchangeError::parquet_msg("row group ran out of columns"))?;
            write_column(&mut writer, column, field.nullable)?;
            writer.close().map_err(InterchangeError::parquet)?;
        }
        row_group.close().map_err(InterchangeError::parquet)?;

        self.rows_written += batch.num_rows() as u64;
        self.row_groups += 1;
        Ok(())
    }

    /// Finish the file footer; returns the number of rows written
    pub fn close(self) -> Result<u64> {
        self.writer.close().map_err(InterchangeError::parquet)?;
        tracing::debug!(
            rows = self.rows_written,
            row_groups = self.row_groups,
            "closed parquet file"
        );
        Ok(self.rows_written)
    }
}

fn schema_from_parquet(root: &SchemaType) -> Result<Schema> {
    let fields = root
        .get_fields()
        .iter()
        .map(|ty| field_from_parquet(ty))
        .collect::<Result<Vec<_>>>()?;
    Ok(Schema::try_new(fields)?)
}

fn field_from_parquet(ty: &SchemaType) -> Result<Field> {
    let name = ty.name();
    let unsupported =
        |what: &str| InterchangeError::parquet_msg(format!("column {}: {} is not supported", name, what));

    if !ty.is_primitive() {
        return Err(unsupported("nested group"));
    }

    let info = ty.get_basic_info();
    let repetition = info.has_repetition().then(|| info.repetition());
    if repetition == Some(Repetition::REPEATED) {
        return Err(unsupported("repeated field"));
    }
    let nullable = repetition != Some(Repetition::REQUIRED);

    let converted = info.converted_type();
    let logical = info.logical_type();
    if converted == ConvertedType::DECIMAL || matches!(logical, Some(LogicalType::Decimal { .. })) {
        return Err(unsupported("decimal"));
    }
    if matches!(
        converted,
        ConvertedType::TIME_MILLIS | ConvertedType::TIME_MICROS | ConvertedType::INTERVAL
    ) || matches!(logical, Some(LogicalType::Time { .. }))
    {
        return Err(unsupported("time of day"));
    }

    let is_string = matches!(
        converted,
        ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON
    ) || matches!(
        logical,
        Some(LogicalType::String | LogicalType::Enum | LogicalType::Json)
    );

    let data_type = match ty.get_physical_type() {
        PhysicalType::BOOLEAN => DataType::Boolean,
        PhysicalType::INT32 | PhysicalType::INT64 => DataType::Int64,
        PhysicalType::FLOAT | PhysicalType::DOUBLE => DataType::Float64,
        PhysicalType::INT96 => return Err(unsupported("INT96")),
        PhysicalType::BYTE_ARRAY if is_string => DataType::Utf8,
        PhysicalType::FIXED_LEN_BYTE_ARRAY if matches!(logical, Some(LogicalType::Float16)) => {
            DataType::Float64
        }
        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY => DataType::Binary,
    };

    Ok(Field::new(name, data_type, nullable))
}

fn schema_to_parquet(schema: &Schema) -> Result<TypePtr> {
    let mut fields = Vec::with_capacity(schema.len());
    for field in schema.fields() {
        let (physical, logical) = match field.data_type {
            DataType::Boolean => (PhysicalType::BOOLEAN, None),
            DataType::Int64 => (PhysicalType::INT64, None),
            DataType::Float64 => (PhysicalType::DOUBLE, None),
            DataType::Utf8 => (PhysicalType::BYTE_ARRAY, Some(LogicalType::String)),
            DataType::Binary => (PhysicalType::BYTE_ARRAY, None),
        };
        let repetition = if field.nullable {
            Repetition::OPTIONAL
        } else {
            Repetition::REQUIRED
        };
        let ty = SchemaType::primitive_type_builder(&field.name, physical)
            .with_repetition(repetition)
            .with_logical_type(logical)
            .build()
            .map_err(InterchangeError::parquet)?;
        fields.push(Arc::new(ty));
    }

    let root = SchemaType::group_type_builder("schema")
        .with_fields(fields)
        .build()
        .map_err(InterchangeError::parquet)?;
    Ok(Arc::new(root))
}

fn push_row(schema: &Schema, columns: &mut [Column], row: &Row) -> Result<()> {
    for ((field, column), (_, cell)) in schema
        .fields()
        .iter()
        .zip(columns.iter_mut())
        .zip(row.get_column_iter())
    {
        column.push(&field.name, cell_value(&field.name, cell)?)?;
    }
    Ok(())
}

/// Convert one record cell; temporal values keep their integer encoding
fn cell_value(name: &str, cell: &ParquetField) -> Result<Value> {
    let value = match cell {
        ParquetField::Null => Value::Null,
        ParquetField::Bool(v) => Value::Boolean(*v),
        ParquetField::Byte(v) => Value::Int64(i64::from(*v)),
        ParquetField::Short(v) => Value::Int64(i64::from(*v)),
        ParquetField::Int(v) => Value::Int64(i64::from(*v)),
        ParquetField::Long(v) => Value::Int64(*v),
        ParquetField::UByte(v) => Value::Int64(i64::from(*v)),
        ParquetField::UShort(v) => Value::Int64(i64::from(*v)),
        ParquetField::UInt(v) => Value::Int64(i64::from(*v)),
        ParquetField::ULong(v) => Value::Int64(i64::try_from(*v).map_err(|_| {
            InterchangeError::parquet_msg(format!("column {}: {} overflows int64", name, v))
        })?),
        ParquetField::Float16(v) => Value::Float64(f64::from(v.to_f32())),
        ParquetField::Float(v) => Value::Float64(f64::from(*v)),
        ParquetField::Double(v) => Value::Float64(*v),
        ParquetField::Str(v) => Value::Utf8(v.clone()),
        ParquetField::Bytes(v) => Value::Binary(Bytes::copy_from_slice(v.data())),
        ParquetField::Date(v) => Value::Int64(i64::from(*v)),
        ParquetField::TimestampMillis(v) | ParquetField::TimestampMicros(v) => Value::Int64(*v),
        other => {
            return Err(InterchangeError::parquet_msg(format!(
                "column {}: unsupported cell {:?}",
                name, other
            )));
        }
    };
    Ok(value)
}

fn write_column(
    writer: &mut SerializedColumnWriter<'_>,
    column: &Column,
    nullable: bool,
) -> Result<()> {
    match column {
        Column::Boolean(cells) => write_cells::<BoolType, _>(writer, cells, nullable, |v| *v),
        Column::Int64(cells) => write_cells::<Int64Type, _>(writer, cells, nullable, |v| *v),
        Column::Float64(cells) => write_cells::<DoubleType, _>(writer, cells, nullable, |v| *v),
        Column::Utf8(cells) => {
            write_cells::<ByteArrayType, _>(writer, cells, nullable, |v| ByteArray::from(v.as_str()))
        }
        Column::Binary(cells) => {
            write_cells::<ByteArrayType, _>(writer, cells, nullable, |v| ByteArray::from(v.clone()))
        }
    }
}

/// Write present values plus definition levels (1 = present) for optional columns
fn write_cells<T, C>(
    writer: &mut SerializedColumnWriter<'_>,
    cells: &[Option<C>],
    nullable: bool,
    convert: impl Fn(&C) -> T::T,
) -> Result<()>
where
    T: ParquetDataType,
{
    let values: Vec<T::T> = cells.iter().flatten().map(convert).collect();
    let def_levels: Vec<i16> = cells.iter().map(|c| i16::from(c.is_some())).collect();

    writer
        .typed::<T>()
        .write_batch(&values, nullable.then_some(def_levels.as_slice()), None)
        .map_err(InterchangeError::parquet)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InterchangeErrorKind;
    use tempfile::TempDir;

    fn sample(rows: i64) -> Table {
        Table::from_columns([
            ("id", Column::Int64((0..rows).map(Some).collect())),
            (
                "score",
                Column::Float64((0..rows).map(|i| (i % 4 != 0).then_some(i as f64 / 2.0)).collect()),
            ),
            (
                "name",
                Column::Utf8((0..rows).map(|i| Some(format!("n{i}"))).collect()),
            ),
            (
                "flag",
                Column::Boolean((0..rows).map(|i| (i % 3 != 0).then_some(i % 2 == 0)).collect()),
            ),
            (
                "blob",
                Column::Binary(
                    (0..rows)
                        .map(|i| (i % 5 != 0).then(|| Bytes::from(vec![i as u8; 3])))
                        .collect(),
                ),
            ),
        ])
        .unwrap()
    }

    fn row_groups(path: &Path) -> usize {
        SerializedFileReader::new(File::open(path).unwrap())
            .unwrap()
            .metadata()
            .num_row_groups()
    }

    #[test]
    fn test_round_trip_with_nulls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.parquet");
        let table = sample(25);

        write_parquet(&table, &path).unwrap();
        assert_eq!(read_parquet(&path).unwrap(), table);
    }

    #[test]
    fn test_required_fields_survive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("required.parquet");
        let schema = Schema::try_new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("v", DataType::Utf8, true),
        ])
        .unwrap();
        let table = Table::try_new(
            schema,
            vec![
                Column::Int64(vec![Some(7), Some(8)]),
                Column::Utf8(vec![None, Some("x".into())]),
            ],
        )
        .unwrap();

        write_parquet(&table, &path).unwrap();
        let restored = read_parquet(&path).unwrap();
        assert!(!restored.schema().fields()[0].nullable);
        assert_eq!(restored, table);
    }

    #[test]
    fn test_batch_reader_cuts_by_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batches.parquet");
        write_parquet(&sample(10), &path).unwrap();

        let reader = ParquetBatchReader::open(&path, 4).unwrap();
        assert_eq!(reader.num_rows(), 10);
        let sizes: Vec<usize> = reader.map(|b| b.unwrap().num_rows()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_stream_writer_one_row_group_per_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.parquet");
        let table = sample(9);

        let mut writer = ParquetStreamWriter::create(&path, Arc::clone(table.schema())).unwrap();
        for piece in table.chunks(4) {
            writer.write_batch(&piece).unwrap();
        }
        writer.write_batch(&table.slice(0, 0)).unwrap();
        assert_eq!(writer.close().unwrap(), 9);

        assert_eq!(row_groups(&path), 3);
        assert_eq!(read_parquet(&path).unwrap(), table);
    }

    #[test]
    fn test_empty_table_keeps_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.parquet");
        let table = sample(0);

        write_parquet(&table, &path).unwrap();
        let restored = read_parquet(&path).unwrap();
        assert_eq!(restored.num_rows(), 0);
        assert_eq!(restored.schema(), table.schema());
    }

    #[test]
    fn test_stream_writer_rejects_other_schema() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            ParquetStreamWriter::create(dir.path().join("x.parquet"), Arc::clone(sample(1).schema()))
                .unwrap();
        let other = Table::from_columns([("z", Column::Int64(vec![Some(1)]))]).unwrap();

        let err = writer.write_batch(&other).unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_no_columns_rejected() {
        let dir = TempDir::new().unwrap();
        let err = write_parquet(&Table::empty(Schema::empty()), dir.path().join("none.parquet"))
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::Parquet);
    }

    #[test]
    fn test_open_errors() {
        let dir = TempDir::new().unwrap();

        let err = ParquetBatchReader::open(dir.path().join("missing.parquet"), 10).unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::Io);

        let garbage = dir.path().join("garbage.parquet");
        std::fs::write(&garbage, b"definitely not parquet").unwrap();
        let err = ParquetBatchReader::open(&garbage, 10).unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::Parquet);

        write_parquet(&sample(2), &garbage).unwrap();
        let err = ParquetBatchReader::open(&garbage, 0).unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::InvalidInput);
    }
}
