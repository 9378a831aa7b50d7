//! Parquet-backed extract files.
//!
//! Parquet files are immutable, so an insert rewrites the existing row
//! groups plus the new batch into a sibling temp file and renames it over
//! the existing file. Date columns are stored as microsecond timestamps.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{
    DataType, Field, Float64Type, Int64Type, Schema, SchemaRef, TimeUnit,
    TimestampMicrosecondType,
};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tracing::{debug, instrument, warn};

use super::{CreateMode, ExtractStore};
use crate::error::{ExportError, Result};
use crate::logging::LogConfig;
use crate::schema::{coerce_row, Column, SqlType, TableDefinition};
use crate::value::{render_timestamp, require_timestamp, Row, Value};

/// Schema metadata key holding the qualified table name.
pub const TABLE_NAME_METADATA_KEY: &str = "extract.table";

/// Extract store writing Parquet files.
#[derive(Debug, Clone, Default)]
pub struct ParquetExtract {
    properties: Option<WriterProperties>,
    log: LogConfig,
}

impl ParquetExtract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controls create/insert logging through [`LogConfig::log_extract_operations`].
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Uses custom writer properties (compression, row group size, ...).
    pub fn with_properties(mut self, properties: WriterProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    fn write_batches(&self, path: &Path, schema: SchemaRef, batches: &[RecordBatch]) -> Result<()> {
        let tmp = temp_path(path);
        let written = (|| -> Result<()> {
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(file, schema, self.properties.clone())?;
            for batch in batches {
                writer.write(batch)?;
            }
            writer.close()?;
            Ok(())
        })();

        match written {
            Ok(()) => {
                std::fs::rename(&tmp, path)?;
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(&tmp) {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp extract");
                }
                Err(e)
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn arrow_type(sql_type: SqlType) -> DataType {
    match sql_type {
        SqlType::Text => DataType::Utf8,
        SqlType::Int => DataType::Int64,
        SqlType::Date => DataType::Timestamp(TimeUnit::Microsecond, None),
        SqlType::Bool => DataType::Boolean,
        SqlType::Double => DataType::Float64,
    }
}

/// Arrow schema of a table definition.
pub fn arrow_schema(definition: &TableDefinition) -> SchemaRef {
    let fields: Vec<Field> = definition
        .columns
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(c.sql_type), c.nullable))
        .collect();
    let metadata = HashMap::from([(
        TABLE_NAME_METADATA_KEY.to_string(),
        definition.table_name.to_string(),
    )]);
    Arc::new(Schema::new_with_metadata(fields, metadata))
}

fn read_batches(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn check_schema(path: &Path, found: &Schema, expected: &Schema) -> Result<()> {
    if found.fields() != expected.fields() {
        return Err(ExportError::invalid_argument(format!(
            "extract {} has columns [{}], expected [{}]",
            path.display(),
            field_names(found),
            field_names(expected)
        )));
    }
    Ok(())
}

fn field_names(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_column(column: &Column, rows: &[Row], idx: usize) -> Result<ArrayRef> {
    let mismatch =
        |v: &Value| ExportError::type_mismatch(&column.name, column.sql_type.to_string(), v.kind());

    let array: ArrayRef = match column.sql_type {
        SqlType::Text => {
            let mut builder = StringBuilder::new();
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Text(s) => builder.append_value(s),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
        SqlType::Int => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Int(v) => builder.append_value(*v),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        SqlType::Double => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    other => builder.append_value(other.as_f64().ok_or_else(|| mismatch(other))?),
                }
            }
            Arc::new(builder.finish())
        }
        SqlType::Bool => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Bool(v) => builder.append_value(*v),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        SqlType::Date => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len());
            for row in rows {
                match &row[idx] {
                    Value::Null => builder.append_null(),
                    Value::Text(s) => {
                        builder.append_value(require_timestamp(s)?.and_utc().timestamp_micros())
                    }
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

fn cell(array: &dyn Array, sql_type: SqlType, row: usize) -> Result<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    Ok(match sql_type {
        SqlType::Text => Value::Text(array.as_string::<i32>().value(row).to_string()),
        SqlType::Int => Value::Int(array.as_primitive::<Int64Type>().value(row)),
        SqlType::Double => Value::Double(array.as_primitive::<Float64Type>().value(row)),
        SqlType::Bool => Value::Bool(array.as_boolean().value(row)),
        SqlType::Date => {
            let micros = array.as_primitive::<TimestampMicrosecondType>().value(row);
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            let ts = DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos)
                .ok_or_else(|| ExportError::Timestamp(micros.to_string()))?;
            Value::Text(render_timestamp(&ts.naive_utc()))
        }
    })
}

impl ExtractStore for ParquetExtract {
    fn name(&self) -> &'static str {
        "parquet"
    }

    #[instrument(skip(self, path, definition), fields(table = %definition.table_name, path = %path.display()))]
    fn create(&self, path: &Path, definition: &TableDefinition, mode: CreateMode) -> Result<()> {
        let schema = arrow_schema(definition);
        if mode.prepare(path)? {
            self.write_batches(path, schema, &[])?;
            if self.log.log_extract_operations {
                debug!("Created empty extract");
            }
        } else {
            let (found, _) = read_batches(path)?;
            check_schema(path, &found, &schema)?;
            if self.log.log_extract_operations {
                debug!("Reusing existing extract");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, definition, rows), fields(table = %definition.table_name, rows = rows.len()))]
    fn insert(&self, path: &Path, definition: &TableDefinition, rows: Vec<Row>) -> Result<usize> {
        CreateMode::None.prepare(path)?;
        let schema = arrow_schema(definition);
        let (found, existing) = read_batches(path)?;
        check_schema(path, &found, &schema)?;

        let rows = rows
            .into_iter()
            .map(|row| coerce_row(definition, row))
            .collect::<Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let columns = definition
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| build_column(column, &rows, idx))
            .collect::<Result<Vec<_>>>()?;
        // Existing batches are rebound to the definition's schema.
        let mut batches = existing
            .into_iter()
            .map(|batch| RecordBatch::try_new(schema.clone(), batch.columns().to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        batches.push(RecordBatch::try_new(schema.clone(), columns)?);

        self.write_batches(path, schema, &batches)?;
        if self.log.log_extract_operations {
            debug!(inserted = rows.len(), "Inserted rows");
        }
        Ok(rows.len())
    }

    fn read(&self, path: &Path, definition: &TableDefinition) -> Result<Vec<Row>> {
        CreateMode::None.prepare(path)?;
        let (found, batches) = read_batches(path)?;
        check_schema(path, &found, &arrow_schema(definition))?;

        let mut out = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                let values = definition
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| cell(batch.column(idx).as_ref(), column.sql_type, row))
                    .collect::<Result<Row>>()?;
                out.push(values);
            }
        }
        Ok(out)
    }
}
