//! Table definitions and schema derivation.
//!
//! A [`TableDefinition`] fixes the column order every row must follow. Two
//! derivations exist:
//!
//! - [`FetchLayout::derive`] maps declared [`FieldSpec`]s to columns and
//!   validates their paths up front;
//! - [`metric_table_definition`] prepends `id` and `start` to one double
//!   column per metric name.
//!
//! # Example
//!
//! ```rust
//! use tab_extract::schema::{FetchLayout, FieldDataType, FieldSpec, SqlType};
//!
//! let layout = FetchLayout::derive(
//!     "Bulbs",
//!     vec![
//!         FieldSpec::new("id", FieldDataType::String, false),
//!         FieldSpec::new("fixture.wattage", FieldDataType::Double, true),
//!     ],
//! )
//! .unwrap();
//!
//! assert_eq!(layout.definition.columns[1].sql_type, SqlType::Double);
//! assert_eq!(layout.include_spec(), "id,fixture.wattage");
//! ```

mod coerce;
mod field;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use coerce::{coerce_row, coerce_value, extract_field};
pub use field::{FieldDataType, FieldPath, FieldSpec, ResolvedField, MAX_PATH_DEPTH};

use crate::error::{ExportError, Result};

/// Schema every extract table lives in.
pub const EXTRACT_SCHEMA: &str = "Extract";

/// Column types supported by extract files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Text,
    Int,
    Date,
    Bool,
    Double,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Text => "text",
            SqlType::Int => "int",
            SqlType::Date => "date",
            SqlType::Bool => "bool",
            SqlType::Double => "double",
        };
        f.write_str(name)
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// A table in the `Extract` schema.
    pub fn extract(table: impl Into<String>) -> Self {
        Self::new(EXTRACT_SCHEMA, table)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable,
        }
    }
}

/// Ordered columns of one extract table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub table_name: TableName,
    pub columns: Vec<Column>,
}

impl TableDefinition {
    pub fn new(table_name: TableName, columns: Vec<Column>) -> Self {
        Self {
            table_name,
            columns,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Table definition plus the validated accessors that fill it.
#[derive(Debug, Clone)]
pub struct FetchLayout {
    pub definition: TableDefinition,
    pub fields: Vec<ResolvedField>,
}

impl FetchLayout {
    /// Derives the layout of a flat-fetch extract.
    ///
    /// Fails with [`ExportError::FieldResolution`] for any path deeper than
    /// one nested reference, and with [`ExportError::InvalidArgument`] when
    /// no fields are given or a field name repeats.
    pub fn derive(table: impl Into<String>, specs: Vec<FieldSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(ExportError::invalid_argument(
                "at least one field is required",
            ));
        }

        let mut columns = Vec::with_capacity(specs.len());
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            if has_column(&columns, &spec.field_name) {
                return Err(ExportError::invalid_argument(format!(
                    "field '{}' is declared more than once",
                    spec.field_name
                )));
            }
            columns.push(Column::new(
                spec.field_name.clone(),
                spec.data_type.sql_type(),
                spec.nullable,
            ));
            fields.push(ResolvedField::resolve(spec)?);
        }

        Ok(Self {
            definition: TableDefinition::new(TableName::extract(table), columns),
            fields,
        })
    }

    /// Comma-separated field list sent as the fetch `include`.
    pub fn include_spec(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.spec.field_name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Derives the definition of a metric extract: `id`, `start`, then one
/// nullable double column per metric.
pub fn metric_table_definition(
    table: impl Into<String>,
    metrics: &[String],
    start_type: SqlType,
) -> Result<TableDefinition> {
    if metrics.is_empty() {
        return Err(ExportError::invalid_argument(
            "at least one metric is required",
        ));
    }
    if !matches!(start_type, SqlType::Text | SqlType::Date) {
        return Err(ExportError::invalid_argument(format!(
            "start column must be text or date, not {start_type}"
        )));
    }

    let mut columns = Vec::with_capacity(metrics.len() + 2);
    columns.push(Column::new("id", SqlType::Text, false));
    columns.push(Column::new("start", start_type, false));
    for metric in metrics {
        if has_column(&columns, metric) {
            return Err(ExportError::invalid_argument(format!(
                "metric column '{metric}' collides with another column"
            )));
        }
        columns.push(Column::new(metric.clone(), SqlType::Double, true));
    }

    Ok(TableDefinition::new(TableName::extract(table), columns))
}

// Extract column names are case-insensitive.
fn has_column(columns: &[Column], name: &str) -> bool {
    columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
}
