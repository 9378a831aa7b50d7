//! Declarative field descriptors and their resolved accessors.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::SqlType;
use crate::error::{ExportError, Result};

/// Maximum number of segments in a field path (`parent.child`).
pub const MAX_PATH_DEPTH: usize = 2;

/// Source data type tag of a field.
///
/// Unrecognized tags are preserved in [`FieldDataType::Other`] and map to
/// text columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldDataType {
    String,
    Int,
    Datetime,
    Boolean,
    Double,
    Other(String),
}

impl FieldDataType {
    /// Parses a tag such as `"datetime"`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "string" => Self::String,
            "int" => Self::Int,
            "datetime" => Self::Datetime,
            "boolean" => Self::Boolean,
            "double" => Self::Double,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Datetime => "datetime",
            Self::Boolean => "boolean",
            Self::Double => "double",
            Self::Other(tag) => tag,
        }
    }

    /// Column type for this field.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Self::String => SqlType::Text,
            Self::Int => SqlType::Int,
            Self::Datetime => SqlType::Date,
            Self::Boolean => SqlType::Bool,
            Self::Double => SqlType::Double,
            Self::Other(_) => SqlType::Text,
        }
    }
}

impl From<String> for FieldDataType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<FieldDataType> for String {
    fn from(data_type: FieldDataType) -> Self {
        data_type.tag().to_string()
    }
}

impl fmt::Display for FieldDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One output column of a flat-fetch export.
///
/// Deserializes from `{"fieldName": "parent.name", "dataType": "string", "nullable": true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub field_name: String,
    pub data_type: FieldDataType,
    pub nullable: bool,
}

impl FieldSpec {
    pub fn new(field_name: impl Into<String>, data_type: FieldDataType, nullable: bool) -> Self {
        Self {
            field_name: field_name.into(),
            data_type,
            nullable,
        }
    }

    /// Parses a JSON array of field descriptors.
    pub fn list_from_json(json: &str) -> Result<Vec<FieldSpec>> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A parsed field path of one or two segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses a dotted path, rejecting empty segments and paths deeper
    /// than [`MAX_PATH_DEPTH`].
    pub fn parse(field_name: &str) -> Result<Self> {
        let segments: Vec<String> = field_name.split('.').map(str::to_string).collect();

        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(ExportError::field_resolution(
                field_name,
                "field path contains an empty segment",
            ));
        }

        if segments.len() > MAX_PATH_DEPTH {
            return Err(ExportError::field_resolution(
                field_name,
                format!(
                    "path has {} segments; at most {MAX_PATH_DEPTH} (one nested reference) are supported",
                    segments.len()
                ),
            ));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Looks the path up in a fetched entity.
    ///
    /// Returns `None` when any segment is absent or when the parent of a
    /// nested path is not an object.
    pub fn lookup<'a>(&self, entity: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        self.segments
            .iter()
            .try_fold(entity, |current, segment| current.as_object()?.get(segment))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// A field spec whose path has been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub spec: FieldSpec,
    pub path: FieldPath,
}

impl ResolvedField {
    pub fn resolve(spec: FieldSpec) -> Result<Self> {
        let path = FieldPath::parse(&spec.field_name)?;
        Ok(Self { spec, path })
    }
}
