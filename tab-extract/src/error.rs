//! Error types for the extract export library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`ExportError`] enum built with `thiserror`.

use thiserror::Error;

/// The main error type for the library.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A caller-supplied argument is out of range (page size, row budget,
    /// create mode, empty metric list, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A field path could not be resolved into a column accessor.
    #[error("Cannot resolve field '{field}': {reason}")]
    FieldResolution {
        /// The dotted field name as declared
        field: String,
        /// Why resolution failed
        reason: String,
    },

    /// A value does not fit the column it is written to.
    #[error("Type mismatch in column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    /// A null value was written to a not-nullable column.
    #[error("Column '{column}' is not nullable but received a null value")]
    NullViolation { column: String },

    /// A row does not have one value per column.
    #[error("Row has {found} values but the table has {expected} columns")]
    ColumnCountMismatch { expected: usize, found: usize },

    /// A timestamp string could not be parsed.
    #[error("Invalid timestamp '{0}'")]
    Timestamp(String),

    /// The extract file is required to exist but does not.
    #[error("Extract file not found: {path}")]
    ExtractNotFound { path: String },

    /// The extract file is required to be absent but already exists.
    #[error("Extract file already exists: {path}")]
    ExtractExists { path: String },

    /// No project flagged as default exists on the publish site.
    #[error("The default project could not be found.")]
    DefaultProjectNotFound,

    /// The remote service rejected the credentials.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The remote resource does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Transport failure (connection refused, timeout, ...).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The remote service answered with a non-success status.
    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Security-related error.
    #[error("Security error: {0}")]
    Security(String),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the SQLite extract backend.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet extract backend.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// A type alias for `Result<T, ExportError>`.
pub type Result<T> = std::result::Result<T, ExportError>;

impl ExportError {
    /// Creates a new invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a new field resolution error.
    pub fn field_resolution(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FieldResolution {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new type mismatch error.
    pub fn type_mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a network error from any displayable transport error.
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
