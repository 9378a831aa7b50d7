//! Extract files: creation modes, the store abstraction and its backends.
//!
//! An extract is a local file holding one table in the `Extract` schema.
//! Every [`ExtractStore`] operation opens its own session on the file and
//! releases it before returning, on success and on error alike.

mod parquet_store;
mod sqlite_store;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use parquet_store::ParquetExtract;
pub use sqlite_store::{Inserter, SqliteExtract, SqliteSession};

use crate::error::{ExportError, Result};
use crate::schema::TableDefinition;
use crate::value::Row;

/// How an extract file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CreateMode {
    /// Open an existing file; fail if it is missing.
    None,
    /// Create a new file; fail if it already exists.
    Create,
    /// Create the file when missing, otherwise open it.
    CreateIfNotExists,
    /// Replace any existing file with a new one.
    #[default]
    CreateAndReplace,
}

impl CreateMode {
    /// Numeric code used by job parameters (0 through 3).
    pub fn code(&self) -> i64 {
        match self {
            CreateMode::None => 0,
            CreateMode::Create => 1,
            CreateMode::CreateIfNotExists => 2,
            CreateMode::CreateAndReplace => 3,
        }
    }

    /// Applies the mode's existence rules to `path`, removing the file for
    /// [`CreateMode::CreateAndReplace`].
    ///
    /// Returns whether a new file has to be created.
    pub(crate) fn prepare(&self, path: &Path) -> Result<bool> {
        let exists = path.exists();
        match self {
            CreateMode::None if !exists => Err(ExportError::ExtractNotFound {
                path: path.display().to_string(),
            }),
            CreateMode::None => Ok(false),
            CreateMode::Create if exists => Err(ExportError::ExtractExists {
                path: path.display().to_string(),
            }),
            CreateMode::Create => Ok(true),
            CreateMode::CreateIfNotExists => Ok(!exists),
            CreateMode::CreateAndReplace => {
                if exists {
                    std::fs::remove_file(path)?;
                }
                Ok(true)
            }
        }
    }
}

impl TryFrom<i64> for CreateMode {
    type Error = ExportError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(CreateMode::None),
            1 => Ok(CreateMode::Create),
            2 => Ok(CreateMode::CreateIfNotExists),
            3 => Ok(CreateMode::CreateAndReplace),
            other => Err(ExportError::invalid_argument(format!(
                "Invalid CreateMode value {other}. Specify a value between 0 and 3"
            ))),
        }
    }
}

/// A local extract file format.
pub trait ExtractStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Creates the extract's schema and table according to `mode`.
    fn create(&self, path: &Path, definition: &TableDefinition, mode: CreateMode) -> Result<()>;

    /// Appends rows to an existing extract in one transaction and returns
    /// the number of rows inserted.
    fn insert(&self, path: &Path, definition: &TableDefinition, rows: Vec<Row>) -> Result<usize>;

    /// Reads back every row of the table, in insertion order.
    fn read(&self, path: &Path, definition: &TableDefinition) -> Result<Vec<Row>>;
}

/// Deletes a pre-existing extract file. A missing file is logged and ignored.
pub fn remove_extract_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed previous extract file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "Extract file does not exist");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
