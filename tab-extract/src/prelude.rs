//! Prelude for commonly used types and traits in tab-extract.

pub use crate::error::{ExportError, Result};
pub use crate::export::{
    ExportSummary, FetchTableExport, InsertStrategy, MetricWindow, MetricsTableExport,
};
pub use crate::extract::{CreateMode, ExtractStore, ParquetExtract, SqliteExtract};
pub use crate::jobs::{BatchScheduler, MetricBatch, MetricBatchJob, QueuedScheduler};
pub use crate::logging::LogConfig;
pub use crate::publish::{Publisher, TableauConfig, TableauServerClient};
pub use crate::schema::{FieldDataType, FieldSpec, SqlType, TableDefinition};
pub use crate::service::{DataService, InMemoryDataService, Interval, PlatformClient, PlatformConfig};
pub use crate::value::{Row, Value};
